//! Per-connection runtime state shared by every component: serial
//! assignment, the message-filter chain, the pending-reply table and
//! refcounted bus match rules.
//!
//! Everything here is single-threaded and cooperative: whichever thread
//! drives the connection's message loop feeds each inbound message to
//! [`Connection::dispatch`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::{FilterResult, Timeout, Transport};

/// A filter sees every non-reply inbound message, in registration order.
pub type Filter = Box<dyn FnMut(&Rc<Connection>, &Message) -> FilterResult>;

/// Continuation for one outstanding call, keyed by its serial.
pub type ReplyCallback = Box<dyn FnOnce(&Rc<Connection>, &Message)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

/// Bounded immediate retries of the filter pass while a filter reports
/// it needs memory; past this the message goes back to the caller
/// unconsumed for later redelivery.
const MAX_NEED_MEMORY_RETRIES: usize = 8;

pub struct Connection {
    transport: RefCell<Box<dyn Transport>>,
    next_serial: Cell<u32>,
    next_filter: Cell<u64>,
    filters: RefCell<Vec<(FilterId, Rc<RefCell<Filter>>)>>,
    pending: RefCell<HashMap<u32, ReplyCallback>>,
    match_rules: RefCell<HashMap<String, usize>>,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>) -> Rc<Self> {
        Rc::new(Self {
            transport: RefCell::new(transport),
            next_serial: Cell::new(1),
            next_filter: Cell::new(0),
            filters: RefCell::new(Vec::new()),
            pending: RefCell::new(HashMap::new()),
            match_rules: RefCell::new(HashMap::new()),
        })
    }

    pub fn connected(&self) -> bool {
        self.transport.borrow().connected()
    }

    fn assign_serial(&self, msg: &mut Message) -> u32 {
        let serial = self.next_serial.get();
        // Serial 0 is reserved on the wire.
        self.next_serial
            .set(if serial == u32::MAX { 1 } else { serial + 1 });
        msg.serial = serial;
        serial
    }

    /// Send a message, assigning its serial. No reply is tracked.
    pub fn send(&self, mut msg: Message) -> Result<u32> {
        if !self.connected() {
            return Err(Error::Disconnected);
        }
        let serial = self.assign_serial(&mut msg);
        self.transport.borrow_mut().send(&msg)?;
        Ok(serial)
    }

    /// Send a call and register its continuation. The continuation is
    /// stored only once the send has succeeded, so a send failure leaves
    /// no pending state behind.
    pub fn send_with_reply(
        &self,
        mut msg: Message,
        timeout: Timeout,
        on_reply: ReplyCallback,
    ) -> Result<u32> {
        if !self.connected() {
            return Err(Error::Disconnected);
        }
        let serial = self.assign_serial(&mut msg);
        self.transport
            .borrow_mut()
            .send_expecting_reply(&msg, timeout)?;
        self.pending.borrow_mut().insert(serial, on_reply);
        Ok(serial)
    }

    /// Send a call and block until its reply. Must not be called from a
    /// handler running on this connection's dispatch thread.
    pub fn call_blocking(&self, mut msg: Message, timeout: Timeout) -> Result<Message> {
        if !self.connected() {
            return Err(Error::Disconnected);
        }
        self.assign_serial(&mut msg);
        self.transport.borrow_mut().call_blocking(&msg, timeout)
    }

    /// Forget an outstanding call. A reply that still arrives for it is
    /// dropped silently. Returns whether the call was still outstanding.
    pub fn cancel_pending(&self, serial: u32) -> bool {
        self.pending.borrow_mut().remove(&serial).is_some()
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    #[cfg(test)]
    pub(crate) fn filter_count(&self) -> usize {
        self.filters.borrow().len()
    }

    pub fn add_filter(&self, filter: Filter) -> FilterId {
        let id = FilterId(self.next_filter.get());
        self.next_filter.set(id.0 + 1);
        self.filters
            .borrow_mut()
            .push((id, Rc::new(RefCell::new(filter))));
        id
    }

    pub fn remove_filter(&self, id: FilterId) {
        self.filters.borrow_mut().retain(|(fid, _)| *fid != id);
    }

    /// Install a bus match rule, refcounted: the transport sees the rule
    /// only on the first reference.
    pub fn add_match_rule(&self, rule: &str) -> Result<()> {
        let mut rules = self.match_rules.borrow_mut();
        let count = rules.entry(rule.to_owned()).or_insert(0);
        if *count == 0 {
            self.transport.borrow_mut().add_match(rule)?;
        }
        *count += 1;
        Ok(())
    }

    /// Drop one reference to a match rule, removing it from the bus when
    /// the last reference goes. Used from drop paths, so transport
    /// failures are logged rather than propagated.
    pub fn remove_match_rule(&self, rule: &str) {
        let mut rules = self.match_rules.borrow_mut();
        let remove = match rules.get_mut(rule) {
            Some(count) => {
                *count -= 1;
                *count == 0
            }
            None => {
                warn!("removing unknown match rule '{}'", rule);
                false
            }
        };
        if remove {
            rules.remove(rule);
            if let Err(e) = self.transport.borrow_mut().remove_match(rule) {
                warn!("failed to remove match rule '{}': {}", rule, e);
            }
        }
    }

    /// Synchronous owner lookup for a well-known name.
    pub fn name_owner(&self, name: &str) -> Result<Option<String>> {
        self.transport.borrow_mut().name_owner(name)
    }

    /// Offer one inbound message to the engine. Replies complete their
    /// pending call; everything else runs through the filter chain.
    ///
    /// `NeedMemory` means the message was not consumed and should be
    /// offered again once memory pressure clears.
    pub fn dispatch(self: &Rc<Self>, msg: &Message) -> FilterResult {
        if msg.is_reply() {
            let serial = msg.reply_serial.unwrap_or(0);
            let callback = self.pending.borrow_mut().remove(&serial);
            match callback {
                Some(callback) => {
                    trace!("completing pending call {}", serial);
                    callback(self, msg);
                }
                // Cancelled while in flight; tolerated.
                None => debug!("dropping reply to unknown serial {}", serial),
            }
            return FilterResult::Handled;
        }

        // Snapshot so filters may subscribe or unsubscribe reentrantly.
        let snapshot: Vec<Rc<RefCell<Filter>>> = self
            .filters
            .borrow()
            .iter()
            .map(|(_, f)| Rc::clone(f))
            .collect();

        // Retries resume at the failing filter so filters that already
        // ran their side effects are not offered the message again.
        let mut resume_at = 0;
        'retry: for attempt in 0..MAX_NEED_MEMORY_RETRIES {
            for (ix, filter) in snapshot.iter().enumerate().skip(resume_at) {
                match (filter.borrow_mut())(self, msg) {
                    FilterResult::Handled => return FilterResult::Handled,
                    FilterResult::NotYetHandled => continue,
                    FilterResult::NeedMemory => {
                        warn!("filter out of memory, retry {}", attempt + 1);
                        resume_at = ix;
                        continue 'retry;
                    }
                }
            }
            return FilterResult::NotYetHandled;
        }
        FilterResult::NeedMemory
    }
}
