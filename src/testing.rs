//! In-memory transport double used across the unit tests: records
//! everything sent, serves blocking calls from scripted reply closures,
//! and lets tests flip connectivity and bus-name ownership.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::{DbusError, Error, Result, ERR_NO_REPLY};
use crate::message::Message;
use crate::transport::{Timeout, Transport};

type BlockingReply = Box<dyn FnMut(&Message) -> Result<Message>>;

pub(crate) struct ScriptedTransport {
    sent: Rc<RefCell<Vec<Message>>>,
    rules: Rc<RefCell<Vec<String>>>,
    replies: Rc<RefCell<VecDeque<BlockingReply>>>,
    owners: Rc<RefCell<HashMap<String, String>>>,
    fail_owner_queries: Rc<Cell<bool>>,
    connected: Rc<Cell<bool>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            sent: Rc::new(RefCell::new(Vec::new())),
            rules: Rc::new(RefCell::new(Vec::new())),
            replies: Rc::new(RefCell::new(VecDeque::new())),
            owners: Rc::new(RefCell::new(HashMap::new())),
            fail_owner_queries: Rc::new(Cell::new(false)),
            connected: Rc::new(Cell::new(true)),
        }
    }

    /// Shared log of every message sent, serials already assigned.
    pub(crate) fn sent(&self) -> Rc<RefCell<Vec<Message>>> {
        Rc::clone(&self.sent)
    }

    pub(crate) fn match_rules(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.rules)
    }

    pub(crate) fn disconnect(&mut self) {
        self.connected.set(false);
    }

    /// Queue the reply for the next blocking call. Replies are consumed
    /// in order; an unscripted blocking call fails with `NoReply`.
    pub(crate) fn reply_with(
        &self,
        reply: impl FnMut(&Message) -> Result<Message> + 'static,
    ) {
        self.replies.borrow_mut().push_back(Box::new(reply));
    }

    pub(crate) fn set_owner(&self, name: &str, owner: &str) {
        self.owners
            .borrow_mut()
            .insert(name.to_owned(), owner.to_owned());
    }

    /// Make every subsequent owner lookup fail at the bus.
    pub(crate) fn fail_owner_queries(&self) {
        self.fail_owner_queries.set(true);
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, msg: &Message) -> Result<()> {
        if !self.connected.get() {
            return Err(Error::Disconnected);
        }
        self.sent.borrow_mut().push(msg.clone());
        Ok(())
    }

    fn call_blocking(&mut self, msg: &Message, _timeout: Timeout) -> Result<Message> {
        if !self.connected.get() {
            return Err(Error::Disconnected);
        }
        self.sent.borrow_mut().push(msg.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(mut reply) => reply(msg),
            None => Err(Error::Dbus(DbusError::new(
                ERR_NO_REPLY,
                "no scripted reply queued",
            ))),
        }
    }

    fn add_match(&mut self, rule: &str) -> Result<()> {
        self.rules.borrow_mut().push(rule.to_owned());
        Ok(())
    }

    fn remove_match(&mut self, rule: &str) -> Result<()> {
        let mut rules = self.rules.borrow_mut();
        if let Some(pos) = rules.iter().position(|r| r == rule) {
            rules.remove(pos);
        }
        Ok(())
    }

    fn name_owner(&mut self, name: &str) -> Result<Option<String>> {
        if self.fail_owner_queries.get() {
            return Err(Error::Dbus(DbusError::failed("owner query refused")));
        }
        Ok(self.owners.borrow().get(name).cloned())
    }

    fn connected(&self) -> bool {
        self.connected.get()
    }
}
