//! Signal emission and subscription.
//!
//! Subscriptions install a connection filter plus the bus match rule
//! that makes the signal reach us at all. Signals are broadcast, so a
//! matching subscription runs its handler but never consumes the
//! message; every other subscription still sees it. Dropping the
//! subscription tears both the filter and the match rule down.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::connection::{Connection, FilterId};
use crate::error::{Error, Result};
use crate::interface::Interface;
use crate::message::{Message, MessageKind};
use crate::transport::FilterResult;
use crate::value::Value;

/// Runs for each matching signal with the demarshaled arguments.
pub type SignalHandler = Box<dyn FnMut(&Rc<Connection>, &Message, Vec<Value>)>;

/// Which senders a subscription accepts.
pub enum SenderFilter {
    /// Any sender.
    Any,
    /// Exactly this unique connection name.
    Unique(String),
    /// Whatever connection currently owns a well-known name. The owner
    /// cell is shared with the [`NameTracker`](crate::name_tracker::NameTracker)
    /// that keeps it current; while the name has no owner nothing
    /// matches.
    Tracked {
        name: String,
        owner: Rc<RefCell<Option<String>>>,
    },
}

impl SenderFilter {
    fn accepts(&self, sender: Option<&str>) -> bool {
        match self {
            SenderFilter::Any => true,
            SenderFilter::Unique(name) => sender == Some(name.as_str()),
            SenderFilter::Tracked { owner, .. } => match (&*owner.borrow(), sender) {
                (Some(owner), Some(sender)) => owner == sender,
                _ => false,
            },
        }
    }

    /// The sender key for the bus match rule, if any. A tracked name
    /// matches on the well-known name; the bus resolves it.
    fn rule_sender(&self) -> Option<&str> {
        match self {
            SenderFilter::Any => None,
            SenderFilter::Unique(name) => Some(name),
            SenderFilter::Tracked { name, .. } => Some(name),
        }
    }
}

fn match_rule(
    interface: &str,
    member: &str,
    path: Option<&str>,
    sender: &SenderFilter,
) -> String {
    let mut rule = format!("type='signal',interface='{}',member='{}'", interface, member);
    if let Some(path) = path {
        rule.push_str(&format!(",path='{}'", path));
    }
    if let Some(sender) = sender.rule_sender() {
        rule.push_str(&format!(",sender='{}'", sender));
    }
    rule
}

/// A live signal subscription. Dropping it unsubscribes.
pub struct SignalSubscription {
    connection: Rc<Connection>,
    filter: FilterId,
    rule: String,
}

impl SignalSubscription {
    /// Subscribe to `signal` of `interface`, optionally pinned to one
    /// object path and one sender. The signal must exist in the
    /// descriptor; its declared arguments drive demarshaling.
    pub fn subscribe(
        connection: &Rc<Connection>,
        interface: &Rc<Interface>,
        signal: &str,
        path: Option<&str>,
        sender: SenderFilter,
        handler: impl FnMut(&Rc<Connection>, &Message, Vec<Value>) + 'static,
    ) -> Result<SignalSubscription> {
        let descriptor = interface
            .find_signal(signal)
            .ok_or_else(|| Error::NoSuchSignal(signal.to_owned()))?;
        let arg_types = descriptor.arg_types();
        let rule = match_rule(&interface.name, signal, path, &sender);
        connection.add_match_rule(&rule)?;

        let interface_name = interface.name.clone();
        let member = signal.to_owned();
        let path = path.map(str::to_owned);
        let mut handler: SignalHandler = Box::new(handler);
        let filter = connection.add_filter(Box::new(move |conn, msg| {
            if msg.kind != MessageKind::Signal {
                return FilterResult::NotYetHandled;
            }
            if msg.interface.as_deref() != Some(interface_name.as_str())
                || msg.member.as_deref() != Some(member.as_str())
            {
                return FilterResult::NotYetHandled;
            }
            if let Some(path) = &path {
                if msg.path.as_deref() != Some(path.as_str()) {
                    return FilterResult::NotYetHandled;
                }
            }
            if !sender.accepts(msg.sender.as_deref()) {
                return FilterResult::NotYetHandled;
            }
            let args = match msg.args(&arg_types) {
                Ok(args) => args,
                Err(Error::OutOfMemory) => return FilterResult::NeedMemory,
                // A matching signal with a bad body is dropped, not an
                // error anyone can be told about.
                Err(e) => {
                    trace!("dropping malformed {}.{}: {}", interface_name, member, e);
                    return FilterResult::NotYetHandled;
                }
            };
            handler(conn, msg, args);
            // Signals are broadcast; never consume them.
            FilterResult::NotYetHandled
        }));

        Ok(SignalSubscription {
            connection: Rc::clone(connection),
            filter,
            rule,
        })
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        self.connection.remove_filter(self.filter);
        self.connection.remove_match_rule(&self.rule);
    }
}

/// Emit `signal` from an object at `path`, checked against the
/// interface descriptor.
pub fn emit(
    connection: &Rc<Connection>,
    path: &str,
    interface: &Rc<Interface>,
    signal: &str,
    args: &[Value],
) -> Result<u32> {
    let descriptor = interface
        .find_signal(signal)
        .ok_or_else(|| Error::NoSuchSignal(signal.to_owned()))?;
    let mut msg = Message::signal(path, &interface.name, signal);
    msg.set_args(args, &descriptor.arg_types())?;
    connection.send(msg)
}
