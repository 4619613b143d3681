//! Ownership tracking for well-known bus names.
//!
//! A [`NameTracker`] keeps a cell with the unique connection currently
//! owning a name, updated from the bus daemon's NameOwnerChanged
//! signal. The cell is shared with signal subscriptions so a
//! [`SenderFilter::Tracked`](crate::signal::SenderFilter::Tracked)
//! match always compares against the live owner.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::connection::{Connection, FilterId};
use crate::error::{Error, Result};
use crate::message::{Message, MessageKind};
use crate::signature::Type;
use crate::transport::FilterResult;

const BUS_NAME: &str = "org.freedesktop.DBus";
const BUS_INTERFACE: &str = "org.freedesktop.DBus";
const NAME_OWNER_CHANGED: &str = "NameOwnerChanged";

/// Runs on each ownership change with the old and new owner. `None`
/// means the name was, or became, unowned.
pub type OwnerChangeHandler = Box<dyn FnMut(&Rc<Connection>, Option<&str>, Option<&str>)>;

pub struct NameTracker {
    connection: Rc<Connection>,
    name: String,
    owner: Rc<RefCell<Option<String>>>,
    filter: FilterId,
    rule: String,
}

impl NameTracker {
    /// Start tracking `name`. The current owner is queried synchronously
    /// once the change signal is hooked up, so no transition is lost in
    /// between.
    pub fn track(
        connection: &Rc<Connection>,
        name: &str,
        mut on_change: impl FnMut(&Rc<Connection>, Option<&str>, Option<&str>) + 'static,
    ) -> Result<NameTracker> {
        let rule = format!(
            "type='signal',sender='{}',interface='{}',member='{}',arg0='{}'",
            BUS_NAME, BUS_INTERFACE, NAME_OWNER_CHANGED, name
        );
        connection.add_match_rule(&rule)?;

        let owner = Rc::new(RefCell::new(None));
        let cell = Rc::clone(&owner);
        let tracked = name.to_owned();
        let filter = connection.add_filter(Box::new(move |conn, msg| {
            if !is_owner_change(msg) {
                return FilterResult::NotYetHandled;
            }
            let args = match msg.args(&[Type::Str, Type::Str, Type::Str]) {
                Ok(args) => args,
                Err(Error::OutOfMemory) => return FilterResult::NeedMemory,
                Err(e) => {
                    debug!("dropping malformed {}: {}", NAME_OWNER_CHANGED, e);
                    return FilterResult::NotYetHandled;
                }
            };
            if args[0].as_str() != Some(tracked.as_str()) {
                return FilterResult::NotYetHandled;
            }
            // The bus signals "no owner" as an empty string.
            let old = args[1].as_str().filter(|s| !s.is_empty()).map(str::to_owned);
            let new = args[2].as_str().filter(|s| !s.is_empty()).map(str::to_owned);
            trace!("{} owner {:?} -> {:?}", tracked, old, new);
            *cell.borrow_mut() = new.clone();
            on_change(conn, old.as_deref(), new.as_deref());
            FilterResult::NotYetHandled
        }));

        // A failed owner query must not leave the filter and match rule
        // behind, since there is no tracker to drop them later.
        match connection.name_owner(name) {
            Ok(current) => *owner.borrow_mut() = current,
            Err(e) => {
                connection.remove_filter(filter);
                connection.remove_match_rule(&rule);
                return Err(e);
            }
        }

        Ok(NameTracker {
            connection: Rc::clone(connection),
            name: name.to_owned(),
            owner,
            filter,
            rule,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unique name currently owning the tracked name, if any.
    pub fn owner(&self) -> Option<String> {
        self.owner.borrow().clone()
    }

    /// The live owner cell, shared with signal subscriptions.
    pub fn owner_cell(&self) -> Rc<RefCell<Option<String>>> {
        Rc::clone(&self.owner)
    }
}

impl Drop for NameTracker {
    fn drop(&mut self) {
        self.connection.remove_filter(self.filter);
        self.connection.remove_match_rule(&self.rule);
    }
}

fn is_owner_change(msg: &Message) -> bool {
    msg.kind == MessageKind::Signal
        && msg.sender.as_deref() == Some(BUS_NAME)
        && msg.interface.as_deref() == Some(BUS_INTERFACE)
        && msg.member.as_deref() == Some(NAME_OWNER_CHANGED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use crate::value::Value;
    use test_log::test;

    fn owner_changed(name: &str, old: &str, new: &str) -> Message {
        let mut msg = Message::signal("/org/freedesktop/DBus", BUS_INTERFACE, NAME_OWNER_CHANGED);
        msg.sender = Some(BUS_NAME.into());
        msg.set_args(
            &[
                Value::Str(name.into()),
                Value::Str(old.into()),
                Value::Str(new.into()),
            ],
            &[Type::Str, Type::Str, Type::Str],
        )
        .unwrap();
        msg
    }

    #[test]
    fn initial_owner_is_queried() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.set_owner("com.example.Player", ":1.4");
        let conn = Connection::new(Box::new(transport));
        let tracker = NameTracker::track(&conn, "com.example.Player", |_, _, _| {})?;
        assert_eq!(tracker.owner().as_deref(), Some(":1.4"));
        Ok(())
    }

    #[test]
    fn ownership_transitions_update_the_cell_and_notify() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.set_owner("com.example.Player", ":1.4");
        let conn = Connection::new(Box::new(transport));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let tracker = NameTracker::track(&conn, "com.example.Player", move |_, old, new| {
            s.borrow_mut()
                .push((old.map(str::to_owned), new.map(str::to_owned)));
        })?;

        // The name is dropped, then picked up by another connection.
        conn.dispatch(&owner_changed("com.example.Player", ":1.4", ""));
        assert_eq!(tracker.owner(), None);
        conn.dispatch(&owner_changed("com.example.Player", "", ":1.11"));
        assert_eq!(tracker.owner().as_deref(), Some(":1.11"));

        assert_eq!(
            *seen.borrow(),
            vec![
                (Some(":1.4".into()), None),
                (None, Some(":1.11".into())),
            ]
        );
        Ok(())
    }

    #[test]
    fn other_names_do_not_disturb_the_tracker() -> Result<()> {
        let conn = Connection::new(Box::new(ScriptedTransport::new()));
        let tracker = NameTracker::track(&conn, "com.example.Player", |_, _, _| {
            panic!("notified for a foreign name")
        })?;
        conn.dispatch(&owner_changed("com.example.Mixer", "", ":1.9"));
        assert_eq!(tracker.owner(), None);
        Ok(())
    }

    #[test]
    fn tracker_installs_a_scoped_match_rule() -> Result<()> {
        let transport = ScriptedTransport::new();
        let rules = transport.match_rules();
        let conn = Connection::new(Box::new(transport));
        let tracker = NameTracker::track(&conn, "com.example.Player", |_, _, _| {})?;
        assert_eq!(
            rules.borrow()[0],
            "type='signal',sender='org.freedesktop.DBus',\
             interface='org.freedesktop.DBus',member='NameOwnerChanged',\
             arg0='com.example.Player'"
        );
        drop(tracker);
        assert!(rules.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn failed_owner_query_tears_down_filter_and_rule() {
        let transport = ScriptedTransport::new();
        transport.fail_owner_queries();
        let rules = transport.match_rules();
        let conn = Connection::new(Box::new(transport));
        assert!(NameTracker::track(&conn, "com.example.Player", |_, _, _| {}).is_err());
        assert!(rules.borrow().is_empty());
        assert_eq!(conn.filter_count(), 0);
    }

    #[test]
    fn owner_cell_is_shared() -> Result<()> {
        let conn = Connection::new(Box::new(ScriptedTransport::new()));
        let tracker = NameTracker::track(&conn, "com.example.Player", |_, _, _| {})?;
        let cell = tracker.owner_cell();
        conn.dispatch(&owner_changed("com.example.Player", "", ":1.30"));
        assert_eq!(cell.borrow().as_deref(), Some(":1.30"));
        Ok(())
    }
}
