//! Object-side method dispatch.
//!
//! An [`ObjectServer`] owns every object path exported on a connection.
//! It installs a single connection filter; inbound method calls are
//! matched against the exported interface descriptors, demarshaled,
//! handed to the registered handler and answered with a marshaled
//! return or a named error. Calls the server cannot attribute to an
//! exported path fall through to later filters.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{trace, warn};

use crate::connection::{Connection, FilterId};
use crate::error::{DbusError, Error, Result, ERR_FAILED, ERR_UNKNOWN_INTERFACE, ERR_UNKNOWN_METHOD};
use crate::interface::Interface;
use crate::message::{Message, MessageHandle, MessageKind};
use crate::properties;
use crate::transport::FilterResult;
use crate::value::Value;

/// Implementation of one method. Receives the demarshaled input
/// arguments and returns the output arguments, in declaration order.
/// A `Dbus` error becomes that named error reply; any other error is
/// reported to the caller as a generic failure.
pub type MethodHandler = Box<dyn FnMut(&MessageHandle, Vec<Value>) -> Result<Vec<Value>>>;

/// Reads the current value of one property.
pub type PropertyGetter = Box<dyn FnMut(&Rc<Connection>) -> Result<Value>>;

/// Writes one property. The value has already been checked against the
/// declared type.
pub type PropertySetter = Box<dyn FnMut(&Rc<Connection>, Value) -> Result<()>>;

/// The callables backing one exported interface, keyed by member name.
#[derive(Default)]
pub struct InterfaceHandlers {
    methods: HashMap<String, MethodHandler>,
    getters: HashMap<String, PropertyGetter>,
    setters: HashMap<String, PropertySetter>,
}

impl InterfaceHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(&MessageHandle, Vec<Value>) -> Result<Vec<Value>> + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Box::new(handler));
        self
    }

    pub fn getter(
        mut self,
        name: impl Into<String>,
        getter: impl FnMut(&Rc<Connection>) -> Result<Value> + 'static,
    ) -> Self {
        self.getters.insert(name.into(), Box::new(getter));
        self
    }

    pub fn setter(
        mut self,
        name: impl Into<String>,
        setter: impl FnMut(&Rc<Connection>, Value) -> Result<()> + 'static,
    ) -> Self {
        self.setters.insert(name.into(), Box::new(setter));
        self
    }
}

/// One interface exported at one path.
pub(crate) struct Export {
    pub(crate) interface: Rc<Interface>,
    pub(crate) handlers: RefCell<InterfaceHandlers>,
}

impl Export {
    pub(crate) fn get_property(
        &self,
        conn: &Rc<Connection>,
        name: &str,
    ) -> Option<Result<Value>> {
        let mut handlers = self.handlers.borrow_mut();
        let getter = handlers.getters.get_mut(name)?;
        Some(getter(conn))
    }

    pub(crate) fn set_property(
        &self,
        conn: &Rc<Connection>,
        name: &str,
        value: Value,
    ) -> Option<Result<()>> {
        let mut handlers = self.handlers.borrow_mut();
        let setter = handlers.setters.get_mut(name)?;
        Some(setter(conn, value))
    }
}

type ObjectTable = Rc<RefCell<HashMap<String, Vec<Rc<Export>>>>>;

pub struct ObjectServer {
    connection: Rc<Connection>,
    objects: ObjectTable,
    filter: FilterId,
}

impl ObjectServer {
    pub fn new(connection: &Rc<Connection>) -> Self {
        let objects: ObjectTable = Rc::new(RefCell::new(HashMap::new()));
        let table = Rc::clone(&objects);
        let filter = connection.add_filter(Box::new(move |conn, msg| {
            handle_call(conn, &table, msg)
        }));
        Self {
            connection: Rc::clone(connection),
            objects,
            filter,
        }
    }

    pub fn connection(&self) -> &Rc<Connection> {
        &self.connection
    }

    /// Export `interface` at `path`. An earlier export of the same
    /// interface name at that path is replaced.
    pub fn export(&self, path: &str, interface: Rc<Interface>, handlers: InterfaceHandlers) {
        let mut objects = self.objects.borrow_mut();
        let exports = objects.entry(path.to_owned()).or_insert_with(Vec::new);
        exports.retain(|e| e.interface.name != interface.name);
        exports.push(Rc::new(Export {
            interface,
            handlers: RefCell::new(handlers),
        }));
    }

    /// Withdraw one interface from a path. Returns whether it was
    /// exported.
    pub fn unexport(&self, path: &str, interface_name: &str) -> bool {
        let mut objects = self.objects.borrow_mut();
        let exports = match objects.get_mut(path) {
            Some(exports) => exports,
            None => return false,
        };
        let before = exports.len();
        exports.retain(|e| e.interface.name != interface_name);
        let removed = exports.len() != before;
        if exports.is_empty() {
            objects.remove(path);
        }
        removed
    }
}

impl Drop for ObjectServer {
    fn drop(&mut self) {
        self.connection.remove_filter(self.filter);
    }
}

fn handle_call(conn: &Rc<Connection>, objects: &ObjectTable, msg: &Message) -> FilterResult {
    if msg.kind != MessageKind::MethodCall {
        return FilterResult::NotYetHandled;
    }
    let (path, member) = match (&msg.path, &msg.member) {
        (Some(path), Some(member)) => (path.as_str(), member.as_str()),
        _ => return FilterResult::NotYetHandled,
    };

    // Paths nobody exported are not ours to answer.
    let exports: Vec<Rc<Export>> = match objects.borrow().get(path) {
        Some(exports) => exports.clone(),
        None => return FilterResult::NotYetHandled,
    };

    if msg.interface.as_deref() == Some(properties::PROPERTIES_INTERFACE) {
        return properties::handle_call(conn, &exports, msg);
    }

    let export = match resolve_export(&exports, msg.interface.as_deref(), member) {
        Ok(export) => export,
        Err(error) => {
            trace!("unroutable call {} at {}: {}", member, path, error.name);
            return reply_error(conn, msg, &error);
        }
    };

    let method = match export.interface.find_method(member) {
        Some(method) => method.clone(),
        None => {
            let error = DbusError::new(
                ERR_UNKNOWN_METHOD,
                format!("no method {} on {}", member, export.interface.name),
            );
            return reply_error(conn, msg, &error);
        }
    };

    let args = match msg.args(&method.in_types()) {
        Ok(args) => args,
        // Unconsumed: the caller redelivers once memory clears.
        Err(Error::OutOfMemory) => return FilterResult::NeedMemory,
        Err(e) => return reply_error(conn, msg, &e.to_dbus_error()),
    };

    let handle = MessageHandle::new(Rc::clone(conn), msg.clone());
    let outcome = {
        let mut handlers = export.handlers.borrow_mut();
        match handlers.methods.get_mut(member) {
            Some(handler) => handler(&handle, args),
            None => Err(Error::Dbus(DbusError::new(
                ERR_UNKNOWN_METHOD,
                format!("method {} has no handler", member),
            ))),
        }
    };

    match outcome {
        Ok(values) => reply_return(conn, msg, &values, &method.out_types()),
        Err(Error::OutOfMemory) => FilterResult::NeedMemory,
        Err(e) => reply_error(conn, msg, &e.to_dbus_error()),
    }
}

/// Pick the export a call addresses. An explicit interface must match
/// exactly; a call without one goes to the first export that declares
/// the member.
fn resolve_export<'a>(
    exports: &'a [Rc<Export>],
    interface: Option<&str>,
    member: &str,
) -> std::result::Result<&'a Rc<Export>, DbusError> {
    match interface {
        Some(name) => exports
            .iter()
            .find(|e| e.interface.name == name)
            .ok_or_else(|| {
                DbusError::new(
                    ERR_UNKNOWN_INTERFACE,
                    format!("interface {} is not exported here", name),
                )
            }),
        None => exports
            .iter()
            .find(|e| e.interface.find_method(member).is_some())
            .ok_or_else(|| {
                DbusError::new(
                    ERR_UNKNOWN_METHOD,
                    format!("no exported interface has a method {}", member),
                )
            }),
    }
}

/// Marshaling retries while allocation fails; the handler already ran
/// and must not run again.
const MAX_REPLY_MARSHAL_ATTEMPTS: usize = 8;

pub(crate) fn reply_return(
    conn: &Rc<Connection>,
    call: &Message,
    values: &[Value],
    types: &[crate::signature::Type],
) -> FilterResult {
    if !call.wants_reply() {
        return FilterResult::Handled;
    }
    let mut reply = Message::method_return(call);
    for attempt in 0.. {
        match reply.set_args(values, types) {
            Ok(()) => break,
            Err(Error::OutOfMemory) if attempt + 1 < MAX_REPLY_MARSHAL_ATTEMPTS => {
                warn!("reply to serial {} out of memory, retrying", call.serial);
            }
            Err(Error::OutOfMemory) => {
                return reply_error(conn, call, &Error::OutOfMemory.to_dbus_error());
            }
            // The handler produced values its own descriptor rejects.
            // That is the object's failure, not the caller's arguments.
            Err(e) => {
                return reply_error(conn, call, &DbusError::new(ERR_FAILED, e.to_string()))
            }
        }
    }
    if let Err(e) = conn.send(reply) {
        warn!("failed to send reply to serial {}: {}", call.serial, e);
    }
    FilterResult::Handled
}

pub(crate) fn reply_error(
    conn: &Rc<Connection>,
    call: &Message,
    error: &DbusError,
) -> FilterResult {
    if !call.wants_reply() {
        return FilterResult::Handled;
    }
    let reply = match Message::error_reply(call, error) {
        Ok(reply) => reply,
        // Marshaling the error text itself ran out of memory. Leave the
        // message unconsumed so the whole exchange is retried later.
        Err(Error::OutOfMemory) => return FilterResult::NeedMemory,
        Err(e) => {
            warn!("failed to build error reply to serial {}: {}", call.serial, e);
            return FilterResult::Handled;
        }
    };
    if let Err(e) = conn.send(reply) {
        warn!("failed to send error reply to serial {}: {}", call.serial, e);
    }
    FilterResult::Handled
}
