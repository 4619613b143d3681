//! The org.freedesktop.DBus.Properties surface of every exported path.
//!
//! Get, Set and GetAll route through the getters and setters registered
//! with the [`ObjectServer`](crate::dispatch::ObjectServer) rather than
//! through ordinary method handlers. Values cross the wire as variants;
//! the declared property type is enforced on both directions.

use std::rc::Rc;

use log::trace;

use crate::connection::Connection;
use crate::dispatch::{reply_error, reply_return, Export};
use crate::error::{
    DbusError, Error, ERR_FAILED, ERR_INVALID_ARGS, ERR_PROPERTY_READ_ONLY, ERR_UNKNOWN_INTERFACE,
    ERR_UNKNOWN_METHOD, ERR_UNKNOWN_PROPERTY,
};
use crate::interface::Property;
use crate::message::Message;
use crate::signature::Type;
use crate::transport::FilterResult;
use crate::value::{Array, Value};

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Argument types of Get, Set and GetAll.
fn get_in() -> [Type; 2] {
    [Type::Str, Type::Str]
}

fn set_in() -> [Type; 3] {
    [Type::Str, Type::Str, Type::Variant]
}

fn getall_in() -> [Type; 1] {
    [Type::Str]
}

/// The aggregate GetAll returns: an array of (name, variant) pairs.
fn property_dict_type() -> Type {
    Type::dict(Type::Str, Type::Variant)
}

pub(crate) fn handle_call(
    conn: &Rc<Connection>,
    exports: &[Rc<Export>],
    msg: &Message,
) -> FilterResult {
    match msg.member.as_deref() {
        Some("Get") => get(conn, exports, msg),
        Some("Set") => set(conn, exports, msg),
        Some("GetAll") => get_all(conn, exports, msg),
        other => {
            let error = DbusError::new(
                ERR_UNKNOWN_METHOD,
                format!(
                    "no method {} on {}",
                    other.unwrap_or(""),
                    PROPERTIES_INTERFACE
                ),
            );
            reply_error(conn, msg, &error)
        }
    }
}

/// Demarshal a property call's arguments, mapping failures the same way
/// method dispatch does.
fn call_args(
    conn: &Rc<Connection>,
    msg: &Message,
    types: &[Type],
) -> std::result::Result<Vec<Value>, FilterResult> {
    match msg.args(types) {
        Ok(args) => Ok(args),
        Err(Error::OutOfMemory) => Err(FilterResult::NeedMemory),
        Err(e) => Err(reply_error(conn, msg, &e.to_dbus_error())),
    }
}

fn find_export<'a>(
    exports: &'a [Rc<Export>],
    interface: &str,
) -> std::result::Result<&'a Rc<Export>, DbusError> {
    exports
        .iter()
        .find(|e| e.interface.name == interface)
        .ok_or_else(|| {
            DbusError::new(
                ERR_UNKNOWN_INTERFACE,
                format!("interface {} is not exported here", interface),
            )
        })
}

fn find_property<'a>(
    export: &'a Export,
    interface: &str,
    name: &str,
) -> std::result::Result<&'a Property, DbusError> {
    export.interface.find_property(name).ok_or_else(|| {
        DbusError::new(
            ERR_UNKNOWN_PROPERTY,
            format!("no property {} on {}", name, interface),
        )
    })
}

/// Read one property through its registered getter, checking the value
/// against the declared type before it goes out.
fn read_property(
    conn: &Rc<Connection>,
    export: &Export,
    property: &Property,
) -> std::result::Result<Value, Error> {
    if !property.access.readable() {
        return Err(Error::Dbus(DbusError::new(
            ERR_INVALID_ARGS,
            format!("property {} is not readable", property.name),
        )));
    }
    let value = match export.get_property(conn, &property.name) {
        Some(result) => result?,
        None => {
            return Err(Error::Dbus(DbusError::new(
                ERR_FAILED,
                format!("property {} has no getter", property.name),
            )))
        }
    };
    if !value.matches(&property.ty) {
        return Err(Error::Dbus(DbusError::new(
            ERR_FAILED,
            format!(
                "getter for {} produced a {} value, declared {}",
                property.name,
                value.type_of().signature(),
                property.ty.signature()
            ),
        )));
    }
    Ok(value)
}

fn get(conn: &Rc<Connection>, exports: &[Rc<Export>], msg: &Message) -> FilterResult {
    let args = match call_args(conn, msg, &get_in()) {
        Ok(args) => args,
        Err(result) => return result,
    };
    // Demarshaling against (ss) guarantees both are strings.
    let interface = args[0].as_str().unwrap_or_default().to_owned();
    let name = args[1].as_str().unwrap_or_default().to_owned();

    let looked_up = find_export(exports, &interface)
        .and_then(|export| Ok((export, find_property(export, &interface, &name)?)));
    let (export, property) = match looked_up {
        Ok(found) => found,
        Err(error) => return reply_error(conn, msg, &error),
    };

    match read_property(conn, export, property) {
        Ok(value) => {
            trace!("Get {}.{} served", interface, name);
            reply_return(conn, msg, &[Value::variant(value)], &[Type::Variant])
        }
        Err(Error::OutOfMemory) => FilterResult::NeedMemory,
        Err(e) => reply_error(conn, msg, &e.to_dbus_error()),
    }
}

fn set(conn: &Rc<Connection>, exports: &[Rc<Export>], msg: &Message) -> FilterResult {
    let mut args = match call_args(conn, msg, &set_in()) {
        Ok(args) => args,
        Err(result) => return result,
    };
    let value = match args.pop() {
        Some(Value::Variant(inner)) => *inner,
        _ => unreachable!("demarshaled against (ssv)"),
    };
    let interface = args[0].as_str().unwrap_or_default().to_owned();
    let name = args[1].as_str().unwrap_or_default().to_owned();

    let looked_up = find_export(exports, &interface)
        .and_then(|export| Ok((export, find_property(export, &interface, &name)?)));
    let (export, property) = match looked_up {
        Ok(found) => found,
        Err(error) => return reply_error(conn, msg, &error),
    };

    if !property.access.writable() {
        let error = DbusError::new(
            ERR_PROPERTY_READ_ONLY,
            format!("property {} is read-only", name),
        );
        return reply_error(conn, msg, &error);
    }
    if !value.matches(&property.ty) {
        let error = DbusError::new(
            ERR_INVALID_ARGS,
            format!(
                "property {} takes {}, got {}",
                name,
                property.ty.signature(),
                value.type_of().signature()
            ),
        );
        return reply_error(conn, msg, &error);
    }

    match export.set_property(conn, &name, value) {
        Some(Ok(())) => reply_return(conn, msg, &[], &[]),
        Some(Err(Error::OutOfMemory)) => FilterResult::NeedMemory,
        Some(Err(e)) => reply_error(conn, msg, &e.to_dbus_error()),
        None => {
            let error = DbusError::new(ERR_FAILED, format!("property {} has no setter", name));
            reply_error(conn, msg, &error)
        }
    }
}

/// Aggregate every readable property of one interface. The first getter
/// failure aborts the whole call with that error.
fn get_all(conn: &Rc<Connection>, exports: &[Rc<Export>], msg: &Message) -> FilterResult {
    let args = match call_args(conn, msg, &getall_in()) {
        Ok(args) => args,
        Err(result) => return result,
    };
    let interface = args[0].as_str().unwrap_or_default().to_owned();

    let export = match find_export(exports, &interface) {
        Ok(export) => export,
        Err(error) => return reply_error(conn, msg, &error),
    };

    let entry_type = Type::Struct(vec![Type::Str, Type::Variant]);
    let mut entries = Array::new(entry_type);
    for property in export.interface.properties() {
        if !property.access.readable() {
            continue;
        }
        let value = match read_property(conn, export, property) {
            Ok(value) => value,
            Err(Error::OutOfMemory) => return FilterResult::NeedMemory,
            Err(e) => return reply_error(conn, msg, &e.to_dbus_error()),
        };
        let entry = Value::Struct(vec![
            Value::Str(property.name.clone()),
            Value::variant(value),
        ]);
        if let Err(e) = entries.push(entry) {
            return reply_error(conn, msg, &e.to_dbus_error());
        }
    }

    reply_return(
        conn,
        msg,
        &[Value::Array(entries)],
        &[property_dict_type()],
    )
}
