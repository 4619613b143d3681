//! Client-side invocation against a remote object.
//!
//! A [`Proxy`] binds a destination name, an object path and an
//! interface descriptor. Calls are checked against the descriptor
//! before anything touches the wire, so type errors surface locally
//! with the member name rather than as a peer's InvalidArgs reply.

use std::rc::Rc;

use log::trace;

use crate::connection::Connection;
use crate::error::{DbusError, Error, Result};
use crate::interface::Interface;
use crate::message::{Message, MessageKind};
use crate::properties::PROPERTIES_INTERFACE;
use crate::signature::Type;
use crate::transport::Timeout;
use crate::value::Value;

/// The pair of continuations finishing one asynchronous call. Exactly
/// one of them runs, once, when the reply or error arrives.
pub struct Completion {
    on_success: Box<dyn FnOnce(&Rc<Connection>, Vec<Value>)>,
    on_error: Box<dyn FnOnce(&Rc<Connection>, DbusError)>,
}

impl Completion {
    pub fn new(
        on_success: impl FnOnce(&Rc<Connection>, Vec<Value>) + 'static,
        on_error: impl FnOnce(&Rc<Connection>, DbusError) + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        }
    }
}

/// An asynchronous call in flight. Dropping the handle cancels the
/// call: its reply, if it still arrives, is discarded. [`detach`]
/// leaves the call running to completion unobserved by the handle.
///
/// [`detach`]: CallHandle::detach
pub struct CallHandle {
    connection: Rc<Connection>,
    serial: u32,
    detached: bool,
}

impl CallHandle {
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Cancel now. Returns whether the call was still outstanding.
    pub fn cancel(mut self) -> bool {
        self.detached = true;
        self.connection.cancel_pending(self.serial)
    }

    /// Let the call run to completion even after this handle is gone.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.connection.cancel_pending(self.serial);
        }
    }
}

pub struct Proxy {
    connection: Rc<Connection>,
    destination: String,
    path: String,
    interface: Rc<Interface>,
}

impl Proxy {
    pub fn new(
        connection: &Rc<Connection>,
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: Rc<Interface>,
    ) -> Self {
        Self {
            connection: Rc::clone(connection),
            destination: destination.into(),
            path: path.into(),
            interface,
        }
    }

    pub fn connection(&self) -> &Rc<Connection> {
        &self.connection
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interface(&self) -> &Rc<Interface> {
        &self.interface
    }

    /// Marshal a call to `method`, checked against the descriptor.
    fn build_call(&self, method: &str, args: &[Value]) -> Result<(Message, Vec<Type>)> {
        let descriptor = self
            .interface
            .find_method(method)
            .ok_or_else(|| Error::NoSuchMethod(method.to_owned()))?;
        let mut msg = Message::method_call(
            Some(&self.destination),
            &self.path,
            &self.interface.name,
            method,
        );
        msg.set_args(args, &descriptor.in_types())?;
        Ok((msg, descriptor.out_types()))
    }

    /// Call `method` and block for its reply, demarshaled against the
    /// declared output arguments. An error reply comes back as
    /// [`Error::Dbus`].
    pub fn call(&self, method: &str, args: &[Value], timeout: Timeout) -> Result<Vec<Value>> {
        let (msg, out_types) = self.build_call(method, args)?;
        let reply = self.connection.call_blocking(msg, timeout)?;
        if reply.kind == MessageKind::Error {
            return Err(Error::Dbus(reply.to_dbus_error()));
        }
        reply.args(&out_types)
    }

    /// Call `method` asynchronously. The completion runs from the
    /// connection's dispatch when the reply arrives; the returned handle
    /// cancels the call if dropped first.
    pub fn call_with_reply(
        &self,
        method: &str,
        args: &[Value],
        completion: Completion,
        timeout: Timeout,
    ) -> Result<CallHandle> {
        let (msg, out_types) = self.build_call(method, args)?;
        let member = method.to_owned();
        let serial = self.connection.send_with_reply(
            msg,
            timeout,
            Box::new(move |conn, reply| {
                if reply.kind == MessageKind::Error {
                    (completion.on_error)(conn, reply.to_dbus_error());
                    return;
                }
                match reply.args(&out_types) {
                    Ok(values) => (completion.on_success)(conn, values),
                    // A peer answering with the wrong types is reported
                    // through the same error path as a named error.
                    Err(e) => {
                        trace!("reply to {} had a bad body: {}", member, e);
                        (completion.on_error)(conn, e.to_dbus_error());
                    }
                }
            }),
        )?;
        Ok(CallHandle {
            connection: Rc::clone(&self.connection),
            serial,
            detached: false,
        })
    }

    /// Fire-and-forget call: the peer is told not to reply at all.
    pub fn call_no_reply(&self, method: &str, args: &[Value]) -> Result<()> {
        let (mut msg, _) = self.build_call(method, args)?;
        msg.no_reply = true;
        self.connection.send(msg)?;
        Ok(())
    }

    fn property_type(&self, name: &str) -> Result<Type> {
        self.interface
            .find_property(name)
            .map(|p| p.ty.clone())
            .ok_or_else(|| Error::NoSuchProperty(name.to_owned()))
    }

    /// Read a remote property through org.freedesktop.DBus.Properties,
    /// unwrapping the variant and checking the declared type.
    pub fn get_property(&self, name: &str, timeout: Timeout) -> Result<Value> {
        let ty = self.property_type(name)?;
        let mut msg =
            Message::method_call(Some(&self.destination), &self.path, PROPERTIES_INTERFACE, "Get");
        msg.set_args(
            &[
                Value::Str(self.interface.name.clone()),
                Value::Str(name.to_owned()),
            ],
            &[Type::Str, Type::Str],
        )?;
        let reply = self.connection.call_blocking(msg, timeout)?;
        if reply.kind == MessageKind::Error {
            return Err(Error::Dbus(reply.to_dbus_error()));
        }
        let mut values = reply.args(&[Type::Variant])?;
        let value = match values.pop() {
            Some(Value::Variant(inner)) => *inner,
            _ => return Err(Error::ArityMismatch { expected: 1, found: 0 }),
        };
        if !value.matches(&ty) {
            return Err(Error::TypeMismatch {
                expected: ty.signature(),
                found: value.type_of().signature(),
            });
        }
        Ok(value)
    }

    /// Write a remote property, checked against the declared type
    /// before the call goes out.
    pub fn set_property(&self, name: &str, value: Value, timeout: Timeout) -> Result<()> {
        let ty = self.property_type(name)?;
        if !value.matches(&ty) {
            return Err(Error::TypeMismatch {
                expected: ty.signature(),
                found: value.type_of().signature(),
            });
        }
        let mut msg =
            Message::method_call(Some(&self.destination), &self.path, PROPERTIES_INTERFACE, "Set");
        msg.set_args(
            &[
                Value::Str(self.interface.name.clone()),
                Value::Str(name.to_owned()),
                Value::variant(value),
            ],
            &[Type::Str, Type::Str, Type::Variant],
        )?;
        let reply = self.connection.call_blocking(msg, timeout)?;
        if reply.kind == MessageKind::Error {
            return Err(Error::Dbus(reply.to_dbus_error()));
        }
        Ok(())
    }

    /// Read every property of the interface in one call, as (name,
    /// value) pairs in the order the peer sent them.
    pub fn get_all_properties(&self, timeout: Timeout) -> Result<Vec<(String, Value)>> {
        let mut msg = Message::method_call(
            Some(&self.destination),
            &self.path,
            PROPERTIES_INTERFACE,
            "GetAll",
        );
        msg.set_args(&[Value::Str(self.interface.name.clone())], &[Type::Str])?;
        let reply = self.connection.call_blocking(msg, timeout)?;
        if reply.kind == MessageKind::Error {
            return Err(Error::Dbus(reply.to_dbus_error()));
        }
        let dict_type = Type::dict(Type::Str, Type::Variant);
        let mut values = reply.args(&[dict_type])?;
        let entries = match values.pop() {
            Some(Value::Array(entries)) => entries,
            _ => return Err(Error::ArityMismatch { expected: 1, found: 0 }),
        };
        let mut out = Vec::new();
        out.try_reserve(entries.len())?;
        for entry in entries.into_items() {
            // Demarshaling against a(sv) guarantees the entry shape.
            if let Value::Struct(mut fields) = entry {
                let value = match fields.pop() {
                    Some(Value::Variant(inner)) => *inner,
                    _ => continue,
                };
                let name = match fields.pop() {
                    Some(Value::Str(name)) => name,
                    _ => continue,
                };
                out.push((name, value));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::interface::{Access, Method, Property};
    use crate::testing::ScriptedTransport;
    use test_log::test;

    use std::cell::RefCell;

    fn resolver_interface() -> Rc<Interface> {
        Rc::new(
            Interface::new("com.example.Resolver")
                .method(
                    Method::new("Lookup")
                        .arg_in("id", Type::UInt32)
                        .arg_out("name", Type::Str),
                )
                .method(Method::new("Flush"))
                .property(Property::new("Size", Type::UInt32, Access::Read))
                .property(Property::new("Label", Type::Str, Access::ReadWrite)),
        )
    }

    fn proxy_over(transport: ScriptedTransport) -> (Proxy, Rc<Connection>) {
        let conn = Connection::new(Box::new(transport));
        let proxy = Proxy::new(
            &conn,
            "com.example.Resolver",
            "/com/example/r",
            resolver_interface(),
        );
        (proxy, conn)
    }

    #[test]
    fn blocking_call_round_trip() -> Result<()> {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        transport.reply_with(|call| {
            assert_eq!(call.member.as_deref(), Some("Lookup"));
            assert_eq!(call.signature, "u");
            let mut reply = Message::method_return(call);
            reply.set_args(&[Value::Str("entry-9".into())], &[Type::Str])?;
            Ok(reply)
        });
        let (proxy, _conn) = proxy_over(transport);

        let out = proxy.call("Lookup", &[Value::UInt32(9)], Timeout::Default)?;
        assert_eq!(out, vec![Value::Str("entry-9".into())]);

        let sent = sent.borrow();
        assert_eq!(sent[0].destination.as_deref(), Some("com.example.Resolver"));
        assert_eq!(sent[0].path.as_deref(), Some("/com/example/r"));
        Ok(())
    }

    #[test]
    fn error_reply_surfaces_as_dbus_error() {
        let transport = ScriptedTransport::new();
        transport.reply_with(|call| {
            Message::error_reply(
                call,
                &DbusError::new("com.example.Resolver.Error.NotFound", "nope"),
            )
        });
        let (proxy, _conn) = proxy_over(transport);
        let err = proxy
            .call("Lookup", &[Value::UInt32(1)], Timeout::Default)
            .unwrap_err();
        assert_eq!(
            err,
            Error::Dbus(DbusError::new("com.example.Resolver.Error.NotFound", "nope"))
        );
    }

    #[test]
    fn unknown_method_fails_before_sending() {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        let (proxy, _conn) = proxy_over(transport);
        let err = proxy.call("Vanish", &[], Timeout::Default).unwrap_err();
        assert_eq!(err, Error::NoSuchMethod("Vanish".into()));
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn argument_mismatch_fails_before_sending() {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        let (proxy, _conn) = proxy_over(transport);
        let err = proxy
            .call("Lookup", &[Value::Str("seven".into())], Timeout::Default)
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn async_call_completes_on_reply() -> Result<()> {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        let (proxy, conn) = proxy_over(transport);

        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        let handle = proxy.call_with_reply(
            "Lookup",
            &[Value::UInt32(3)],
            Completion::new(
                move |_, values| *g.borrow_mut() = Some(values),
                |_, e| panic!("unexpected error {}", e),
            ),
            Timeout::Default,
        )?;
        handle.detach();

        let call = sent.borrow()[0].clone();
        let mut reply = Message::method_return(&call);
        reply.set_args(&[Value::Str("entry-3".into())], &[Type::Str])?;
        conn.dispatch(&reply);

        assert_eq!(*got.borrow(), Some(vec![Value::Str("entry-3".into())]));
        Ok(())
    }

    #[test]
    fn async_error_reply_runs_the_error_handler() -> Result<()> {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        let (proxy, conn) = proxy_over(transport);

        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        proxy
            .call_with_reply(
                "Lookup",
                &[Value::UInt32(3)],
                Completion::new(
                    |_, _| panic!("unexpected success"),
                    move |_, e| *g.borrow_mut() = Some(e),
                ),
                Timeout::Default,
            )?
            .detach();

        let call = sent.borrow()[0].clone();
        conn.dispatch(&Message::error_reply(&call, &DbusError::failed("down"))?);
        assert_eq!(*got.borrow(), Some(DbusError::failed("down")));
        Ok(())
    }

    #[test]
    fn async_bad_reply_body_runs_the_error_handler() -> Result<()> {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        let (proxy, conn) = proxy_over(transport);

        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        proxy
            .call_with_reply(
                "Lookup",
                &[Value::UInt32(3)],
                Completion::new(
                    |_, _| panic!("unexpected success"),
                    move |_, e| *g.borrow_mut() = Some(e),
                ),
                Timeout::Default,
            )?
            .detach();

        let call = sent.borrow()[0].clone();
        let mut reply = Message::method_return(&call);
        // A u32 where the descriptor declares a string.
        reply.set_args(&[Value::UInt32(1)], &[Type::UInt32])?;
        conn.dispatch(&reply);

        let err = got.borrow().clone().unwrap();
        assert_eq!(err.name, crate::error::ERR_INVALID_ARGS);
        Ok(())
    }

    #[test]
    fn async_and_sync_paths_decode_identically() -> Result<()> {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        transport.reply_with(|call| {
            let mut reply = Message::method_return(call);
            reply.set_args(&[Value::Str("entry-5".into())], &[Type::Str])?;
            Ok(reply)
        });
        let (proxy, conn) = proxy_over(transport);

        let sync_out = proxy.call("Lookup", &[Value::UInt32(5)], Timeout::Default)?;

        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        proxy
            .call_with_reply(
                "Lookup",
                &[Value::UInt32(5)],
                Completion::new(
                    move |_, values| *g.borrow_mut() = Some(values),
                    |_, e| panic!("unexpected error {}", e),
                ),
                Timeout::Default,
            )?
            .detach();
        let call = sent.borrow().last().unwrap().clone();
        let mut reply = Message::method_return(&call);
        reply.set_args(&[Value::Str("entry-5".into())], &[Type::Str])?;
        conn.dispatch(&reply);

        assert_eq!(got.borrow().clone().unwrap(), sync_out);
        Ok(())
    }

    #[test]
    fn dropping_the_handle_cancels_the_call() -> Result<()> {
        let transport = ScriptedTransport::new();
        let (proxy, conn) = proxy_over(transport);

        let handle = proxy.call_with_reply(
            "Flush",
            &[],
            Completion::new(
                |_, _| panic!("completed after cancel"),
                |_, _| panic!("completed after cancel"),
            ),
            Timeout::Default,
        )?;
        assert_eq!(conn.pending_count(), 1);
        drop(handle);
        assert_eq!(conn.pending_count(), 0);
        Ok(())
    }

    #[test]
    fn detached_call_stays_pending() -> Result<()> {
        let transport = ScriptedTransport::new();
        let (proxy, conn) = proxy_over(transport);
        proxy
            .call_with_reply(
                "Flush",
                &[],
                Completion::new(|_, _| {}, |_, _| {}),
                Timeout::Default,
            )?
            .detach();
        assert_eq!(conn.pending_count(), 1);
        Ok(())
    }

    #[test]
    fn explicit_cancel_reports_whether_outstanding() -> Result<()> {
        let transport = ScriptedTransport::new();
        let (proxy, conn) = proxy_over(transport);
        let handle = proxy.call_with_reply(
            "Flush",
            &[],
            Completion::new(|_, _| {}, |_, _| {}),
            Timeout::Default,
        )?;
        let serial = handle.serial();
        assert!(handle.cancel());
        assert!(!conn.cancel_pending(serial));
        Ok(())
    }

    #[test]
    fn no_reply_call_sets_the_flag() -> Result<()> {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        let (proxy, _conn) = proxy_over(transport);
        proxy.call_no_reply("Flush", &[])?;
        let sent = sent.borrow();
        assert!(sent[0].no_reply);
        assert!(!sent[0].wants_reply());
        Ok(())
    }

    #[test]
    fn get_property_unwraps_and_checks_the_variant() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.reply_with(|call| {
            assert_eq!(call.interface.as_deref(), Some(PROPERTIES_INTERFACE));
            assert_eq!(call.signature, "ss");
            let mut reply = Message::method_return(call);
            reply.set_args(
                &[Value::variant(Value::UInt32(512))],
                &[Type::Variant],
            )?;
            Ok(reply)
        });
        let (proxy, _conn) = proxy_over(transport);
        assert_eq!(
            proxy.get_property("Size", Timeout::Default)?,
            Value::UInt32(512)
        );
        Ok(())
    }

    #[test]
    fn get_property_rejects_a_lying_peer() {
        let transport = ScriptedTransport::new();
        transport.reply_with(|call| {
            let mut reply = Message::method_return(call);
            reply.set_args(&[Value::variant(Value::Str("many".into()))], &[Type::Variant])?;
            Ok(reply)
        });
        let (proxy, _conn) = proxy_over(transport);
        let err = proxy.get_property("Size", Timeout::Default).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn set_property_validates_locally() {
        let transport = ScriptedTransport::new();
        let sent = transport.sent();
        let (proxy, _conn) = proxy_over(transport);
        let err = proxy
            .set_property("Label", Value::UInt32(1), Timeout::Default)
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(sent.borrow().is_empty());
    }

    #[test]
    fn get_all_properties_returns_pairs() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.reply_with(|call| {
            let mut reply = Message::method_return(call);
            let dict = Type::dict(Type::Str, Type::Variant);
            let entries = crate::value::Array::from_items(
                Type::Struct(vec![Type::Str, Type::Variant]),
                vec![
                    Value::Struct(vec![
                        Value::Str("Size".into()),
                        Value::variant(Value::UInt32(4)),
                    ]),
                    Value::Struct(vec![
                        Value::Str("Label".into()),
                        Value::variant(Value::Str("main".into())),
                    ]),
                ],
            )?;
            reply.set_args(&[Value::Array(entries)], &[dict])?;
            Ok(reply)
        });
        let (proxy, _conn) = proxy_over(transport);
        let all = proxy.get_all_properties(Timeout::Default)?;
        assert_eq!(
            all,
            vec![
                ("Size".into(), Value::UInt32(4)),
                ("Label".into(), Value::Str("main".into())),
            ]
        );
        Ok(())
    }
}
