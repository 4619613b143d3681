//! Wire messages and the connection-scoped handle wrapped around them.
//!
//! Byte-level framing (header marshaling, socket I/O) belongs to the
//! transport; [`Message`] is the already-framed unit the engine exchanges
//! with it: kind, header fields, flags, endianness and the raw body.

use std::rc::Rc;

use byteorder::{BigEndian, LittleEndian};

use crate::connection::Connection;
use crate::error::{DbusError, Result, ERR_FAILED};
use crate::signature::{signature_of, Type};
use crate::value::Value;
use crate::wire::{decode_body, encode_body};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

/// Per-message byte order. Messages built by this crate are always
/// little-endian; inbound messages decode per their own flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    /// Assigned by the connection when the message is sent.
    pub serial: u32,
    pub reply_serial: Option<u32>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub error_name: Option<String>,
    pub signature: String,
    pub endian: Endian,
    /// The caller does not want any reply, success or error.
    pub no_reply: bool,
    pub body: Vec<u8>,
}

impl Message {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: 0,
            reply_serial: None,
            path: None,
            interface: None,
            member: None,
            destination: None,
            sender: None,
            error_name: None,
            signature: String::new(),
            endian: Endian::Little,
            no_reply: false,
            body: Vec::new(),
        }
    }

    pub fn method_call(
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Self {
        let mut msg = Self::empty(MessageKind::MethodCall);
        msg.destination = destination.map(str::to_owned);
        msg.path = Some(path.to_owned());
        msg.interface = Some(interface.to_owned());
        msg.member = Some(member.to_owned());
        msg
    }

    pub fn signal(path: &str, interface: &str, member: &str) -> Self {
        let mut msg = Self::empty(MessageKind::Signal);
        msg.path = Some(path.to_owned());
        msg.interface = Some(interface.to_owned());
        msg.member = Some(member.to_owned());
        msg
    }

    /// A success reply addressed back to `call`'s sender.
    pub fn method_return(call: &Message) -> Self {
        let mut msg = Self::empty(MessageKind::MethodReturn);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg
    }

    /// An error reply addressed back to `call`'s sender. Error messages
    /// carry their text as a single string argument; marshaling it can
    /// itself fail under memory pressure.
    pub fn error_reply(call: &Message, error: &DbusError) -> Result<Self> {
        let mut msg = Self::empty(MessageKind::Error);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg.error_name = Some(error.name.clone());
        msg.set_args(&[Value::Str(error.message.clone())], &[Type::Str])?;
        Ok(msg)
    }

    /// Replace the body with the marshaled argument list.
    pub fn set_args(&mut self, values: &[Value], types: &[Type]) -> Result<()> {
        self.body = encode_body::<LittleEndian>(values, types)?;
        self.signature = signature_of(types);
        self.endian = Endian::Little;
        Ok(())
    }

    /// Demarshal the body against the declared argument types, honoring
    /// the message's own endianness.
    pub fn args(&self, types: &[Type]) -> Result<Vec<Value>> {
        match self.endian {
            Endian::Little => decode_body::<LittleEndian>(&self.body, &self.signature, types),
            Endian::Big => decode_body::<BigEndian>(&self.body, &self.signature, types),
        }
    }

    pub fn wants_reply(&self) -> bool {
        self.kind == MessageKind::MethodCall && !self.no_reply
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.kind, MessageKind::MethodReturn | MessageKind::Error)
            && self.reply_serial.is_some()
    }

    /// Interpret an error-typed message as a structured error.
    pub fn to_dbus_error(&self) -> DbusError {
        let name = self
            .error_name
            .clone()
            .unwrap_or_else(|| ERR_FAILED.to_owned());
        let message = Type::parse(&self.signature)
            .ok()
            .and_then(|types| self.args(&types).ok())
            .and_then(|values| values.into_iter().next())
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_default();
        DbusError { name, message }
    }
}

/// One inbound message bound to the connection it arrived on.
///
/// Processing a message synchronously borrows the handle; a component
/// that promises a reply after returning keeps an `Rc<MessageHandle>`
/// alive until that reply is sent, and everything is released with it.
pub struct MessageHandle {
    connection: Rc<Connection>,
    message: Message,
}

impl MessageHandle {
    pub fn new(connection: Rc<Connection>, message: Message) -> Self {
        Self {
            connection,
            message,
        }
    }

    pub fn connection(&self) -> &Rc<Connection> {
        &self.connection
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Marshal and send a success reply to this call.
    pub fn send_return(&self, values: &[Value], types: &[Type]) -> Result<()> {
        let mut reply = Message::method_return(&self.message);
        reply.set_args(values, types)?;
        self.connection.send(reply)?;
        Ok(())
    }

    /// Send an error reply to this call.
    pub fn send_error(&self, error: &DbusError) -> Result<()> {
        let reply = Message::error_reply(&self.message, error)?;
        self.connection.send(reply)?;
        Ok(())
    }
}
