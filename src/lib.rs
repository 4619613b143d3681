//! Typed method-call, signal and property messaging over the DBus wire
//! format.
//!
//! This crate sits between an application and a DBus client transport.
//! The transport owns the socket, authentication and header framing;
//! this crate owns everything typed above it: the [`signature`] type
//! model, marshaling and demarshaling of message bodies, and the four
//! messaging surfaces built on top of a [`Connection`]:
//!
//! * [`ObjectServer`] exports objects and dispatches inbound method
//!   calls against their [`Interface`] descriptors, including the
//!   org.freedesktop.DBus.Properties surface.
//! * [`Proxy`] invokes methods on remote objects, blocking or
//!   asynchronously with a [`Completion`], and reads and writes remote
//!   properties.
//! * [`SignalSubscription`] and [`signal::emit`] receive and send
//!   broadcast signals.
//! * [`NameTracker`] follows which connection owns a well-known bus
//!   name, so subscriptions can pin themselves to whoever that
//!   currently is.
//!
//! Everything is checked against interface descriptors before it
//! touches the wire, and everything demarshaled is checked again on
//! the way in; a peer can never hand the application a value of an
//! unexpected type.
//!
//! The whole engine is single-threaded and cooperative. One thread
//! drives [`Connection::dispatch`] with inbound messages; handlers,
//! completions and subscriptions all run from there.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod interface;
pub mod message;
pub mod name_tracker;
pub mod properties;
pub mod proxy;
pub mod signal;
pub mod signature;
pub mod transport;
pub mod value;

mod align;
mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connection, Filter, FilterId, ReplyCallback};
pub use dispatch::{InterfaceHandlers, MethodHandler, ObjectServer, PropertyGetter, PropertySetter};
pub use error::{DbusError, Error, Result};
pub use interface::{Access, Arg, Direction, Interface, InterfaceRegistry, Method, Property, Signal};
pub use message::{Endian, Message, MessageHandle, MessageKind};
pub use name_tracker::{NameTracker, OwnerChangeHandler};
pub use properties::PROPERTIES_INTERFACE;
pub use proxy::{CallHandle, Completion, Proxy};
pub use signal::{SenderFilter, SignalHandler, SignalSubscription};
pub use signature::{signature_of, ArrayRepr, Type};
pub use transport::{FilterResult, Timeout, Transport};
pub use value::{signature_of_values, Array, Value};
