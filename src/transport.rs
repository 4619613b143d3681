//! The contract this engine requires from a DBus client transport.
//!
//! Socket handling, authentication and header framing live behind this
//! trait; the engine only ever sees whole [`Message`]s. Implementations
//! are driven from a single thread together with the connection that
//! owns them.

use crate::error::Result;
use crate::message::Message;

/// Reply-wait policy for blocking calls and reply-expecting sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// The transport's own default.
    Default,
    /// Wait forever.
    Never,
    Millis(u32),
}

/// Outcome of offering one inbound message to a filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterResult {
    /// The message was consumed; no later filter sees it.
    Handled,
    /// Not for this filter; keep offering it.
    NotYetHandled,
    /// The filter ran out of memory before consuming the message. The
    /// message must be kept and offered again.
    NeedMemory,
}

pub trait Transport {
    /// Send one framed message. The serial has already been assigned.
    fn send(&mut self, msg: &Message) -> Result<()>;

    /// Send a call whose reply will be routed back through the inbound
    /// path. A transport with timer support reports expiry by delivering
    /// a synthesized `NoReply` error message; one without may ignore the
    /// hint.
    fn send_expecting_reply(&mut self, msg: &Message, _timeout: Timeout) -> Result<()> {
        self.send(msg)
    }

    /// Send a call and block the calling thread until its reply, an
    /// error reply, or timeout.
    fn call_blocking(&mut self, msg: &Message, timeout: Timeout) -> Result<Message>;

    /// Ask the bus to deliver messages matching `rule`.
    fn add_match(&mut self, rule: &str) -> Result<()>;

    fn remove_match(&mut self, rule: &str) -> Result<()>;

    /// Synchronously query the unique connection currently owning a bus
    /// name. `None` means the name has no owner, which is not an error.
    fn name_owner(&mut self, name: &str) -> Result<Option<String>>;

    fn connected(&self) -> bool;
}
