use std::collections::TryReserveError;
use std::fmt;
use std::str::Utf8Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Standard DBus error names used by the dispatch and property layers.
pub const ERR_FAILED: &str = "org.freedesktop.DBus.Error.Failed";
pub const ERR_NO_MEMORY: &str = "org.freedesktop.DBus.Error.NoMemory";
pub const ERR_INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
pub const ERR_NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
pub const ERR_DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
pub const ERR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const ERR_UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
pub const ERR_UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
pub const ERR_PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";

/// A named DBus error with a human-readable message.
///
/// This is the shape every remote failure takes: declared application
/// errors, converted transport failures and invalid-argument replies all
/// arrive as a name plus message.
#[derive(Clone, Debug, PartialEq)]
pub struct DbusError {
    pub name: String,
    pub message: String,
}

impl DbusError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ERR_FAILED, message)
    }
}

impl fmt::Display for DbusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Allocation failure. Always distinguished from protocol errors so
    /// callers can defer and retry instead of rejecting the message.
    #[error("out of memory")]
    OutOfMemory,

    #[error("connection is closed")]
    Disconnected,

    /// A structured DBus error, either raised by a handler or received
    /// as an error-typed reply.
    #[error("{0}")]
    Dbus(DbusError),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unrecognized signature character 0x{0:02x}")]
    UnrecognizedTypeCode(u8),
    #[error("unsupported signature character 0x{0:02x}")]
    UnsupportedTypeCode(u8),
    #[error("mismatched signature bracketing at index {0}")]
    MismatchedBracketing(usize),
    #[error("signature exhausted")]
    SignatureExhausted,
    #[error("signature of {0} bytes exceeds the 255 byte limit")]
    SignatureTooLong(usize),
    #[error("signature nesting exceeds the depth limit")]
    SignatureTooDeep,
    #[error("struct type must have at least one field")]
    EmptyStruct,

    #[error("read of {wanted} bytes at index {ix} runs past the end of the body")]
    ShortRead { wanted: usize, ix: usize },
    #[error("size computation overflowed")]
    LengthOverflow,
    #[error("array of {0} bytes exceeds the wire limit")]
    ArrayTooLong(u32),
    #[error("array element at index {ix} runs past the array end {end}")]
    ArrayOverrun { ix: usize, end: usize },
    #[error("{0} bytes of body left over after the last argument")]
    TrailingBody(usize),
    #[error("boolean wire value {0} is neither 0 nor 1")]
    InvalidBool(u32),
    #[error("string is not nul terminated")]
    MissingNul,
    #[error("string is not valid utf-8")]
    Utf8,
    #[error("type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch { expected: String, found: String },
    #[error("argument count mismatch: declared {expected}, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("no method '{0}' in the interface description")]
    NoSuchMethod(String),
    #[error("no signal '{0}' in the interface description")]
    NoSuchSignal(String),
    #[error("no property '{0}' in the interface description")]
    NoSuchProperty(String),
}

impl Error {
    /// True for errors caused by malformed or mismatched wire data.
    /// Out-of-memory, disconnection and structured DBus errors are not
    /// protocol errors.
    pub fn is_protocol(&self) -> bool {
        !matches!(
            self,
            Error::OutOfMemory
                | Error::Disconnected
                | Error::Dbus(_)
                | Error::NoSuchMethod(_)
                | Error::NoSuchSignal(_)
                | Error::NoSuchProperty(_)
        )
    }

    /// Convert into the named error that a reply carrying this failure
    /// would use.
    pub fn to_dbus_error(&self) -> DbusError {
        match self {
            Error::OutOfMemory => DbusError::new(ERR_NO_MEMORY, "out of memory"),
            Error::Disconnected => DbusError::new(ERR_DISCONNECTED, "connection is closed"),
            Error::Dbus(e) => e.clone(),
            other => DbusError::new(ERR_INVALID_ARGS, other.to_string()),
        }
    }
}

impl From<DbusError> for Error {
    fn from(e: DbusError) -> Self {
        Error::Dbus(e)
    }
}

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Error::Utf8
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::OutOfMemory
    }
}
