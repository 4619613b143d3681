//! Recursive marshaling of [`Value`](crate::value::Value) trees against
//! declared [`Type`](crate::signature::Type)s, generic over byte order.
//!
//! The encode side is transactional per container: a failure anywhere
//! inside an open array, struct or variant abandons the container before
//! the error propagates, so sibling fields already written are never
//! corrupted. The decode side validates every read against the buffer
//! bounds and requires exact exhaustion of the body.

mod body;
pub(crate) mod decode;
pub(crate) mod encode;

pub(crate) use decode::decode_body;
pub(crate) use encode::encode_body;
