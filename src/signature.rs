//! The DBus type model.
//!
//! A [`Type`] is the parsed tree form of a DBus signature: twelve basic
//! kinds plus arrays, structs and the self-describing variant. Interface
//! descriptions share `Type` values across every method, signal and
//! property that uses them; the codec walks the tree recursively.
//!
//! The dictionary shape has no variant of its own: `a{kv}` parses to
//! `Array(Struct([k, v]))` and renders back in the canonical
//! parenthesized form. Dict entries and structs align and marshal
//! identically on the wire.

use crate::error::{Error, Result};

/// DBus limits signatures to 255 bytes (the wire length field is one byte).
pub const MAX_SIGNATURE_LEN: usize = 255;

/// Combined array/struct nesting limit.
const MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    Str,
    ObjectPath,
    Signature,
    Array(Box<Type>),
    Struct(Vec<Type>),
    Variant,
}

/// How a native sequence presents its length to the encoder, decided at
/// `Type` construction time from the element type.
///
/// Element types with a natural "absent" sentinel (the string-like kinds)
/// are `NullTerminated`; fixed-width kinds have no sentinel and carry an
/// explicit count. With `Vec`-backed values both strategies produce the
/// same wire bytes; the policy governs the slice-conversion helpers in
/// [`crate::value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayRepr {
    NullTerminated,
    ExplicitLength,
}

impl ArrayRepr {
    pub fn for_element(element: &Type) -> ArrayRepr {
        match element {
            Type::Str | Type::ObjectPath | Type::Signature => ArrayRepr::NullTerminated,
            _ => ArrayRepr::ExplicitLength,
        }
    }
}

impl Type {
    /// Construct an array type. The representation policy is fixed here,
    /// not inferred later.
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Construct a struct type. Structs must have at least one field.
    pub fn structure(fields: Vec<Type>) -> Result<Type> {
        if fields.is_empty() {
            return Err(Error::EmptyStruct);
        }
        Ok(Type::Struct(fields))
    }

    /// The conventional dict shape: an array of key/value pairs.
    pub fn dict(key: Type, value: Type) -> Type {
        Type::Array(Box::new(Type::Struct(vec![key, value])))
    }

    pub fn is_basic(&self) -> bool {
        !matches!(self, Type::Array(_) | Type::Struct(_) | Type::Variant)
    }

    pub fn array_repr(&self) -> Option<ArrayRepr> {
        match self {
            Type::Array(element) => Some(ArrayRepr::for_element(element)),
            _ => None,
        }
    }

    /// Wire alignment of this type's first byte.
    pub fn alignment(&self) -> usize {
        match self {
            Type::Byte => 1,
            Type::Bool => 4,
            Type::Int16 | Type::UInt16 => 2,
            Type::Int32 | Type::UInt32 => 4,
            Type::Int64 | Type::UInt64 | Type::Double => 8,
            Type::Str | Type::ObjectPath => 4,
            Type::Signature => 1,
            Type::Array(_) => 4,
            Type::Struct(_) => 8,
            Type::Variant => 1,
        }
    }

    /// Render this single complete type as a signature string.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Type::Byte => out.push('y'),
            Type::Bool => out.push('b'),
            Type::Int16 => out.push('n'),
            Type::UInt16 => out.push('q'),
            Type::Int32 => out.push('i'),
            Type::UInt32 => out.push('u'),
            Type::Int64 => out.push('x'),
            Type::UInt64 => out.push('t'),
            Type::Double => out.push('d'),
            Type::Str => out.push('s'),
            Type::ObjectPath => out.push('o'),
            Type::Signature => out.push('g'),
            Type::Array(element) => {
                out.push('a');
                element.render_into(out);
            }
            Type::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.render_into(out);
                }
                out.push(')');
            }
            Type::Variant => out.push('v'),
        }
    }

    /// Parse a signature holding exactly one complete type.
    pub fn parse_single(sig: &str) -> Result<Type> {
        let mut types = Type::parse(sig)?;
        if types.len() != 1 {
            return Err(Error::ArityMismatch {
                expected: 1,
                found: types.len(),
            });
        }
        Ok(types.remove(0))
    }

    /// Parse a signature into its sequence of complete types.
    pub fn parse(sig: &str) -> Result<Vec<Type>> {
        if sig.len() > MAX_SIGNATURE_LEN {
            return Err(Error::SignatureTooLong(sig.len()));
        }
        let mut parser = Parser {
            sig: sig.as_bytes(),
            ix: 0,
        };
        let mut types = Vec::new();
        while parser.ix < parser.sig.len() {
            types.push(parser.next_type(0)?);
        }
        Ok(types)
    }
}

/// Render a full argument list as one signature string.
pub fn signature_of(types: &[Type]) -> String {
    let mut out = String::new();
    for ty in types {
        ty.render_into(&mut out);
    }
    out
}

struct Parser<'a> {
    sig: &'a [u8],
    ix: usize,
}

impl<'a> Parser<'a> {
    fn next_type(&mut self, depth: usize) -> Result<Type> {
        if depth > MAX_DEPTH {
            return Err(Error::SignatureTooDeep);
        }
        let start = self.ix;
        let code = *self.sig.get(self.ix).ok_or(Error::SignatureExhausted)?;
        self.ix += 1;
        match code {
            b'y' => Ok(Type::Byte),
            b'b' => Ok(Type::Bool),
            b'n' => Ok(Type::Int16),
            b'q' => Ok(Type::UInt16),
            b'i' => Ok(Type::Int32),
            b'u' => Ok(Type::UInt32),
            b'x' => Ok(Type::Int64),
            b't' => Ok(Type::UInt64),
            b'd' => Ok(Type::Double),
            b's' => Ok(Type::Str),
            b'o' => Ok(Type::ObjectPath),
            b'g' => Ok(Type::Signature),
            b'v' => Ok(Type::Variant),
            b'a' => Ok(Type::Array(Box::new(self.next_type(depth + 1)?))),
            b'(' => {
                let mut fields = Vec::new();
                loop {
                    match self.sig.get(self.ix) {
                        None => return Err(Error::MismatchedBracketing(start)),
                        Some(b')') => {
                            self.ix += 1;
                            break;
                        }
                        Some(_) => fields.push(self.next_type(depth + 1)?),
                    }
                }
                if fields.is_empty() {
                    return Err(Error::EmptyStruct);
                }
                Ok(Type::Struct(fields))
            }
            // Dict entries normalize to two-field structs.
            b'{' => {
                let key = self.next_type(depth + 1)?;
                let value = self.next_type(depth + 1)?;
                match self.sig.get(self.ix) {
                    Some(b'}') => self.ix += 1,
                    _ => return Err(Error::MismatchedBracketing(start)),
                }
                Ok(Type::Struct(vec![key, value]))
            }
            b')' | b'}' => Err(Error::MismatchedBracketing(start)),
            b'h' => Err(Error::UnsupportedTypeCode(code)), // UNIX_FD
            other => Err(Error::UnrecognizedTypeCode(other)),
        }
    }
}
