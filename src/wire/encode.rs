use std::convert::TryFrom;

use byteorder::ByteOrder;

use super::body::BodyBuf;
use crate::error::{Error, Result};
use crate::signature::{Type, MAX_SIGNATURE_LEN};
use crate::value::Value;

/// Marshal an argument list against its declared types.
///
/// The list must match the declared arity exactly; each value must match
/// its type with no coercion.
pub(crate) fn encode_body<B: ByteOrder>(values: &[Value], types: &[Type]) -> Result<Vec<u8>> {
    if values.len() != types.len() {
        return Err(Error::ArityMismatch {
            expected: types.len(),
            found: values.len(),
        });
    }
    let mut buf = BodyBuf::new();
    for (value, ty) in values.iter().zip(types) {
        encode_value::<B>(&mut buf, value, ty)?;
    }
    Ok(buf.into_bytes())
}

fn mismatch(ty: &Type, value: &Value) -> Error {
    Error::TypeMismatch {
        expected: ty.signature(),
        found: value.type_of().signature(),
    }
}

/// Recursive encode of one value against one type.
///
/// Containers are transactional: any failure after a container opens
/// abandons it, truncating the cursor back to the byte before the
/// container (alignment padding included) before the error propagates.
pub(crate) fn encode_value<B: ByteOrder>(
    buf: &mut BodyBuf,
    value: &Value,
    ty: &Type,
) -> Result<()> {
    match (value, ty) {
        (Value::Byte(v), Type::Byte) => buf.push_bytes(&[*v]),
        (Value::Bool(v), Type::Bool) => write_u32::<B>(buf, *v as u32),
        (Value::Int16(v), Type::Int16) => {
            buf.pad_to(2)?;
            let mut raw = [0u8; 2];
            B::write_i16(&mut raw, *v);
            buf.push_bytes(&raw)
        }
        (Value::UInt16(v), Type::UInt16) => {
            buf.pad_to(2)?;
            let mut raw = [0u8; 2];
            B::write_u16(&mut raw, *v);
            buf.push_bytes(&raw)
        }
        (Value::Int32(v), Type::Int32) => write_u32::<B>(buf, *v as u32),
        (Value::UInt32(v), Type::UInt32) => write_u32::<B>(buf, *v),
        (Value::Int64(v), Type::Int64) => write_u64::<B>(buf, *v as u64),
        (Value::UInt64(v), Type::UInt64) => write_u64::<B>(buf, *v),
        (Value::Double(v), Type::Double) => write_u64::<B>(buf, v.to_bits()),
        (Value::Str(s), Type::Str) | (Value::ObjectPath(s), Type::ObjectPath) => {
            write_string::<B>(buf, s)
        }
        (Value::Signature(s), Type::Signature) => write_signature(buf, s),
        (Value::Array(array), Type::Array(element)) => {
            if array.element() != &**element {
                return Err(mismatch(ty, value));
            }
            let rewind = buf.mark();
            let result = (|| {
                let mark = buf.open_array(element.alignment())?;
                for item in array.items() {
                    encode_value::<B>(buf, item, element)?;
                }
                buf.close_array::<B>(mark)
            })();
            if let Err(e) = result {
                buf.abandon(rewind);
                return Err(e);
            }
            Ok(())
        }
        (Value::Struct(fields), Type::Struct(field_types)) => {
            if fields.len() != field_types.len() {
                return Err(mismatch(ty, value));
            }
            let rewind = buf.mark();
            let result = (|| {
                buf.pad_to(8)?;
                for (field, field_ty) in fields.iter().zip(field_types) {
                    encode_value::<B>(buf, field, field_ty)?;
                }
                Ok(())
            })();
            if let Err(e) = result {
                buf.abandon(rewind);
                return Err(e);
            }
            Ok(())
        }
        (Value::Variant(inner), Type::Variant) => {
            let inner_ty = inner.type_of();
            let rewind = buf.mark();
            let result = (|| {
                write_signature(buf, &inner_ty.signature())?;
                encode_value::<B>(buf, inner, &inner_ty)
            })();
            if let Err(e) = result {
                buf.abandon(rewind);
                return Err(e);
            }
            Ok(())
        }
        (value, ty) => Err(mismatch(ty, value)),
    }
}

fn write_u32<B: ByteOrder>(buf: &mut BodyBuf, v: u32) -> Result<()> {
    buf.pad_to(4)?;
    let mut raw = [0u8; 4];
    B::write_u32(&mut raw, v);
    buf.push_bytes(&raw)
}

fn write_u64<B: ByteOrder>(buf: &mut BodyBuf, v: u64) -> Result<()> {
    buf.pad_to(8)?;
    let mut raw = [0u8; 8];
    B::write_u64(&mut raw, v);
    buf.push_bytes(&raw)
}

/// A string's u32 length word. Anything past u32::MAX bytes cannot be
/// represented on the wire at all.
fn length_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::LengthOverflow)
}

fn write_string<B: ByteOrder>(buf: &mut BodyBuf, s: &str) -> Result<()> {
    write_u32::<B>(buf, length_field(s.len())?)?;
    buf.push_bytes(s.as_bytes())?;
    buf.push_bytes(&[0])
}

/// Signatures carry a one-byte length and are 1-aligned.
fn write_signature(buf: &mut BodyBuf, s: &str) -> Result<()> {
    if s.len() > MAX_SIGNATURE_LEN {
        return Err(Error::SignatureTooLong(s.len()));
    }
    buf.push_bytes(&[s.len() as u8])?;
    buf.push_bytes(s.as_bytes())?;
    buf.push_bytes(&[0])
}
