use std::str::from_utf8;

use byteorder::ByteOrder;
use log::trace;

use super::body::{BodyReader, MAX_ARRAY_LEN};
use crate::error::{Error, Result};
use crate::signature::Type;
use crate::value::{Array, Value};

/// Variants can nest types the declared signature never mentions, so the
/// decoder carries its own depth guard.
const MAX_DECODE_DEPTH: usize = 64;

/// Demarshal an argument list against its declared types.
///
/// The message's own signature is validated against the declared list
/// first (exact arity and types, dict syntax normalized), then the body
/// is decoded and must be exactly consumed.
pub(crate) fn decode_body<B: ByteOrder>(
    data: &[u8],
    wire_signature: &str,
    types: &[Type],
) -> Result<Vec<Value>> {
    let wire_types = Type::parse(wire_signature)?;
    if wire_types.len() != types.len() {
        return Err(Error::ArityMismatch {
            expected: types.len(),
            found: wire_types.len(),
        });
    }
    for (wire_ty, ty) in wire_types.iter().zip(types) {
        if wire_ty != ty {
            return Err(Error::TypeMismatch {
                expected: ty.signature(),
                found: wire_ty.signature(),
            });
        }
    }

    let mut reader = BodyReader::<B>::new(data);
    let mut values = Vec::new();
    values.try_reserve(types.len())?;
    for ty in types {
        values.push(decode_value(&mut reader, ty, 0)?);
    }
    reader.finish()?;
    Ok(values)
}

/// Recursive decode of one value against one type.
fn decode_value<B: ByteOrder>(
    reader: &mut BodyReader<'_, B>,
    ty: &Type,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_DECODE_DEPTH {
        return Err(Error::SignatureTooDeep);
    }
    match ty {
        Type::Byte => Ok(Value::Byte(reader.read_u8()?)),
        Type::Bool => {
            reader.align_to(4)?;
            let raw = reader.read_u32()?;
            if raw > 1 {
                return Err(Error::InvalidBool(raw));
            }
            Ok(Value::Bool(raw == 1))
        }
        Type::Int16 => {
            reader.align_to(2)?;
            Ok(Value::Int16(reader.read_i16()?))
        }
        Type::UInt16 => {
            reader.align_to(2)?;
            Ok(Value::UInt16(reader.read_u16()?))
        }
        Type::Int32 => {
            reader.align_to(4)?;
            Ok(Value::Int32(reader.read_i32()?))
        }
        Type::UInt32 => {
            reader.align_to(4)?;
            Ok(Value::UInt32(reader.read_u32()?))
        }
        Type::Int64 => {
            reader.align_to(8)?;
            Ok(Value::Int64(reader.read_i64()?))
        }
        Type::UInt64 => {
            reader.align_to(8)?;
            Ok(Value::UInt64(reader.read_u64()?))
        }
        Type::Double => {
            reader.align_to(8)?;
            Ok(Value::Double(reader.read_f64()?))
        }
        Type::Str => Ok(Value::Str(read_string::<B>(reader)?)),
        Type::ObjectPath => Ok(Value::ObjectPath(read_string::<B>(reader)?)),
        Type::Signature => Ok(Value::Signature(read_signature(reader)?)),
        Type::Array(element) => {
            reader.align_to(4)?;
            let byte_len = reader.read_u32()?;
            if byte_len > MAX_ARRAY_LEN {
                return Err(Error::ArrayTooLong(byte_len));
            }
            reader.align_to(element.alignment())?;
            let end = reader
                .ix()
                .checked_add(byte_len as usize)
                .ok_or(Error::LengthOverflow)?;
            if end > reader.total_len() {
                return Err(Error::ShortRead {
                    wanted: byte_len as usize,
                    ix: reader.ix(),
                });
            }
            trace!("array of {} payload bytes, end {}", byte_len, end);
            let mut items = Vec::new();
            while reader.ix() < end {
                items.try_reserve(1)?;
                items.push(decode_value(reader, element, depth + 1)?);
            }
            if reader.ix() != end {
                return Err(Error::ArrayOverrun {
                    ix: reader.ix(),
                    end,
                });
            }
            Ok(Value::Array(Array::from_items_unchecked(
                (**element).clone(),
                items,
            )))
        }
        Type::Struct(field_types) => {
            reader.align_to(8)?;
            let mut fields = Vec::new();
            fields.try_reserve(field_types.len())?;
            for field_ty in field_types {
                fields.push(decode_value(reader, field_ty, depth + 1)?);
            }
            Ok(Value::Struct(fields))
        }
        Type::Variant => {
            let sig = read_signature(reader)?;
            let inner_ty = Type::parse_single(&sig)?;
            trace!("variant carrying '{}'", sig);
            let inner = decode_value(reader, &inner_ty, depth + 1)?;
            Ok(Value::Variant(Box::new(inner)))
        }
    }
}

fn read_string<B: ByteOrder>(reader: &mut BodyReader<'_, B>) -> Result<String> {
    reader.align_to(4)?;
    let len = reader.read_u32()? as usize;
    let raw = reader.read(len.checked_add(1).ok_or(Error::LengthOverflow)?)?;
    if raw[len] != 0 {
        return Err(Error::MissingNul);
    }
    Ok(from_utf8(&raw[..len])?.to_owned())
}

fn read_signature<B: ByteOrder>(reader: &mut BodyReader<'_, B>) -> Result<String> {
    let len = reader.read_u8()? as usize;
    let raw = reader.read(len + 1)?;
    if raw[len] != 0 {
        return Err(Error::MissingNul);
    }
    Ok(from_utf8(&raw[..len])?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::signature_of;
    use crate::wire::encode::encode_body;
    use byteorder::{BigEndian as BE, LittleEndian as LE};
    use test_log::test;

    fn round_trip(values: Vec<Value>) -> Result<()> {
        let types: Vec<Type> = values.iter().map(Value::type_of).collect();
        let sig = signature_of(&types);

        let bytes = encode_body::<LE>(&values, &types)?;
        assert_eq!(decode_body::<LE>(&bytes, &sig, &types)?, values);

        let bytes = encode_body::<BE>(&values, &types)?;
        assert_eq!(decode_body::<BE>(&bytes, &sig, &types)?, values);
        Ok(())
    }

    #[test]
    fn round_trip_basics() -> Result<()> {
        round_trip(vec![
            Value::Byte(0xfe),
            Value::Bool(true),
            Value::Int16(-2),
            Value::UInt16(9),
            Value::Int32(-40_000),
            Value::UInt32(70_000),
            Value::Int64(-1),
            Value::UInt64(u64::MAX),
            Value::Double(3.25),
            Value::Str("hello".into()),
            Value::ObjectPath("/com/example/Thing".into()),
            Value::Signature("a(sv)".into()),
        ])
    }

    #[test]
    fn round_trip_nested_array_of_struct() -> Result<()> {
        let pair = Type::Struct(vec![Type::Str, Type::UInt32]);
        round_trip(vec![Value::Array(Array::from_items(
            pair,
            vec![
                Value::Struct(vec![Value::Str("a".into()), Value::UInt32(1)]),
                Value::Struct(vec![Value::Str("bb".into()), Value::UInt32(2)]),
            ],
        )?)])
    }

    #[test]
    fn round_trip_variant_of_array() -> Result<()> {
        round_trip(vec![Value::variant(Value::Array(Array::of_strings(&[
            "x", "yz",
        ])))])
    }

    #[test]
    fn round_trip_empty_array_keeps_type() -> Result<()> {
        round_trip(vec![Value::Array(Array::new(Type::Struct(vec![
            Type::Str,
            Type::Variant,
        ])))])
    }

    #[test]
    fn decodes_reference_struct_bytes() -> Result<()> {
        let bytes = [
            2u8, 0, 0, 0, 72, 105, 0, 0, 154, 153, 153, 153, 153, 153, 201, 63, 5, 0, 0, 0, 72,
            101, 108, 108, 111, 0, 0, 0, 0, 0, 0, 0, 154, 153, 153, 153, 153, 153, 32, 64,
        ];
        let ty = Type::parse_single("(sd(sd))")?;
        let values = decode_body::<LE>(&bytes, "(sd(sd))", &[ty])?;
        assert_eq!(
            values,
            vec![Value::Struct(vec![
                Value::Str("Hi".into()),
                Value::Double(0.2),
                Value::Struct(vec![Value::Str("Hello".into()), Value::Double(8.3)]),
            ])]
        );
        Ok(())
    }

    #[test]
    fn arity_too_few_and_too_many() -> Result<()> {
        let values = vec![Value::UInt32(1), Value::Str("x".into())];
        let types: Vec<Type> = values.iter().map(Value::type_of).collect();
        let bytes = encode_body::<LE>(&values, &types)?;

        // Declared fewer arguments than the wire carries.
        assert_eq!(
            decode_body::<LE>(&bytes, "us", &[Type::UInt32]),
            Err(Error::ArityMismatch {
                expected: 1,
                found: 2
            })
        );
        // Declared more.
        assert_eq!(
            decode_body::<LE>(&bytes, "us", &[Type::UInt32, Type::Str, Type::Byte]),
            Err(Error::ArityMismatch {
                expected: 3,
                found: 2
            })
        );
        // Same arity, wrong type.
        assert!(matches!(
            decode_body::<LE>(&bytes, "us", &[Type::UInt32, Type::ObjectPath]),
            Err(Error::TypeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn trailing_body_bytes_are_rejected() -> Result<()> {
        let mut bytes = encode_body::<LE>(&[Value::UInt32(5)], &[Type::UInt32])?;
        bytes.push(0);
        assert_eq!(
            decode_body::<LE>(&bytes, "u", &[Type::UInt32]),
            Err(Error::TrailingBody(1))
        );
        Ok(())
    }

    #[test]
    fn bad_bool_is_a_protocol_error() {
        let bytes = [2u8, 0, 0, 0];
        let err = decode_body::<LE>(&bytes, "b", &[Type::Bool]).unwrap_err();
        assert_eq!(err, Error::InvalidBool(2));
        assert!(err.is_protocol());
    }

    #[test]
    fn variant_with_mismatched_expectation() -> Result<()> {
        // A variant holding a string where the caller requires u32 inside:
        // detected by the caller comparing the inner type, but a corrupt
        // embedded signature is caught right here.
        let mut bytes = encode_body::<LE>(&[Value::variant(Value::UInt32(7))], &[Type::Variant])?;
        bytes[1] = b'z'; // clobber the embedded signature
        assert_eq!(
            decode_body::<LE>(&bytes, "v", &[Type::Variant]),
            Err(Error::UnrecognizedTypeCode(b'z'))
        );
        Ok(())
    }

    #[test]
    fn truncated_array_is_rejected() -> Result<()> {
        let value = Value::Array(Array::of_u32(&[1, 2, 3]));
        let ty = Type::array(Type::UInt32);
        let bytes = encode_body::<LE>(&[value], &[ty.clone()])?;
        let r = decode_body::<LE>(&bytes[..bytes.len() - 2], "au", &[ty]);
        assert!(matches!(r, Err(Error::ShortRead { .. })));
        Ok(())
    }

    #[test]
    fn lying_array_length_is_rejected() -> Result<()> {
        let value = Value::Array(Array::of_u32(&[1]));
        let ty = Type::array(Type::UInt32);
        let mut bytes = encode_body::<LE>(&[value], &[ty.clone()])?;
        // Claim 2 payload bytes: the element read would overrun the end.
        bytes[0] = 2;
        let r = decode_body::<LE>(&bytes, "au", &[ty]);
        assert!(matches!(r, Err(Error::ArrayOverrun { .. })));
        Ok(())
    }

    #[test]
    fn oversized_array_claim_is_rejected() {
        let bytes = [0xff, 0xff, 0xff, 0xff];
        assert_eq!(
            decode_body::<LE>(&bytes, "au", &[Type::array(Type::UInt32)]),
            Err(Error::ArrayTooLong(u32::MAX))
        );
    }

    #[test]
    fn variant_nesting_bomb_is_rejected() {
        // v(v(v(...))): each level embeds "v", 3 bytes apiece.
        let mut bytes = Vec::new();
        for _ in 0..100 {
            bytes.extend_from_slice(&[1, b'v', 0]);
        }
        bytes.extend_from_slice(&[1, b'y', 0, 9]);
        assert_eq!(
            decode_body::<LE>(&bytes, "v", &[Type::Variant]),
            Err(Error::SignatureTooDeep)
        );
    }
}
