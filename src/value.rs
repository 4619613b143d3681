//! Native argument values.
//!
//! [`Value`] mirrors [`Type`](crate::signature::Type) one to one and is
//! what handlers receive and return. Arrays carry their element type so
//! an empty array still knows its signature.

use crate::error::{Error, Result};
use crate::signature::{signature_of, ArrayRepr, Type};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    Array(Array),
    Struct(Vec<Value>),
    Variant(Box<Value>),
}

/// A homogeneous sequence with a fixed element type.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    element: Type,
    items: Vec<Value>,
}

impl Array {
    pub fn new(element: Type) -> Self {
        Self {
            element,
            items: Vec::new(),
        }
    }

    /// Build an array, checking every item against the element type.
    pub fn from_items(element: Type, items: Vec<Value>) -> Result<Self> {
        for item in &items {
            if !item.matches(&element) {
                return Err(Error::TypeMismatch {
                    expected: element.signature(),
                    found: item.type_of().signature(),
                });
            }
        }
        Ok(Self { element, items })
    }

    /// Decode already validates each element against the declared type,
    /// so the codec skips the per-item check.
    pub(crate) fn from_items_unchecked(element: Type, items: Vec<Value>) -> Self {
        Self { element, items }
    }

    pub fn push(&mut self, item: Value) -> Result<()> {
        if !item.matches(&self.element) {
            return Err(Error::TypeMismatch {
                expected: self.element.signature(),
                found: item.type_of().signature(),
            });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn element(&self) -> &Type {
        &self.element
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn repr(&self) -> ArrayRepr {
        ArrayRepr::for_element(&self.element)
    }

    /// String arrays use the null-terminated native representation; the
    /// sentinel never appears as an item, so the slice is taken whole.
    pub fn of_strings<S: AsRef<str>>(items: &[S]) -> Self {
        Self {
            element: Type::Str,
            items: items
                .iter()
                .map(|s| Value::Str(s.as_ref().to_owned()))
                .collect(),
        }
    }

    /// Fixed-width arrays have no sentinel; the explicit slice length is
    /// the element count.
    pub fn of_u32(items: &[u32]) -> Self {
        Self {
            element: Type::UInt32,
            items: items.iter().map(|&i| Value::UInt32(i)).collect(),
        }
    }

    pub fn of_bytes(items: &[u8]) -> Self {
        Self {
            element: Type::Byte,
            items: items.iter().map(|&b| Value::Byte(b)).collect(),
        }
    }
}

impl Value {
    pub fn variant(inner: Value) -> Value {
        Value::Variant(Box::new(inner))
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Byte(_) => Type::Byte,
            Value::Bool(_) => Type::Bool,
            Value::Int16(_) => Type::Int16,
            Value::UInt16(_) => Type::UInt16,
            Value::Int32(_) => Type::Int32,
            Value::UInt32(_) => Type::UInt32,
            Value::Int64(_) => Type::Int64,
            Value::UInt64(_) => Type::UInt64,
            Value::Double(_) => Type::Double,
            Value::Str(_) => Type::Str,
            Value::ObjectPath(_) => Type::ObjectPath,
            Value::Signature(_) => Type::Signature,
            Value::Array(a) => Type::Array(Box::new(a.element.clone())),
            Value::Struct(fields) => Type::Struct(fields.iter().map(Value::type_of).collect()),
            Value::Variant(_) => Type::Variant,
        }
    }

    pub fn signature(&self) -> String {
        self.type_of().signature()
    }

    /// Exact conformance against a declared type. No coercion: a `u32`
    /// does not match `i32`, and a struct must match field for field.
    pub fn matches(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Value::Array(a), Type::Array(element)) => a.element == **element,
            (Value::Struct(fields), Type::Struct(field_types)) => {
                fields.len() == field_types.len()
                    && fields
                        .iter()
                        .zip(field_types)
                        .all(|(v, t)| v.matches(t))
            }
            (Value::Variant(_), Type::Variant) => true,
            (v, t) => v.type_of() == *t,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) | Value::Signature(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Value]> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_variant(&self) -> Option<&Value> {
        match self {
            Value::Variant(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Signature of an argument list, derived from the values themselves.
pub fn signature_of_values(values: &[Value]) -> String {
    let types: Vec<Type> = values.iter().map(Value::type_of).collect();
    signature_of(&types)
}

macro_rules! value_from {
    ($native:ty, $variant:ident) => {
        impl From<$native> for Value {
            fn from(v: $native) -> Value {
                Value::$variant(v)
            }
        }
    };
}

value_from!(u8, Byte);
value_from!(bool, Bool);
value_from!(i16, Int16);
value_from!(u16, UInt16);
value_from!(i32, Int32);
value_from!(u32, UInt32);
value_from!(i64, Int64);
value_from!(u64, UInt64);
value_from!(f64, Double);
value_from!(String, Str);

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_owned())
    }
}
