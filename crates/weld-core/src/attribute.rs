//! Operator attribute values.
//!
//! Attributes are stored as a closed set of tagged variants. Reading one back
//! as a concrete Rust type goes through a checked conversion that reports the
//! expected and actual kinds instead of reinterpreting the payload.

use std::fmt;

/// The type tag of an [`AttributeValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    Bool,
    Int,
    Long,
    Float,
    String,
    Bools,
    Ints,
    Longs,
    Floats,
    Strings,
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrKind::Bool => "bool",
            AttrKind::Int => "int",
            AttrKind::Long => "long",
            AttrKind::Float => "float",
            AttrKind::String => "string",
            AttrKind::Bools => "bool[]",
            AttrKind::Ints => "int[]",
            AttrKind::Longs => "long[]",
            AttrKind::Floats => "float[]",
            AttrKind::Strings => "string[]",
        };
        f.write_str(name)
    }
}

/// Attribute value types.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    Bools(Vec<bool>),
    Ints(Vec<i32>),
    Longs(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl AttributeValue {
    /// Get the type tag of this value.
    pub fn kind(&self) -> AttrKind {
        match self {
            AttributeValue::Bool(_) => AttrKind::Bool,
            AttributeValue::Int(_) => AttrKind::Int,
            AttributeValue::Long(_) => AttrKind::Long,
            AttributeValue::Float(_) => AttrKind::Float,
            AttributeValue::String(_) => AttrKind::String,
            AttributeValue::Bools(_) => AttrKind::Bools,
            AttributeValue::Ints(_) => AttrKind::Ints,
            AttributeValue::Longs(_) => AttrKind::Longs,
            AttributeValue::Floats(_) => AttrKind::Floats,
            AttributeValue::Strings(_) => AttrKind::Strings,
        }
    }

    /// Numeric view of a scalar attribute.
    ///
    /// Returns `None` for booleans, strings and sequences.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(f64::from(*v)),
            AttributeValue::Long(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i32]> {
        match self {
            AttributeValue::Ints(v) => Some(v),
            _ => None,
        }
    }
}

/// Failed conversion from an [`AttributeValue`] to a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindMismatch {
    pub expected: AttrKind,
    pub actual: AttrKind,
}

macro_rules! attribute_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    AttributeValue::$variant(value)
                }
            }

            impl TryFrom<&AttributeValue> for $ty {
                type Error = KindMismatch;

                fn try_from(value: &AttributeValue) -> Result<Self, Self::Error> {
                    match value {
                        AttributeValue::$variant(v) => Ok(v.clone()),
                        other => Err(KindMismatch {
                            expected: AttrKind::$variant,
                            actual: other.kind(),
                        }),
                    }
                }
            }
        )*
    };
}

attribute_conversions! {
    bool => Bool,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    String => String,
    Vec<bool> => Bools,
    Vec<i32> => Ints,
    Vec<i64> => Longs,
    Vec<f32> => Floats,
    Vec<String> => Strings,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}
