//! Mapping between Rust types and wire types.
//!
//! [`WireValue`] is implemented for every Rust type with a codec, and
//! [`WireArgs`] for tuples of them. Together they let a host register a plain
//! closure and have its signature derived from the closure's types.

use std::any::Any;
use std::sync::Arc;

use uuid::Uuid;

use crate::codec::{Frame3d, Plane, Point2d, Point3d, Value, Vector3d, WireType};
use crate::error::{HostwireError, Result};

/// A host object type that can be handed to clients as a handle.
///
/// Each kind gets its own handle table on every connection.
///
/// # Example
///
/// ```
/// use hostwire::capability::HostKind;
///
/// struct Shape { name: String }
///
/// impl HostKind for Shape {
///     const KIND: &'static str = "shape";
/// }
/// ```
pub trait HostKind: Any + Send + Sync {
    /// Name of the handle table for this kind.
    const KIND: &'static str;
}

/// A Rust type with a wire codec.
pub trait WireValue: Sized + Send + 'static {
    /// Wire type used for this Rust type.
    fn wire_type() -> WireType;

    /// Convert into a dynamically typed value.
    fn into_value(self) -> Value;

    /// Convert from a dynamically typed value.
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: WireType, found: &Value) -> HostwireError {
    HostwireError::TypeMismatch {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

macro_rules! impl_wire_value {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl WireValue for $ty {
                fn wire_type() -> WireType {
                    WireType::$variant
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch(WireType::$variant, &other)),
                    }
                }
            }
        )+
    };
}

impl_wire_value! {
    u8 => Byte,
    bool => Boolean,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Single,
    f64 => Double,
    String => String,
    Uuid => Guid,
    Point2d => Point2d,
    Point3d => Point3d,
    Vector3d => Vector3d,
    Plane => Plane,
    Frame3d => Frame3d,
}

impl WireValue for () {
    fn wire_type() -> WireType {
        WireType::Void
    }

    fn into_value(self) -> Value {
        Value::Unit
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Unit => Ok(()),
            other => Err(mismatch(WireType::Void, &other)),
        }
    }
}

impl<T: WireValue> WireValue for Vec<T> {
    fn wire_type() -> WireType {
        WireType::array(T::wire_type())
    }

    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(WireValue::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch(Self::wire_type(), &other)),
        }
    }
}

impl<T: HostKind> WireValue for Arc<T> {
    fn wire_type() -> WireType {
        WireType::Handle(T::KIND)
    }

    fn into_value(self) -> Value {
        Value::Object(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(obj) => obj.downcast::<T>().map_err(|_| HostwireError::TypeMismatch {
                expected: Self::wire_type().to_string(),
                found: "Handle of another kind".to_string(),
            }),
            other => Err(mismatch(Self::wire_type(), &other)),
        }
    }
}

/// An ordered parameter list.
pub trait WireArgs: Sized + Send + 'static {
    /// Parameter wire types, left to right.
    fn wire_types() -> Vec<WireType>;

    /// Build the arguments from decoded values.
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

impl WireArgs for () {
    fn wire_types() -> Vec<WireType> {
        Vec::new()
    }

    fn from_values(values: Vec<Value>) -> Result<Self> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(HostwireError::TypeMismatch {
                expected: "no arguments".to_string(),
                found: format!("{} arguments", values.len()),
            })
        }
    }
}

macro_rules! impl_wire_args {
    ($($name:ident),+) => {
        impl<$($name: WireValue),+> WireArgs for ($($name,)+) {
            fn wire_types() -> Vec<WireType> {
                vec![$($name::wire_type()),+]
            }

            fn from_values(values: Vec<Value>) -> Result<Self> {
                let expected = [$(stringify!($name)),+].len();
                if values.len() != expected {
                    return Err(HostwireError::TypeMismatch {
                        expected: format!("{} arguments", expected),
                        found: format!("{} arguments", values.len()),
                    });
                }
                let mut values = values.into_iter();
                Ok(($(
                    $name::from_value(values.next().unwrap_or(Value::Unit))?,
                )+))
            }
        }
    };
}

impl_wire_args!(A);
impl_wire_args!(A, B);
impl_wire_args!(A, B, C);
impl_wire_args!(A, B, C, D);
impl_wire_args!(A, B, C, D, E);
impl_wire_args!(A, B, C, D, E, F);
