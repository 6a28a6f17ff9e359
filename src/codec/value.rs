//! Wire types and the dynamically typed values they carry.
//!
//! A [`WireType`] names one codec. A [`Value`] is what that codec decodes to
//! or encodes from. Host objects travel as [`Value::Object`] and are turned
//! into integer handles by the handle tables at the codec boundary.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{HostwireError, Result};

/// Reference to an object living inside the host process.
pub type HostObject = Arc<dyn Any + Send + Sync>;

/// Tag describing the wire shape of a parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireType {
    /// No value. Encodes as a fixed unit byte so every call is acknowledged.
    Void,
    Byte,
    Boolean,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    String,
    /// 16 raw bytes.
    Guid,
    Point2d,
    Point3d,
    Vector3d,
    /// Origin, x-axis, y-axis.
    Plane,
    /// Origin, x-axis, y-axis, z-axis.
    Frame3d,
    /// Length-prefixed sequence of the element type.
    Array(Box<WireType>),
    /// Host object of the given kind, sent as an index into that kind's table.
    Handle(&'static str),
}

impl WireType {
    /// Shorthand for `WireType::Array(Box::new(elem))`.
    pub fn array(elem: WireType) -> Self {
        WireType::Array(Box::new(elem))
    }

    /// Collect every handle kind reachable from this type.
    pub(crate) fn collect_kinds(&self, kinds: &mut Vec<&'static str>) {
        match self {
            WireType::Handle(kind) => {
                if !kinds.contains(kind) {
                    kinds.push(kind);
                }
            }
            WireType::Array(elem) => elem.collect_kinds(kinds),
            _ => {}
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireType::Void => f.write_str("Void"),
            WireType::Byte => f.write_str("Byte"),
            WireType::Boolean => f.write_str("Boolean"),
            WireType::Int16 => f.write_str("Int16"),
            WireType::Int32 => f.write_str("Int32"),
            WireType::Int64 => f.write_str("Int64"),
            WireType::Single => f.write_str("Single"),
            WireType::Double => f.write_str("Double"),
            WireType::String => f.write_str("String"),
            WireType::Guid => f.write_str("Guid"),
            WireType::Point2d => f.write_str("Point2d"),
            WireType::Point3d => f.write_str("Point3d"),
            WireType::Vector3d => f.write_str("Vector3d"),
            WireType::Plane => f.write_str("Plane"),
            WireType::Frame3d => f.write_str("Frame3d"),
            WireType::Array(elem) => write!(f, "Array<{}>", elem),
            WireType::Handle(kind) => write!(f, "Handle<{}>", kind),
        }
    }
}

/// A point in the plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2d {
    pub x: f64,
    pub y: f64,
}

impl Point2d {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point in space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A direction in space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A plane given by its origin and two in-plane axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub origin: Point3d,
    pub x_axis: Vector3d,
    pub y_axis: Vector3d,
}

/// A local coordinate frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frame3d {
    pub origin: Point3d,
    pub x_axis: Vector3d,
    pub y_axis: Vector3d,
    pub z_axis: Vector3d,
}

/// A decoded parameter or a result ready to be encoded.
#[derive(Clone)]
pub enum Value {
    Unit,
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    String(String),
    Guid(Uuid),
    Point2d(Point2d),
    Point3d(Point3d),
    Vector3d(Vector3d),
    Plane(Plane),
    Frame3d(Frame3d),
    Array(Vec<Value>),
    Object(HostObject),
}

impl Value {
    /// Wrap a host object.
    pub fn object<T: Any + Send + Sync>(obj: T) -> Self {
        Value::Object(Arc::new(obj))
    }

    /// Short name of the variant, used in type mismatch reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "Void",
            Value::Byte(_) => "Byte",
            Value::Boolean(_) => "Boolean",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::Single(_) => "Single",
            Value::Double(_) => "Double",
            Value::String(_) => "String",
            Value::Guid(_) => "Guid",
            Value::Point2d(_) => "Point2d",
            Value::Point3d(_) => "Point3d",
            Value::Vector3d(_) => "Vector3d",
            Value::Plane(_) => "Plane",
            Value::Frame3d(_) => "Frame3d",
            Value::Array(_) => "Array",
            Value::Object(_) => "Handle",
        }
    }

    /// Verify that this value can be encoded with the codec for `ty`.
    ///
    /// Runs before any byte is written or any handle is interned, so a
    /// mismatch never leaves a partial payload behind.
    pub fn check(&self, ty: &WireType) -> Result<()> {
        let ok = match (ty, self) {
            (WireType::Void, Value::Unit)
            | (WireType::Byte, Value::Byte(_))
            | (WireType::Boolean, Value::Boolean(_))
            | (WireType::Int16, Value::Int16(_))
            | (WireType::Int32, Value::Int32(_))
            | (WireType::Int64, Value::Int64(_))
            | (WireType::Single, Value::Single(_))
            | (WireType::Double, Value::Double(_))
            | (WireType::String, Value::String(_))
            | (WireType::Guid, Value::Guid(_))
            | (WireType::Point2d, Value::Point2d(_))
            | (WireType::Point3d, Value::Point3d(_))
            | (WireType::Vector3d, Value::Vector3d(_))
            | (WireType::Plane, Value::Plane(_))
            | (WireType::Frame3d, Value::Frame3d(_))
            | (WireType::Handle(_), Value::Object(_)) => true,
            (WireType::Array(elem), Value::Array(items)) => {
                for item in items {
                    item.check(elem)?;
                }
                true
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(HostwireError::TypeMismatch {
                expected: ty.to_string(),
                found: self.type_name().to_string(),
            })
        }
    }

    /// Downcast an object value to a concrete host type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("Unit"),
            Value::Byte(v) => f.debug_tuple("Byte").field(v).finish(),
            Value::Boolean(v) => f.debug_tuple("Boolean").field(v).finish(),
            Value::Int16(v) => f.debug_tuple("Int16").field(v).finish(),
            Value::Int32(v) => f.debug_tuple("Int32").field(v).finish(),
            Value::Int64(v) => f.debug_tuple("Int64").field(v).finish(),
            Value::Single(v) => f.debug_tuple("Single").field(v).finish(),
            Value::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Value::String(v) => f.debug_tuple("String").field(v).finish(),
            Value::Guid(v) => f.debug_tuple("Guid").field(v).finish(),
            Value::Point2d(v) => f.debug_tuple("Point2d").field(v).finish(),
            Value::Point3d(v) => f.debug_tuple("Point3d").field(v).finish(),
            Value::Vector3d(v) => f.debug_tuple("Vector3d").field(v).finish(),
            Value::Plane(v) => f.debug_tuple("Plane").field(v).finish(),
            Value::Frame3d(v) => f.debug_tuple("Frame3d").field(v).finish(),
            Value::Array(v) => f.debug_tuple("Array").field(v).finish(),
            Value::Object(obj) => write!(f, "Object({:p})", Arc::as_ptr(obj)),
        }
    }
}

/// Objects compare by identity, everything else by value.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Single(a), Value::Single(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Point2d(a), Value::Point2d(b)) => a == b,
            (Value::Point3d(a), Value::Point3d(b)) => a == b,
            (Value::Vector3d(a), Value::Vector3d(b)) => a == b,
            (Value::Plane(a), Value::Plane(b)) => a == b,
            (Value::Frame3d(a), Value::Frame3d(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
