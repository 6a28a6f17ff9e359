//! Encoding values into the outgoing byte stream.
//!
//! Values accumulate in a buffer and only reach the peer on [`WireWriter::flush`].
//! The dispatcher flushes once per operation.
//!
//! # Error sentinels
//!
//! The stream has no success/failure tag. A failed operation writes a value
//! from outside its return type's normal range, followed by a diagnostic
//! string:
//!
//! ```text
//! Void, Boolean     byte 127
//! Byte              byte 0x85
//! Int16, Int32      -12345
//! Int64             -123456789
//! Single, Double    NaN
//! String            "This an error!"
//! Guid              16 zero bytes
//! Point/Plane/Frame NaN (first coordinate only)
//! Array, Handle     -1
//! ```

use std::backtrace::BacktraceStatus;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::value::{Point3d, Value, Vector3d, WireType};
use crate::error::{HostwireError, Result};
use crate::handle::HandleTables;

/// Encoding of a successful `Void` result.
pub const VOID_OK: u8 = 0;
/// Sentinel for `Void` and `Boolean` results.
pub const BYTE_FLAG_ERROR: u8 = 127;
/// Sentinel for `Byte` results.
pub const BYTE_ERROR: u8 = 0x85;
/// Sentinel for `Int16` and `Int32` results.
pub const INT32_ERROR: i32 = -12345;
/// Sentinel for `Int64` results.
pub const INT64_ERROR: i64 = -123_456_789;
/// Sentinel for `String` results.
pub const STRING_ERROR: &str = "This an error!";
/// Sentinel for array lengths and handles.
pub const LENGTH_ERROR: i32 = -1;

/// Initial capacity of the output buffer.
const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Build the diagnostic text sent after an error sentinel.
///
/// Message (with its cause chain) on the first line. A backtrace follows
/// only when one was captured (`RUST_BACKTRACE` or `RUST_LIB_BACKTRACE`).
pub fn diagnostic(err: &anyhow::Error) -> String {
    let backtrace = err.backtrace();
    match backtrace.status() {
        BacktraceStatus::Captured => format!("{:#}\n{}", err, backtrace),
        _ => format!("{:#}", err),
    }
}

/// Buffered writer for wire values.
pub struct WireWriter<W> {
    sink: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin + Send> WireWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            buf: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
        }
    }

    /// Bytes encoded but not yet flushed.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Send everything buffered so far to the peer.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.sink.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.sink.flush().await?;
        Ok(())
    }

    /// Consume the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    #[inline]
    pub fn put_byte(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(if v { 1 } else { 2 });
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    #[inline]
    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    #[inline]
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    /// Write a string with its 7-bit encoded byte length.
    pub fn put_string(&mut self, s: &str) {
        let mut len = s.len() as u32;
        while len >= 0x80 {
            self.buf.put_u8((len as u8) | 0x80);
            len >>= 7;
        }
        self.buf.put_u8(len as u8);
        self.buf.put_slice(s.as_bytes());
    }

    pub fn put_guid(&mut self, g: &Uuid) {
        self.buf.put_slice(g.as_bytes());
    }

    fn put_point3d(&mut self, p: &Point3d) {
        self.put_f64(p.x);
        self.put_f64(p.y);
        self.put_f64(p.z);
    }

    fn put_vector3d(&mut self, v: &Vector3d) {
        self.put_f64(v.x);
        self.put_f64(v.y);
        self.put_f64(v.z);
    }

    fn put_length(&mut self, len: usize) -> Result<()> {
        let len = i32::try_from(len)
            .map_err(|_| HostwireError::Malformed(format!("array length {len} too large")))?;
        self.put_i32(len);
        Ok(())
    }

    /// Encode a successful result.
    ///
    /// The value is checked against `ty` before anything is written. Host
    /// objects are interned into their table here, so an object only gets a
    /// handle once the call that produced it has returned. With
    /// `fast_handles` the new handle is not echoed back; the client is
    /// expected to track the numbering itself.
    pub fn encode(
        &mut self,
        ty: &WireType,
        value: Value,
        handles: &mut HandleTables,
        fast_handles: bool,
    ) -> Result<()> {
        value.check(ty)?;
        self.encode_checked(ty, value, handles, fast_handles)
    }

    fn encode_checked(
        &mut self,
        ty: &WireType,
        value: Value,
        handles: &mut HandleTables,
        fast_handles: bool,
    ) -> Result<()> {
        match (ty, value) {
            (WireType::Void, Value::Unit) => self.put_byte(VOID_OK),
            (WireType::Byte, Value::Byte(v)) => self.put_byte(v),
            (WireType::Boolean, Value::Boolean(v)) => self.put_bool(v),
            (WireType::Int16, Value::Int16(v)) => self.put_i16(v),
            (WireType::Int32, Value::Int32(v)) => self.put_i32(v),
            (WireType::Int64, Value::Int64(v)) => self.put_i64(v),
            (WireType::Single, Value::Single(v)) => self.put_f32(v),
            (WireType::Double, Value::Double(v)) => self.put_f64(v),
            (WireType::String, Value::String(v)) => self.put_string(&v),
            (WireType::Guid, Value::Guid(v)) => self.put_guid(&v),
            (WireType::Point2d, Value::Point2d(p)) => {
                self.put_f64(p.x);
                self.put_f64(p.y);
            }
            (WireType::Point3d, Value::Point3d(p)) => self.put_point3d(&p),
            (WireType::Vector3d, Value::Vector3d(v)) => self.put_vector3d(&v),
            (WireType::Plane, Value::Plane(pl)) => {
                self.put_point3d(&pl.origin);
                self.put_vector3d(&pl.x_axis);
                self.put_vector3d(&pl.y_axis);
            }
            (WireType::Frame3d, Value::Frame3d(fr)) => {
                self.put_point3d(&fr.origin);
                self.put_vector3d(&fr.x_axis);
                self.put_vector3d(&fr.y_axis);
                self.put_vector3d(&fr.z_axis);
            }
            (WireType::Array(elem), Value::Array(items)) => {
                self.put_length(items.len())?;
                for item in items {
                    self.encode_checked(elem, item, handles, fast_handles)?;
                }
            }
            (WireType::Handle(kind), Value::Object(obj)) => {
                let handle = handles.intern(*kind, obj)?;
                if !fast_handles {
                    self.put_i32(handle);
                }
            }
            (ty, value) => {
                return Err(HostwireError::TypeMismatch {
                    expected: ty.to_string(),
                    found: value.type_name().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Encode a failed result: the sentinel for `ty`, then the diagnostic.
    pub fn encode_error(&mut self, ty: &WireType, err: &anyhow::Error) {
        self.put_sentinel(ty);
        self.put_string(&diagnostic(err));
    }

    fn put_sentinel(&mut self, ty: &WireType) {
        match ty {
            WireType::Void | WireType::Boolean => self.put_byte(BYTE_FLAG_ERROR),
            WireType::Byte => self.put_byte(BYTE_ERROR),
            WireType::Int16 => self.put_i16(INT32_ERROR as i16),
            WireType::Int32 => self.put_i32(INT32_ERROR),
            WireType::Int64 => self.put_i64(INT64_ERROR),
            WireType::Single => self.put_f32(f32::NAN),
            WireType::Double
            | WireType::Point2d
            | WireType::Point3d
            | WireType::Vector3d
            | WireType::Plane
            | WireType::Frame3d => self.put_f64(f64::NAN),
            WireType::String => self.put_string(STRING_ERROR),
            WireType::Guid => self.put_guid(&Uuid::nil()),
            WireType::Array(_) | WireType::Handle(_) => self.put_i32(LENGTH_ERROR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::{Frame3d, Plane, Point2d};
    use crate::codec::WireReader;
    use std::sync::Arc;

    fn writer() -> WireWriter<Vec<u8>> {
        WireWriter::new(Vec::new())
    }

    async fn round_trip(ty: WireType, value: Value) -> Value {
        let mut handles = HandleTables::default();
        let mut w = writer();
        w.encode(&ty, value, &mut handles, false).unwrap();
        w.flush().await.unwrap();

        let bytes = w.into_inner();
        let mut r = WireReader::new(bytes.as_slice());
        let decoded = r.decode(&ty, &handles).await.unwrap();
        assert_eq!(r.read_op_id().await.unwrap(), None, "trailing bytes");
        decoded
    }

    #[tokio::test]
    async fn test_round_trip_representative_values() {
        let frame = Frame3d {
            origin: Point3d::new(1.0, 2.0, 3.0),
            x_axis: Vector3d::new(1.0, 0.0, 0.0),
            y_axis: Vector3d::new(0.0, 1.0, 0.0),
            z_axis: Vector3d::new(0.0, 0.0, 1.0),
        };
        let plane = Plane {
            origin: Point3d::new(0.0, 0.0, 5.0),
            x_axis: Vector3d::new(0.0, 1.0, 0.0),
            y_axis: Vector3d::new(0.0, 0.0, 1.0),
        };
        let cases = vec![
            (WireType::Void, Value::Unit),
            (WireType::Byte, Value::Byte(0xFE)),
            (WireType::Boolean, Value::Boolean(false)),
            (WireType::Int16, Value::Int16(i16::MIN)),
            (WireType::Int32, Value::Int32(i32::MAX)),
            (WireType::Int64, Value::Int64(-42)),
            (WireType::Single, Value::Single(0.25)),
            (WireType::Double, Value::Double(-1e300)),
            (WireType::String, Value::String("héllo wörld".to_string())),
            (WireType::Guid, Value::Guid(Uuid::from_u128(0x1234_5678_9abc_def0))),
            (WireType::Point2d, Value::Point2d(Point2d::new(3.0, -4.0))),
            (WireType::Plane, Value::Plane(plane)),
            (WireType::Frame3d, Value::Frame3d(frame)),
            (
                WireType::array(WireType::array(WireType::Point3d)),
                Value::Array(vec![
                    Value::Array(vec![Value::Point3d(Point3d::new(1.0, 1.0, 1.0))]),
                    Value::Array(vec![]),
                ]),
            ),
        ];

        for (ty, value) in cases {
            assert_eq!(round_trip(ty.clone(), value.clone()).await, value, "{ty}");
        }
    }

    #[tokio::test]
    async fn test_round_trip_boundary_values() {
        assert_eq!(
            round_trip(WireType::String, Value::String(String::new())).await,
            Value::String(String::new())
        );
        assert_eq!(
            round_trip(WireType::array(WireType::Double), Value::Array(vec![])).await,
            Value::Array(vec![])
        );
        let long = "z".repeat(70_000);
        assert_eq!(
            round_trip(WireType::String, Value::String(long.clone())).await,
            Value::String(long)
        );
    }

    #[test]
    fn test_string_length_prefix() {
        let mut w = writer();
        w.put_string("abc");
        assert_eq!(w.pending(), &[3, b'a', b'b', b'c']);

        let mut w = writer();
        w.put_string(&"y".repeat(300));
        assert_eq!(&w.pending()[..2], &[0xAC, 0x02]);
        assert_eq!(w.pending().len(), 302);
    }

    #[test]
    fn test_boolean_codes() {
        let mut w = writer();
        w.put_bool(true);
        w.put_bool(false);
        assert_eq!(w.pending(), &[1, 2]);
    }

    #[test]
    fn test_encode_handle_interns_and_echoes() {
        let mut handles = HandleTables::with_kinds(&["shape"]);
        let mut w = writer();
        let ty = WireType::array(WireType::Handle("shape"));
        let value = Value::Array(vec![Value::object(1u8), Value::object(2u8)]);

        w.encode(&ty, value, &mut handles, false).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&2i32.to_le_bytes());
        expected.extend_from_slice(&0i32.to_le_bytes());
        expected.extend_from_slice(&1i32.to_le_bytes());
        assert_eq!(w.pending(), expected.as_slice());
        assert_eq!(handles.len_of("shape"), 2);
    }

    #[test]
    fn test_encode_handle_fast_mode_elides_echo() {
        let mut handles = HandleTables::with_kinds(&["shape"]);
        let mut w = writer();

        w.encode(&WireType::Handle("shape"), Value::object(7u8), &mut handles, true)
            .unwrap();

        assert!(w.pending().is_empty());
        assert_eq!(handles.len_of("shape"), 1);
    }

    #[test]
    fn test_encode_mismatch_writes_nothing() {
        let mut handles = HandleTables::with_kinds(&["shape"]);
        let mut w = writer();
        let ty = WireType::array(WireType::Handle("shape"));
        let value = Value::Array(vec![Value::object(1u8), Value::Int32(3)]);

        assert!(matches!(
            w.encode(&ty, value, &mut handles, false),
            Err(HostwireError::TypeMismatch { .. })
        ));
        assert!(w.pending().is_empty());
        assert_eq!(handles.len_of("shape"), 0);
    }

    #[tokio::test]
    async fn test_error_sentinels() {
        let err = anyhow::anyhow!("boom");
        let cases: Vec<(WireType, Vec<u8>)> = vec![
            (WireType::Void, vec![127]),
            (WireType::Boolean, vec![127]),
            (WireType::Byte, vec![0x85]),
            (WireType::Int16, (-12345i16).to_le_bytes().to_vec()),
            (WireType::Int32, (-12345i32).to_le_bytes().to_vec()),
            (WireType::Int64, (-123_456_789i64).to_le_bytes().to_vec()),
            (WireType::Guid, vec![0; 16]),
            (WireType::array(WireType::Double), (-1i32).to_le_bytes().to_vec()),
            (WireType::Handle("shape"), (-1i32).to_le_bytes().to_vec()),
        ];

        for (ty, sentinel) in cases {
            let mut w = writer();
            w.encode_error(&ty, &err);
            let bytes = w.pending().to_vec();
            assert_eq!(&bytes[..sentinel.len()], sentinel.as_slice(), "{ty}");

            let mut r = WireReader::new(&bytes[sentinel.len()..]);
            let diag = r.read_string().await.unwrap();
            assert!(diag.starts_with("boom"), "{ty}: {diag}");
        }
    }

    #[tokio::test]
    async fn test_tuple_error_writes_only_first_field() {
        let err = anyhow::anyhow!("no frame");
        let mut w = writer();
        w.encode_error(&WireType::Frame3d, &err);

        let bytes = w.pending().to_vec();
        let mut r = WireReader::new(bytes.as_slice());
        assert!(r.read_f64().await.unwrap().is_nan());
        assert!(r.read_string().await.unwrap().starts_with("no frame"));
        assert_eq!(r.read_op_id().await.unwrap(), None);

        let mut w = writer();
        w.encode_error(&WireType::Single, &err);
        let bytes = w.pending().to_vec();
        let mut r = WireReader::new(bytes.as_slice());
        assert!(r.read_f32().await.unwrap().is_nan());
    }

    #[test]
    fn test_diagnostic_includes_cause_chain() {
        let err = anyhow::anyhow!("disk full").context("saving scene");
        let text = diagnostic(&err);
        assert!(text.starts_with("saving scene: disk full"));
    }

    #[test]
    fn test_diagnostic_omits_missing_backtrace() {
        let err = anyhow::anyhow!("no such layer");
        let text = diagnostic(&err);

        assert!(!text.contains("disabled backtrace"));
        assert!(!text.contains("unsupported backtrace"));
        match err.backtrace().status() {
            BacktraceStatus::Captured => assert!(text.lines().count() > 1),
            _ => assert_eq!(text, "no such layer"),
        }
    }

    #[tokio::test]
    async fn test_flush_moves_bytes_to_sink() {
        let mut handles = HandleTables::default();
        let mut w = writer();
        w.encode(&WireType::Int32, Value::Int32(5), &mut handles, false)
            .unwrap();
        w.flush().await.unwrap();

        assert!(w.pending().is_empty());
        assert_eq!(w.into_inner(), 5i32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_handle_objects_keep_identity() {
        let mut handles = HandleTables::with_kinds(&["shape"]);
        let obj: crate::codec::HostObject = Arc::new("box");
        let mut w = writer();
        w.encode(&WireType::Handle("shape"), Value::Object(obj.clone()), &mut handles, false)
            .unwrap();

        assert!(Arc::ptr_eq(handles.resolve("shape", 0).unwrap(), &obj));
    }
}
