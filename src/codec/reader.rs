//! Decoding values from the incoming byte stream.
//!
//! There is no framing layer: every value is read in place, in exactly the
//! width its codec defines. Running out of bytes inside a value or seeing an
//! impossible encoding is a stream fault, never something a single operation
//! can recover from.

use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use super::value::{Frame3d, Plane, Point2d, Point3d, Value, Vector3d, WireType};
use crate::error::{HostwireError, Result};
use crate::handle::HandleTables;

/// Read buffer capacity.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on elements preallocated for one array.
const MAX_PREALLOC: usize = 1024;

/// Boxed future used for recursive decoding.
type DecodeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Outcome of waiting for input with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one byte is buffered.
    Ready,
    /// The peer closed its side.
    Closed,
    /// Nothing arrived before the deadline.
    TimedOut,
}

fn eof_as_closed(e: std::io::Error) -> HostwireError {
    if e.kind() == ErrorKind::UnexpectedEof {
        HostwireError::ConnectionClosed
    } else {
        HostwireError::Io(e)
    }
}

/// Outcome of reading an operation id with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolledId {
    /// A complete id.
    Id(i32),
    /// The deadline passed first. Bytes of a partial id are kept.
    Pending,
    /// The peer closed the stream between two requests.
    Closed,
}

/// Buffered reader for wire values.
pub struct WireReader<R> {
    inner: BufReader<R>,
    /// Leading bytes of an id whose remainder has not arrived yet.
    id_buf: [u8; 4],
    id_len: usize,
}

impl<R: AsyncRead + Unpin + Send> WireReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            id_buf: [0; 4],
            id_len: 0,
        }
    }

    /// Wait until input is available, the stream ends, or `wait` elapses.
    ///
    /// Nothing is consumed, so a timeout never loses bytes.
    pub async fn wait_readable(&mut self, wait: Duration) -> Result<Readiness> {
        self.wait_readable_until(Instant::now() + wait).await
    }

    async fn wait_readable_until(&mut self, deadline: Instant) -> Result<Readiness> {
        match timeout_at(deadline, self.inner.fill_buf()).await {
            Err(_) => Ok(Readiness::TimedOut),
            Ok(Ok(buf)) if buf.is_empty() => Ok(Readiness::Closed),
            Ok(Ok(_)) => Ok(Readiness::Ready),
            Ok(Err(e)) => Err(HostwireError::Io(e)),
        }
    }

    /// Read the next operation id.
    ///
    /// Returns `None` when the stream ends cleanly between two requests.
    pub async fn read_op_id(&mut self) -> Result<Option<i32>> {
        if self.id_len == 0 && self.inner.fill_buf().await?.is_empty() {
            return Ok(None);
        }
        while self.id_len < 4 {
            self.id_buf[self.id_len] = self.read_byte().await?;
            self.id_len += 1;
        }
        Ok(Some(self.take_id()))
    }

    /// Read the next operation id, giving up after `wait`.
    ///
    /// Unlike [`read_op_id`](Self::read_op_id) this never waits past the
    /// deadline, even when only part of the id has arrived. Those bytes
    /// stay buffered and the next call picks up where this one stopped.
    pub async fn poll_op_id(&mut self, wait: Duration) -> Result<PolledId> {
        let deadline = Instant::now() + wait;
        while self.id_len < 4 {
            match self.wait_readable_until(deadline).await? {
                Readiness::TimedOut => return Ok(PolledId::Pending),
                Readiness::Closed if self.id_len == 0 => return Ok(PolledId::Closed),
                Readiness::Closed => return Err(HostwireError::ConnectionClosed),
                Readiness::Ready => {
                    let buf = self.inner.buffer();
                    let n = buf.len().min(4 - self.id_len);
                    self.id_buf[self.id_len..self.id_len + n].copy_from_slice(&buf[..n]);
                    self.inner.consume(n);
                    self.id_len += n;
                }
            }
        }
        Ok(PolledId::Id(self.take_id()))
    }

    fn take_id(&mut self) -> i32 {
        self.id_len = 0;
        i32::from_le_bytes(self.id_buf)
    }

    /// Discard incoming bytes until the peer goes quiet for `idle`, the
    /// stream ends, or `limit` has passed in total.
    ///
    /// Returns the number of bytes dropped.
    pub async fn drain(&mut self, idle: Duration, limit: Duration) -> Result<usize> {
        let hard_stop = Instant::now() + limit;
        let mut dropped = 0;

        loop {
            let deadline = (Instant::now() + idle).min(hard_stop);
            match self.wait_readable_until(deadline).await? {
                Readiness::Ready => {
                    let n = self.inner.buffer().len();
                    self.inner.consume(n);
                    dropped += n;
                    if Instant::now() >= hard_stop {
                        return Ok(dropped);
                    }
                }
                Readiness::Closed | Readiness::TimedOut => return Ok(dropped),
            }
        }
    }

    pub async fn read_byte(&mut self) -> Result<u8> {
        self.inner.read_u8().await.map_err(eof_as_closed)
    }

    pub async fn read_bool(&mut self) -> Result<bool> {
        match self.read_byte().await? {
            1 => Ok(true),
            0 | 2 => Ok(false),
            other => Err(HostwireError::Malformed(format!(
                "invalid boolean byte {other}"
            ))),
        }
    }

    pub async fn read_i16(&mut self) -> Result<i16> {
        self.inner.read_i16_le().await.map_err(eof_as_closed)
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        self.inner.read_i32_le().await.map_err(eof_as_closed)
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        self.inner.read_i64_le().await.map_err(eof_as_closed)
    }

    pub async fn read_f32(&mut self) -> Result<f32> {
        self.inner.read_f32_le().await.map_err(eof_as_closed)
    }

    pub async fn read_f64(&mut self) -> Result<f64> {
        self.inner.read_f64_le().await.map_err(eof_as_closed)
    }

    /// Read a 7-bit encoded (LEB128) string length.
    async fn read_string_len(&mut self) -> Result<usize> {
        let mut len: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_byte().await?;
            len |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return i32::try_from(len)
                    .map(|l| l as usize)
                    .map_err(|_| HostwireError::Malformed(format!("string length {len} too large")));
            }
        }
        Err(HostwireError::Malformed(
            "string length prefix longer than 5 bytes".to_string(),
        ))
    }

    pub async fn read_string(&mut self) -> Result<String> {
        let len = self.read_string_len().await?;
        let mut bytes = Vec::with_capacity(len.min(READ_BUFFER_SIZE));
        (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut bytes)
            .await?;
        if bytes.len() != len {
            return Err(HostwireError::ConnectionClosed);
        }
        String::from_utf8(bytes)
            .map_err(|e| HostwireError::Malformed(format!("string is not UTF-8: {e}")))
    }

    pub async fn read_guid(&mut self) -> Result<Uuid> {
        let mut bytes = [0u8; 16];
        self.inner
            .read_exact(&mut bytes)
            .await
            .map_err(eof_as_closed)?;
        Ok(Uuid::from_bytes(bytes))
    }

    async fn read_point2d(&mut self) -> Result<Point2d> {
        Ok(Point2d::new(self.read_f64().await?, self.read_f64().await?))
    }

    async fn read_point3d(&mut self) -> Result<Point3d> {
        Ok(Point3d::new(
            self.read_f64().await?,
            self.read_f64().await?,
            self.read_f64().await?,
        ))
    }

    async fn read_vector3d(&mut self) -> Result<Vector3d> {
        Ok(Vector3d::new(
            self.read_f64().await?,
            self.read_f64().await?,
            self.read_f64().await?,
        ))
    }

    /// Decode one value of type `ty`, resolving handles through `handles`.
    pub fn decode<'a>(&'a mut self, ty: &'a WireType, handles: &'a HandleTables) -> DecodeFuture<'a> {
        Box::pin(async move {
            let value = match ty {
                WireType::Void => {
                    self.read_byte().await?;
                    Value::Unit
                }
                WireType::Byte => Value::Byte(self.read_byte().await?),
                WireType::Boolean => Value::Boolean(self.read_bool().await?),
                WireType::Int16 => Value::Int16(self.read_i16().await?),
                WireType::Int32 => Value::Int32(self.read_i32().await?),
                WireType::Int64 => Value::Int64(self.read_i64().await?),
                WireType::Single => Value::Single(self.read_f32().await?),
                WireType::Double => Value::Double(self.read_f64().await?),
                WireType::String => Value::String(self.read_string().await?),
                WireType::Guid => Value::Guid(self.read_guid().await?),
                WireType::Point2d => Value::Point2d(self.read_point2d().await?),
                WireType::Point3d => Value::Point3d(self.read_point3d().await?),
                WireType::Vector3d => Value::Vector3d(self.read_vector3d().await?),
                WireType::Plane => Value::Plane(Plane {
                    origin: self.read_point3d().await?,
                    x_axis: self.read_vector3d().await?,
                    y_axis: self.read_vector3d().await?,
                }),
                WireType::Frame3d => Value::Frame3d(Frame3d {
                    origin: self.read_point3d().await?,
                    x_axis: self.read_vector3d().await?,
                    y_axis: self.read_vector3d().await?,
                    z_axis: self.read_vector3d().await?,
                }),
                WireType::Array(elem) => {
                    let len = self.read_i32().await?;
                    let len = usize::try_from(len).map_err(|_| {
                        HostwireError::Malformed(format!("negative array length {len}"))
                    })?;
                    let mut items = Vec::with_capacity(len.min(MAX_PREALLOC));
                    for _ in 0..len {
                        items.push(self.decode(elem, handles).await?);
                    }
                    Value::Array(items)
                }
                WireType::Handle(kind) => {
                    let handle = self.read_i32().await?;
                    Value::Object(handles.resolve(kind, handle)?.clone())
                }
            };
            Ok(value)
        })
    }
}
