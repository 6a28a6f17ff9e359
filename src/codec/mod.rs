//! Codec module - typed values over a continuous byte stream.
//!
//! Every wire type has one codec made of three parts:
//!
//! - decode: [`WireReader::decode`] reads exactly the value's encoding
//! - encode: [`WireWriter::encode`] appends the value to the output buffer
//! - encode error: [`WireWriter::encode_error`] appends the type's sentinel
//!   and a diagnostic string
//!
//! Fixed-width numbers are little-endian. Strings carry a 7-bit encoded byte
//! length. Arrays carry an `i32` element count.
//!
//! # Example
//!
//! ```
//! use hostwire::codec::{Value, WireReader, WireType, WireWriter};
//! use hostwire::handle::HandleTables;
//!
//! # tokio_test_block(async {
//! let mut handles = HandleTables::default();
//! let mut writer = WireWriter::new(Vec::new());
//! writer
//!     .encode(&WireType::String, Value::String("hi".into()), &mut handles, false)
//!     .unwrap();
//! writer.flush().await.unwrap();
//!
//! let bytes = writer.into_inner();
//! let mut reader = WireReader::new(bytes.as_slice());
//! let value = reader.decode(&WireType::String, &handles).await.unwrap();
//! assert_eq!(value, Value::String("hi".into()));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod reader;
mod value;
mod writer;

pub use reader::{PolledId, Readiness, WireReader};
pub use value::{Frame3d, HostObject, Plane, Point2d, Point3d, Value, Vector3d, WireType};
pub use writer::{
    diagnostic, WireWriter, BYTE_ERROR, BYTE_FLAG_ERROR, INT32_ERROR, INT64_ERROR, LENGTH_ERROR,
    STRING_ERROR, VOID_OK,
};
