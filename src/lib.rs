//! # hostwire
//!
//! Binary RPC for driving operations inside a long-running host process.
//!
//! A host exposes a [`CapabilitySurface`]: a set of named, typed operations.
//! Clients connect over TCP, bind operations by name and call them through
//! the integer id they get back. The protocol itself never lists operations,
//! so the surface can grow without breaking clients.
//!
//! ## Architecture
//!
//! - **Codec**: typed values read and written in place, with an error
//!   sentinel per type instead of a status field
//! - **Handles**: host objects travel as indices into per-connection tables
//! - **Registry**: per-connection id to operation table; id 0 binds by name
//! - **Dispatcher**: reads ids, runs operations, recovers from desync
//! - **Executor**: where host code runs (inline or on a dedicated thread,
//!   with optional transactions)
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hostwire::{CapabilitySurface, HostKind, HostThread, Server};
//! use hostwire::codec::Point3d;
//!
//! struct Sphere { center: Point3d, radius: f64 }
//!
//! impl HostKind for Sphere {
//!     const KIND: &'static str = "sphere";
//! }
//!
//! #[tokio::main]
//! async fn main() -> hostwire::Result<()> {
//!     let surface = CapabilitySurface::builder()
//!         .operation("Sphere", |(center, radius): (Point3d, f64)| {
//!             Ok(Arc::new(Sphere { center, radius }))
//!         })
//!         .operation("Radius", |(s,): (Arc<Sphere>,)| Ok(s.radius))
//!         .build()?;
//!
//!     Server::builder()
//!         .capabilities(surface)
//!         .executor(HostThread::spawn("scene", None)?)
//!         .bind()
//!         .await?
//!         .serve()
//!         .await
//! }
//! ```

pub mod capability;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handle;
pub mod registry;

mod server;

pub use capability::{CapabilitySurface, HostKind, Signature};
pub use config::{DispatchMode, ServerConfig};
pub use dispatcher::{DispatchConfig, Dispatcher, PollOutcome};
pub use error::{HostwireError, Result};
pub use executor::{Executor, HostThread, InlineExecutor, Transactions};
pub use server::{Server, ServerBuilder};
