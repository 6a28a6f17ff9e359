//! Capability module - the named operations a host exposes to clients.
//!
//! The surface is the only thing a host integration has to provide. Clients
//! never see it directly; they bind operations by name at runtime and get back
//! integer ids, so adding an operation never changes the protocol.
//!
//! - [`CapabilitySurface`]: validated name to operation map
//! - [`WireValue`] / [`WireArgs`]: derive signatures from Rust types
//! - [`HostKind`]: host object types clients can hold handles to
//! - [`SessionFlags`]: per-connection flags set by built-in operations

mod builtin;
mod surface;
mod typed;

pub use builtin::{is_reserved, SessionFlags, SET_DEBUG_MODE, SET_FAST_MODE};
pub use surface::{
    Callable, Capability, CapabilitySurface, CapabilitySurfaceBuilder, HostFn, SessionFn,
    Signature, PROTOCOL_VERSION,
};
pub use typed::{HostKind, WireArgs, WireValue};
