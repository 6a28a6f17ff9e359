//! Session operations every capability surface exposes.
//!
//! These change connection-wide flags instead of host state, so they run on
//! the connection task and never go through the host executor.

use super::surface::{Callable, Capability, Signature};
use super::typed::WireArgs;
use crate::codec::{Value, WireType};

/// Name of the operation toggling fast-handle mode.
pub const SET_FAST_MODE: &str = "SetFastMode";

/// Name of the operation setting the diagnostic verbosity.
pub const SET_DEBUG_MODE: &str = "SetDebugMode";

/// Connection-wide flags a client can negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Skip echoing newly assigned handles back to the client.
    pub fast_handles: bool,
    /// Diagnostic verbosity requested by the client.
    pub debug_mode: i32,
}

fn set_fast_mode(flags: &mut SessionFlags, args: Vec<Value>) -> anyhow::Result<Value> {
    let (on,) = <(bool,)>::from_values(args)?;
    flags.fast_handles = on;
    Ok(Value::Unit)
}

fn set_debug_mode(flags: &mut SessionFlags, args: Vec<Value>) -> anyhow::Result<Value> {
    let (level,) = <(i32,)>::from_values(args)?;
    flags.debug_mode = level;
    Ok(Value::Unit)
}

/// The built-in session operations.
pub(crate) fn builtins() -> Vec<Capability> {
    vec![
        Capability::new(
            SET_FAST_MODE,
            Signature::new(vec![WireType::Boolean], WireType::Void),
            Callable::Session(set_fast_mode),
        ),
        Capability::new(
            SET_DEBUG_MODE,
            Signature::new(vec![WireType::Int32], WireType::Void),
            Callable::Session(set_debug_mode),
        ),
    ]
}

/// Whether `name` belongs to a built-in operation.
pub fn is_reserved(name: &str) -> bool {
    name == SET_FAST_MODE || name == SET_DEBUG_MODE
}
