//! The set of named operations a host exposes.
//!
//! A surface is built once, at startup, and validated eagerly: every name is
//! unique and none collides with a built-in. Binding by name on a connection
//! is then an exact map lookup.
//!
//! # Example
//!
//! ```
//! use hostwire::capability::CapabilitySurface;
//! use hostwire::codec::Point3d;
//!
//! let surface = CapabilitySurface::builder()
//!     .operation("Distance", |(a, b): (Point3d, Point3d)| {
//!         let (dx, dy, dz) = (a.x - b.x, a.y - b.y, a.z - b.z);
//!         Ok((dx * dx + dy * dy + dz * dz).sqrt())
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert!(surface.lookup("Distance").is_some());
//! assert!(surface.lookup("SetFastMode").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::json;

use super::builtin::{builtins, is_reserved, SessionFlags};
use super::typed::{WireArgs, WireValue};
use crate::codec::{Value, WireType};
use crate::error::{HostwireError, Result};

/// Version of the wire protocol described by [`CapabilitySurface::describe`].
pub const PROTOCOL_VERSION: u32 = 1;

/// A host callable taking decoded parameters in declared order.
pub type HostFn = Arc<dyn Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync>;

/// A callable that only touches connection state.
pub type SessionFn = fn(&mut SessionFlags, Vec<Value>) -> anyhow::Result<Value>;

/// Parameter and return types of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<WireType>,
    pub ret: WireType,
}

impl Signature {
    pub fn new(params: Vec<WireType>, ret: WireType) -> Self {
        Self { params, ret }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Where an operation runs.
#[derive(Clone)]
pub enum Callable {
    /// Runs on the host executor.
    Host(HostFn),
    /// Runs on the connection task against its session flags.
    Session(SessionFn),
}

/// One named, typed operation.
#[derive(Clone)]
pub struct Capability {
    name: String,
    signature: Signature,
    callable: Callable,
}

impl Capability {
    pub fn new(name: impl Into<String>, signature: Signature, callable: Callable) -> Self {
        Self {
            name: name.into(),
            signature,
            callable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.callable {
            Callable::Host(_) => "host",
            Callable::Session(_) => "session",
        };
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("callable", &kind)
            .finish()
    }
}

/// Validated, immutable set of operations shared by every connection.
#[derive(Debug)]
pub struct CapabilitySurface {
    operations: HashMap<String, Arc<Capability>>,
    /// Names in registration order, for stable manifests.
    names: Vec<String>,
    /// Every handle kind used by any signature.
    kinds: Vec<&'static str>,
}

impl CapabilitySurface {
    /// Create a new surface builder.
    pub fn builder() -> CapabilitySurfaceBuilder {
        CapabilitySurfaceBuilder::new()
    }

    /// Exact lookup by name.
    pub fn lookup(&self, name: &str) -> Option<&Arc<Capability>> {
        self.operations.get(name)
    }

    /// Handle kinds each connection needs a table for.
    pub fn kinds(&self) -> &[&'static str] {
        &self.kinds
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operation names in registration order, built-ins last.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// JSON manifest of every operation and its signature.
    pub fn describe(&self) -> serde_json::Value {
        let operations: Vec<serde_json::Value> = self
            .names
            .iter()
            .filter_map(|name| self.operations.get(name))
            .map(|cap| {
                let params: Vec<String> =
                    cap.signature.params.iter().map(ToString::to_string).collect();
                json!({
                    "name": cap.name,
                    "params": params,
                    "returns": cap.signature.ret.to_string(),
                    "session": matches!(cap.callable, Callable::Session(_)),
                })
            })
            .collect();

        json!({
            "protocol": PROTOCOL_VERSION,
            "kinds": self.kinds,
            "operations": operations,
        })
    }
}

/// Builder for a [`CapabilitySurface`].
///
/// Registration never fails; problems are reported together by
/// [`build`](Self::build).
pub struct CapabilitySurfaceBuilder {
    entries: Vec<Capability>,
}

impl CapabilitySurfaceBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a typed operation.
    ///
    /// The signature is derived from the closure: `A` is a tuple of
    /// parameter types and `R` the return type.
    pub fn operation<A, R, F>(self, name: &str, f: F) -> Self
    where
        A: WireArgs,
        R: WireValue,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let signature = Signature::new(A::wire_types(), R::wire_type());
        self.operation_raw(name, signature, move |values| {
            let args = A::from_values(values)?;
            Ok(f(args)?.into_value())
        })
    }

    /// Register an operation with an explicit signature.
    ///
    /// `f` receives one value per parameter, already checked against the
    /// signature. Its result is checked against the return type before
    /// encoding.
    pub fn operation_raw<F>(mut self, name: &str, signature: Signature, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries
            .push(Capability::new(name, signature, Callable::Host(Arc::new(f))));
        self
    }

    /// Validate and freeze the surface.
    pub fn build(self) -> Result<CapabilitySurface> {
        let mut operations = HashMap::new();
        let mut names = Vec::new();
        let mut kinds = Vec::new();

        for cap in self.entries {
            if is_reserved(&cap.name) {
                return Err(HostwireError::Capability(format!(
                    "'{}' is reserved for a built-in operation",
                    cap.name
                )));
            }
            if operations.contains_key(&cap.name) {
                return Err(HostwireError::Capability(format!(
                    "'{}' is registered more than once",
                    cap.name
                )));
            }
            insert(&mut operations, &mut names, &mut kinds, cap);
        }
        for cap in builtins() {
            insert(&mut operations, &mut names, &mut kinds, cap);
        }

        Ok(CapabilitySurface {
            operations,
            names,
            kinds,
        })
    }
}

impl Default for CapabilitySurfaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn insert(
    operations: &mut HashMap<String, Arc<Capability>>,
    names: &mut Vec<String>,
    kinds: &mut Vec<&'static str>,
    cap: Capability,
) {
    for ty in cap.signature.params.iter().chain([&cap.signature.ret]) {
        ty.collect_kinds(kinds);
    }
    names.push(cap.name.clone());
    operations.insert(cap.name.clone(), Arc::new(cap));
}
