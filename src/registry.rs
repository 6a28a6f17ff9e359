//! Per-connection table of bound operations.
//!
//! Index 0 is always the bind operation. Every successful bind appends a new
//! entry, even for a name bound before, and entries are never removed, so an
//! id stays valid for the connection's lifetime.

use std::sync::Arc;

use crate::capability::{Capability, CapabilitySurface};

/// Id of the built-in bind-by-name operation.
pub const BIND_OPERATION_ID: i32 = 0;

/// Reply to a bind request for an unknown name.
pub const BIND_NOT_FOUND: i32 = -1;

/// One registry entry.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Bind-by-name; takes a String and returns an Int32 id.
    Bind,
    /// A capability bound on this connection.
    Bound(Arc<Capability>),
}

/// Append-only id to operation table.
pub struct OperationRegistry {
    surface: Arc<CapabilitySurface>,
    entries: Vec<Operation>,
}

impl OperationRegistry {
    /// Create a registry holding only the bind operation.
    pub fn new(surface: Arc<CapabilitySurface>) -> Self {
        Self {
            surface,
            entries: vec![Operation::Bind],
        }
    }

    /// Bind `name` and return its new id.
    ///
    /// Returns `None` for names the surface does not know; the registry is
    /// left unchanged in that case.
    pub fn bind(&mut self, name: &str) -> Option<i32> {
        let cap = self.surface.lookup(name)?;
        let id = i32::try_from(self.entries.len()).ok()?;
        self.entries.push(Operation::Bound(cap.clone()));
        Some(id)
    }

    /// Look up an id read from the wire.
    pub fn get(&self, id: i32) -> Option<&Operation> {
        usize::try_from(id).ok().and_then(|i| self.entries.get(i))
    }

    /// Number of entries, the bind operation included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn surface(&self) -> &Arc<CapabilitySurface> {
        &self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> OperationRegistry {
        let surface = CapabilitySurface::builder()
            .operation("Add", |(a, b): (i32, i32)| Ok(a + b))
            .operation("Hello", |(): ()| Ok("hello".to_string()))
            .build()
            .unwrap();
        OperationRegistry::new(Arc::new(surface))
    }

    #[test]
    fn test_starts_with_bind() {
        let reg = registry();
        assert_eq!(reg.len(), 1);
        assert!(matches!(reg.get(BIND_OPERATION_ID), Some(Operation::Bind)));
    }

    #[test]
    fn test_bind_appends() {
        let mut reg = registry();
        assert_eq!(reg.bind("Add"), Some(1));
        assert_eq!(reg.bind("Hello"), Some(2));

        match reg.get(2) {
            Some(Operation::Bound(cap)) => assert_eq!(cap.name(), "Hello"),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[test]
    fn test_bind_is_not_idempotent() {
        let mut reg = registry();
        let first = reg.bind("Add").unwrap();
        let second = reg.bind("Add").unwrap();

        assert_ne!(first, second);
        assert!(matches!(reg.get(first), Some(Operation::Bound(_))));
        assert!(matches!(reg.get(second), Some(Operation::Bound(_))));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_unknown_name_leaves_registry_unchanged() {
        let mut reg = registry();
        assert_eq!(reg.bind("NoSuchOperation"), None);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_get_out_of_range() {
        let mut reg = registry();
        reg.bind("Add");
        assert!(reg.get(-1).is_none());
        assert!(reg.get(2).is_none());
        assert!(reg.get(i32::MAX).is_none());
    }

    #[test]
    fn test_builtins_are_bindable() {
        let mut reg = registry();
        assert_eq!(reg.bind("SetFastMode"), Some(1));
        assert_eq!(reg.bind("SetDebugMode"), Some(2));
    }
}
