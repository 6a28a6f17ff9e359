//! Per-connection handle tables.
//!
//! A handle is the index of a host object in its kind's table. Tables only
//! grow: entries are appended and never removed, so an index stays valid
//! until the connection (and every table with it) is dropped.
//!
//! Interning never deduplicates. Handing out the same object twice yields two
//! handles; the client mirrors positions, not identities.

use std::collections::HashMap;

use crate::codec::HostObject;
use crate::error::{HostwireError, Result};

/// Append-only mapping from integer handle to host object.
#[derive(Debug)]
pub struct HandleTable<T> {
    kind: &'static str,
    entries: Vec<T>,
}

impl<T> HandleTable<T> {
    /// Create an empty table for the given kind.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    /// Kind name of the objects in this table.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Append an object and return its handle.
    pub fn intern(&mut self, obj: T) -> Result<i32> {
        let handle = i32::try_from(self.entries.len()).map_err(|_| {
            HostwireError::HandleOutOfRange {
                kind: self.kind.to_string(),
                handle: i32::MAX,
                len: self.entries.len(),
            }
        })?;
        self.entries.push(obj);
        Ok(handle)
    }

    /// Look up a handle.
    ///
    /// A negative or too large handle means both ends disagree about the
    /// table contents. There is no way back from that, so callers treat the
    /// error as fatal for the connection.
    pub fn resolve(&self, handle: i32) -> Result<&T> {
        usize::try_from(handle)
            .ok()
            .and_then(|idx| self.entries.get(idx))
            .ok_or_else(|| HostwireError::HandleOutOfRange {
                kind: self.kind.to_string(),
                handle,
                len: self.entries.len(),
            })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One handle table per referenceable kind.
#[derive(Debug, Default)]
pub struct HandleTables {
    tables: HashMap<&'static str, HandleTable<HostObject>>,
}

impl HandleTables {
    /// Create empty tables for every listed kind.
    pub fn with_kinds(kinds: &[&'static str]) -> Self {
        Self {
            tables: kinds
                .iter()
                .map(|&kind| (kind, HandleTable::new(kind)))
                .collect(),
        }
    }

    /// Intern an object into the table of `kind`.
    pub fn intern(&mut self, kind: &'static str, obj: HostObject) -> Result<i32> {
        self.tables
            .get_mut(kind)
            .ok_or_else(|| HostwireError::UnknownKind(kind.to_string()))?
            .intern(obj)
    }

    /// Resolve a handle in the table of `kind`.
    pub fn resolve(&self, kind: &str, handle: i32) -> Result<&HostObject> {
        self.tables
            .get(kind)
            .ok_or_else(|| HostwireError::UnknownKind(kind.to_string()))?
            .resolve(handle)
    }

    /// The table for `kind`, if one exists.
    pub fn table(&self, kind: &str) -> Option<&HandleTable<HostObject>> {
        self.tables.get(kind)
    }

    /// Number of entries in the table of `kind` (0 for unknown kinds).
    pub fn len_of(&self, kind: &str) -> usize {
        self.tables.get(kind).map_or(0, HandleTable::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_handles_are_sequential() {
        let mut table = HandleTable::new("shape");
        let names = ["a", "b", "c", "d", "e"];

        for (i, name) in names.iter().enumerate() {
            assert_eq!(table.intern(*name).unwrap(), i as i32);
        }

        for (k, name) in names.iter().enumerate() {
            assert_eq!(table.resolve(k as i32).unwrap(), name);
        }
        assert_eq!(table.len(), names.len());
    }

    #[test]
    fn test_resolve_past_end_fails() {
        let mut table = HandleTable::new("shape");
        table.intern(1u8).unwrap();
        table.intern(2u8).unwrap();

        let err = table.resolve(2).unwrap_err();
        assert!(matches!(
            err,
            HostwireError::HandleOutOfRange { handle: 2, len: 2, .. }
        ));
    }

    #[test]
    fn test_resolve_negative_fails() {
        let mut table = HandleTable::new("material");
        table.intern("glass").unwrap();

        assert!(matches!(
            table.resolve(-1),
            Err(HostwireError::HandleOutOfRange { handle: -1, .. })
        ));
    }

    #[test]
    fn test_intern_never_deduplicates() {
        let mut tables = HandleTables::with_kinds(&["shape"]);
        let obj: HostObject = Arc::new(42u32);

        let h1 = tables.intern("shape", obj.clone()).unwrap();
        let h2 = tables.intern("shape", obj.clone()).unwrap();

        assert_eq!((h1, h2), (0, 1));
        assert!(Arc::ptr_eq(tables.resolve("shape", 0).unwrap(), &obj));
        assert!(Arc::ptr_eq(tables.resolve("shape", 1).unwrap(), &obj));
    }

    #[test]
    fn test_tables_are_independent_per_kind() {
        let mut tables = HandleTables::with_kinds(&["shape", "material"]);

        tables.intern("shape", Arc::new(1u8)).unwrap();
        tables.intern("shape", Arc::new(2u8)).unwrap();
        let m = tables.intern("material", Arc::new("steel")).unwrap();

        assert_eq!(m, 0);
        assert_eq!(tables.len_of("shape"), 2);
        assert_eq!(tables.len_of("material"), 1);
        assert!(tables.resolve("material", 1).is_err());
    }

    #[test]
    fn test_unknown_kind() {
        let mut tables = HandleTables::with_kinds(&["shape"]);
        assert!(matches!(
            tables.intern("level", Arc::new(0u8)),
            Err(HostwireError::UnknownKind(_))
        ));
        assert!(tables.table("level").is_none());
        assert_eq!(tables.len_of("level"), 0);
    }
}
