//! Lifecycle state shared by every wrapper kind.
//!
//! A wrapper is `ACTIVE`, `INACTIVE` (connection handles only) or `CLOSED`.
//! Children are tracked as one fast-path slot plus an ordered list, the
//! layout used by statements for their current and additional result sets
//! and by connections for their metadata wrapper and statements.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::Result;

/// Lifecycle state of a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WrapperState {
    Active,
    /// Dissociated from a managed connection. Connection handles only.
    Inactive,
    /// Terminal.
    Closed,
}

impl fmt::Display for WrapperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Inactive => f.write_str("INACTIVE"),
            Self::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Kind of wrapper, used in diagnostics and closed-object errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WrapperKind {
    Connection,
    Statement,
    PreparedStatement,
    CallableStatement,
    ResultSet,
    DatabaseMetaData,
    VendorInterface,
}

impl fmt::Display for WrapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "Connection",
            Self::Statement => "Statement",
            Self::PreparedStatement => "PreparedStatement",
            Self::CallableStatement => "CallableStatement",
            Self::ResultSet => "ResultSet",
            Self::DatabaseMetaData => "DatabaseMetaData",
            Self::VendorInterface => "VendorInterface",
        };
        f.write_str(name)
    }
}

/// Identity of a child wrapper inside a connection handle's arena.
///
/// Ids are allocated from a per-handle counter and never reused, so a stale
/// id can never alias a newer wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WrapperId(pub(crate) u64);

impl fmt::Display for WrapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Children owned by a wrapper.
#[derive(Debug, Clone)]
pub(crate) struct ChildSet<T> {
    primary: Option<T>,
    list: Vec<T>,
}

impl<T> Default for ChildSet<T> {
    fn default() -> Self {
        Self {
            primary: None,
            list: Vec::new(),
        }
    }
}

impl<T: Copy + PartialEq> ChildSet<T> {
    pub(crate) const fn primary(&self) -> Option<T> {
        self.primary
    }

    /// Place `child` in the primary slot if it is free, else append it to the
    /// list.
    pub(crate) fn add(&mut self, child: T) {
        if self.primary.is_none() {
            self.primary = Some(child);
        } else {
            self.list.push(child);
        }
    }

    pub(crate) fn set_primary(&mut self, child: T) {
        self.primary = Some(child);
    }

    pub(crate) fn push(&mut self, child: T) {
        self.list.push(child);
    }

    /// Detach `child` from whichever slot holds it.
    pub(crate) fn remove(&mut self, child: T) -> bool {
        if self.primary == Some(child) {
            self.primary = None;
            return true;
        }
        if let Some(pos) = self.list.iter().position(|c| *c == child) {
            self.list.remove(pos);
            return true;
        }
        false
    }

    /// The most recently added list child, falling back to the primary slot.
    pub(crate) fn current(&self) -> Option<T> {
        self.list.last().copied().or(self.primary)
    }

    pub(crate) fn contains(&self, child: T) -> bool {
        self.primary == Some(child) || self.list.contains(&child)
    }

    pub(crate) fn len(&self) -> usize {
        usize::from(self.primary.is_some()) + self.list.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.primary.is_none() && self.list.is_empty()
    }

    /// List children in creation order, without the primary slot.
    pub(crate) fn list(&self) -> &[T] {
        &self.list
    }

    /// Snapshot of all children, primary first.
    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.primary.iter().chain(self.list.iter()).copied().collect()
    }
}

/// Diagnostic snapshot of a wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct Introspection {
    pub kind: WrapperKind,
    pub state: WrapperState,
    pub children: usize,
    pub details: BTreeMap<&'static str, serde_json::Value>,
}

impl Introspection {
    pub(crate) fn new(kind: WrapperKind, state: WrapperState, children: usize) -> Self {
        Self {
            kind,
            state,
            children,
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub(crate) fn with(mut self, name: &'static str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(name, value.into());
        self
    }

    /// Render as a JSON document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_set_primary_then_list() {
        let mut children = ChildSet::default();
        children.add(1);
        children.add(2);
        children.add(3);

        assert_eq!(children.primary(), Some(1));
        assert_eq!(children.list(), &[2, 3]);
        assert_eq!(children.len(), 3);
        assert_eq!(children.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn test_child_set_remove() {
        let mut children = ChildSet::default();
        children.add(1);
        children.add(2);

        assert!(children.remove(1));
        assert_eq!(children.primary(), None);
        assert!(children.contains(2));
        assert!(!children.remove(1));
        assert!(children.remove(2));
        assert!(children.is_empty());
    }

    #[test]
    fn test_child_set_current() {
        let mut children: ChildSet<u32> = ChildSet::default();
        assert_eq!(children.current(), None);

        children.set_primary(7);
        assert_eq!(children.current(), Some(7));

        children.push(8);
        assert_eq!(children.current(), Some(8));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WrapperState::Inactive.to_string(), "INACTIVE");
        assert_eq!(WrapperKind::CallableStatement.to_string(), "CallableStatement");
        assert_eq!(WrapperId(4).to_string(), "#4");
    }

    #[test]
    fn test_introspection_json() {
        let json = Introspection::new(WrapperKind::Statement, WrapperState::Active, 2)
            .with("fetch_size", 100)
            .to_json()
            .unwrap();
        assert!(json.contains("\"ACTIVE\""));
        assert!(json.contains("\"fetch_size\": 100"));
    }
}
