//! Process-wide one-time warnings.
//!
//! Setting catalog, holdability, read-only or the type map changes how shared
//! connections are matched. Users are told once per process, however many
//! handles or threads hit the setter.

use std::sync::atomic::{AtomicBool, Ordering};

static WARNED_ABOUT_CATALOG_MATCHING: AtomicBool = AtomicBool::new(false);
static WARNED_ABOUT_HOLDABILITY_MATCHING: AtomicBool = AtomicBool::new(false);
static WARNED_ABOUT_READ_ONLY_MATCHING: AtomicBool = AtomicBool::new(false);
static WARNED_ABOUT_TYPE_MAP_MATCHING: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchingWarning {
    Catalog,
    Holdability,
    ReadOnly,
    TypeMap,
}

impl MatchingWarning {
    const fn flag(self) -> &'static AtomicBool {
        match self {
            Self::Catalog => &WARNED_ABOUT_CATALOG_MATCHING,
            Self::Holdability => &WARNED_ABOUT_HOLDABILITY_MATCHING,
            Self::ReadOnly => &WARNED_ABOUT_READ_ONLY_MATCHING,
            Self::TypeMap => &WARNED_ABOUT_TYPE_MAP_MATCHING,
        }
    }

    const fn property(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Holdability => "holdability",
            Self::ReadOnly => "read-only",
            Self::TypeMap => "type map",
        }
    }

    /// Log the warning if this is the first time; returns whether it logged.
    pub(crate) fn warn_once(self) -> bool {
        let first = self
            .flag()
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            tracing::info!(
                property = self.property(),
                "shared connections are matched on the original request by default; \
                 set connection_sharing = \"match-current-state\" to match on {} changes",
                self.property()
            );
        }
        first
    }

    #[cfg(test)]
    pub(crate) fn has_warned(self) -> bool {
        self.flag().load(Ordering::Acquire)
    }
}
