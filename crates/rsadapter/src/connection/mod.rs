//! Connection handles.
//!
//! A [`Connection`] is the short-lived handle an application holds. It is
//! bound to a [`ManagedConnection`](crate::managed::ManagedConnection) while
//! `ACTIVE`, can be dissociated to `INACTIVE` by the pool, and is lazily
//! reassociated with some managed connection on its next use.
//!
//! All state of a handle and of its statements and result sets lives in one
//! `HandleCore` behind a mutex. Child wrappers are lightweight ids into that
//! core.

mod inner;
mod handle;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub(crate) use self::inner::{HandleCore, SharedCore};
pub use self::handle::{Connection, WeakConnection};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandleId(u64);

impl HandleId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
