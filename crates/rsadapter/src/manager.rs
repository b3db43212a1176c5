//! Pool, transaction manager and event listener contracts.
//!
//! Implementations must not call back into a connection handle from
//! [`ConnectionEventListener::connection_event`] or
//! [`LazyEnlistment::lazy_enlist`]; both run while the handle is busy.
//! [`ConnectionManager::associate_connection`] is the exception: it is called
//! with the handle idle and is expected to reassociate it.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::connection::{Connection, HandleId};
use crate::error::ResourceError;
use crate::factory::ConnectionFactory;
use crate::managed::{ConnectionRequestInfo, ManagedConnection};

/// The pool-side connection manager.
pub trait ConnectionManager: Send + Sync + fmt::Debug {
    /// Hand out a new handle on a matching managed connection.
    fn allocate_connection(
        &self,
        factory: &Arc<ConnectionFactory>,
        request_info: &ConnectionRequestInfo,
    ) -> Result<Connection, ResourceError>;

    /// Bind an inactive handle to some managed connection, normally through
    /// [`ManagedConnection::associate_connection`].
    fn associate_connection(
        &self,
        handle: &Connection,
        factory: &Arc<ConnectionFactory>,
        request_info: Option<&ConnectionRequestInfo>,
    ) -> Result<(), ResourceError>;

    /// A handle that was never reactivated after dissociation has closed.
    fn inactive_connection_closed(&self, handle: HandleId, factory: &ConnectionFactory);

    /// Lazy enlistment support; `None` when the manager cannot enlist lazily.
    fn lazy_enlistment(&self) -> Option<&dyn LazyEnlistment> {
        None
    }
}

/// Deferred enlistment of a managed connection into an ambient global
/// transaction.
pub trait LazyEnlistment: Send + Sync {
    fn lazy_enlist(&self, managed: &Arc<ManagedConnection>) -> Result<(), ResourceError>;
}

/// View of the transaction manager.
pub trait TransactionServices: Send + Sync + fmt::Debug {
    /// Whether the calling context has a global transaction.
    fn is_global_transaction_active(&self) -> bool;

    /// Expiry of the current global transaction, if it has a timeout.
    fn global_transaction_deadline(&self) -> Option<Instant>;
}

/// Transaction services for a resource that is never used in global
/// transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGlobalTransactions;

impl TransactionServices for NoGlobalTransactions {
    fn is_global_transaction_active(&self) -> bool {
        false
    }

    fn global_transaction_deadline(&self) -> Option<Instant> {
        None
    }
}

/// Events fired by a managed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    LocalTransactionStarted { handle: HandleId },
    LocalTransactionCommitted { handle: HandleId },
    LocalTransactionRolledBack { handle: HandleId },
    ConnectionClosed { handle: HandleId },
    /// The physical connection should be evicted.
    ConnectionErrorOccurred { message: String },
}

impl ConnectionEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LocalTransactionStarted { .. } => "LOCAL_TRANSACTION_STARTED",
            Self::LocalTransactionCommitted { .. } => "LOCAL_TRANSACTION_COMMITTED",
            Self::LocalTransactionRolledBack { .. } => "LOCAL_TRANSACTION_ROLLEDBACK",
            Self::ConnectionClosed { .. } => "CONNECTION_CLOSED",
            Self::ConnectionErrorOccurred { .. } => "CONNECTION_ERROR_OCCURRED",
        }
    }
}

pub trait ConnectionEventListener: Send + Sync {
    fn connection_event(&self, event: &ConnectionEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let handle = HandleId::next();
        assert_eq!(
            ConnectionEvent::LocalTransactionStarted { handle }.name(),
            "LOCAL_TRANSACTION_STARTED"
        );
        assert_eq!(
            ConnectionEvent::ConnectionErrorOccurred {
                message: String::new()
            }
            .name(),
            "CONNECTION_ERROR_OCCURRED"
        );
    }

    #[test]
    fn test_no_global_transactions() {
        let tx = NoGlobalTransactions;
        assert!(!tx.is_global_transaction_active());
        assert!(tx.global_transaction_deadline().is_none());
    }
}
