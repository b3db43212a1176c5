//! Error hierarchy for rsadapter.
//!
//! Follows the canonical error struct pattern: [`Error`] wraps a private
//! `ErrorKind` and exposes `is_xxx()` predicates for classification. Errors
//! raised by collaborators keep their own types ([`DriverError`] for the
//! vendor driver, [`ResourceError`] for the pool boundary) and are chained as
//! sources so callers can walk the cause chain.

use std::fmt;

use thiserror::Error;

use crate::managed::TransactionState;
use crate::state::{WrapperKind, WrapperState};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Result alias for driver collaborator calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// SQLSTATE reported for operations that are invalid in the current
/// transaction context.
const SQLSTATE_INVALID_TRANSACTION_STATE: &str = "25000";
/// SQLSTATE for a connection that no longer exists.
const SQLSTATE_CONNECTION_DOES_NOT_EXIST: &str = "08003";
/// SQLSTATE for a communication link failure.
const SQLSTATE_CONNECTION_FAILURE: &str = "08006";
/// SQLSTATE for a feature the driver or wrapper does not support.
const SQLSTATE_FEATURE_NOT_SUPPORTED: &str = "0A000";

/// Root error type for rsadapter.
///
/// # Example
///
/// ```rust,ignore
/// match conn.commit() {
///     Err(e) if e.is_stale_connection() => pool.purge(),
///     Err(e) if e.is_closed() => return Err(e),
///     other => other?,
/// }
/// ```
#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error {
    kind: ErrorKind,
}

/// Internal error classification.
#[derive(Error, Debug)]
#[non_exhaustive]
pub(crate) enum ErrorKind {
    #[error("{object} is closed")]
    Closed { object: WrapperKind },

    #[error("stale connection: the connection pool was purged")]
    StaleConnection,

    #[error("sharing violation")]
    SharingViolation(#[source] SharingViolation),

    #[error("{operation} is not valid during a global transaction")]
    NotValidInGlobalTransaction { operation: &'static str },

    #[error("{operation} is not valid in transaction state {state}")]
    InvalidTransactionState {
        operation: &'static str,
        state: TransactionState,
    },

    #[error("transaction timed out {elapsed_ms} ms ago")]
    TransactionTimeout { elapsed_ms: u64 },

    #[error("connection failure: {message}")]
    ConnectionFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Driver(DriverError),

    #[error("batch update failed: {0}")]
    BatchUpdate(DriverError),

    #[error("resource error: {0}")]
    Resource(#[source] ResourceError),

    #[error("cannot reassociate: {children} child wrapper(s) still open")]
    ChildrenStillOpen { children: usize },

    #[error("reserved handle cannot reassociate with a different managed connection")]
    ReservationMismatch,

    #[error("cannot reassociate a handle in state {state}")]
    CannotReassociate { state: WrapperState },

    #[error("{operation} is not an application method")]
    AccessDenied { operation: &'static str },

    #[error("{feature} is not supported")]
    NotSupported { feature: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    // ═══════════════════════════════════════════════════════════════════════
    // Constructors
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub const fn closed(object: WrapperKind) -> Self {
        Self {
            kind: ErrorKind::Closed { object },
        }
    }

    #[must_use]
    pub const fn stale_connection() -> Self {
        Self {
            kind: ErrorKind::StaleConnection,
        }
    }

    /// Create a sharing violation for `property` on a connection shared by
    /// `handles` handles.
    #[must_use]
    pub const fn sharing_violation(property: &'static str, handles: usize) -> Self {
        Self {
            kind: ErrorKind::SharingViolation(SharingViolation { property, handles }),
        }
    }

    #[must_use]
    pub const fn not_valid_in_global_transaction(operation: &'static str) -> Self {
        Self {
            kind: ErrorKind::NotValidInGlobalTransaction { operation },
        }
    }

    #[must_use]
    pub const fn invalid_transaction_state(
        operation: &'static str,
        state: TransactionState,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidTransactionState { operation, state },
        }
    }

    #[must_use]
    pub const fn transaction_timeout(elapsed_ms: u64) -> Self {
        Self {
            kind: ErrorKind::TransactionTimeout { elapsed_ms },
        }
    }

    #[must_use]
    pub fn connection_failure(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind: ErrorKind::ConnectionFailure {
                message: message.into(),
                source,
            },
        }
    }

    /// Wrap a driver error that has already been through exception mapping.
    #[must_use]
    pub const fn driver(error: DriverError) -> Self {
        Self {
            kind: ErrorKind::Driver(error),
        }
    }

    /// Wrap a batch failure. The driver error is kept as-is so per-statement
    /// update counts stay available.
    #[must_use]
    pub const fn batch_update(error: DriverError) -> Self {
        Self {
            kind: ErrorKind::BatchUpdate(error),
        }
    }

    #[must_use]
    pub const fn resource(error: ResourceError) -> Self {
        Self {
            kind: ErrorKind::Resource(error),
        }
    }

    #[must_use]
    pub const fn children_still_open(children: usize) -> Self {
        Self {
            kind: ErrorKind::ChildrenStillOpen { children },
        }
    }

    #[must_use]
    pub const fn reservation_mismatch() -> Self {
        Self {
            kind: ErrorKind::ReservationMismatch,
        }
    }

    #[must_use]
    pub const fn cannot_reassociate(state: WrapperState) -> Self {
        Self {
            kind: ErrorKind::CannotReassociate { state },
        }
    }

    #[must_use]
    pub const fn access_denied(operation: &'static str) -> Self {
        Self {
            kind: ErrorKind::AccessDenied { operation },
        }
    }

    #[must_use]
    pub fn not_supported(feature: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotSupported {
                feature: feature.into(),
            },
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Config(message.into()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Predicate Methods (is_xxx)
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed { .. })
    }

    #[must_use]
    pub const fn is_stale_connection(&self) -> bool {
        matches!(self.kind, ErrorKind::StaleConnection)
    }

    #[must_use]
    pub const fn is_sharing_violation(&self) -> bool {
        matches!(self.kind, ErrorKind::SharingViolation(_))
    }

    #[must_use]
    pub const fn is_not_valid_in_global_transaction(&self) -> bool {
        matches!(self.kind, ErrorKind::NotValidInGlobalTransaction { .. })
    }

    #[must_use]
    pub const fn is_invalid_transaction_state(&self) -> bool {
        matches!(self.kind, ErrorKind::InvalidTransactionState { .. })
    }

    /// Returns true for any error caused by the current transaction context.
    #[must_use]
    pub const fn is_transaction_state(&self) -> bool {
        self.is_not_valid_in_global_transaction() || self.is_invalid_transaction_state()
    }

    #[must_use]
    pub const fn is_transaction_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TransactionTimeout { .. })
    }

    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::ConnectionFailure { .. })
    }

    #[must_use]
    pub const fn is_driver(&self) -> bool {
        matches!(self.kind, ErrorKind::Driver(_))
    }

    #[must_use]
    pub const fn is_batch_update(&self) -> bool {
        matches!(self.kind, ErrorKind::BatchUpdate(_))
    }

    #[must_use]
    pub const fn is_resource(&self) -> bool {
        matches!(self.kind, ErrorKind::Resource(_))
    }

    #[must_use]
    pub const fn is_children_still_open(&self) -> bool {
        matches!(self.kind, ErrorKind::ChildrenStillOpen { .. })
    }

    #[must_use]
    pub const fn is_reservation_mismatch(&self) -> bool {
        matches!(self.kind, ErrorKind::ReservationMismatch)
    }

    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self.kind, ErrorKind::AccessDenied { .. })
    }

    #[must_use]
    pub const fn is_not_supported(&self) -> bool {
        matches!(self.kind, ErrorKind::NotSupported { .. })
    }

    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self.kind, ErrorKind::Config(_))
    }

    #[must_use]
    pub const fn is_serialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Serialization(_))
    }

    /// Internal-consistency faults: a container bug rather than an
    /// application or transient condition.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ChildrenStillOpen { .. }
                | ErrorKind::ReservationMismatch
                | ErrorKind::CannotReassociate { .. }
        )
    }

    /// The caller should discard the connection and retry with a fresh one.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::StaleConnection | ErrorKind::ConnectionFailure { .. }
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// SQLSTATE for this error, when one applies.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Closed { .. } => Some(SQLSTATE_CONNECTION_DOES_NOT_EXIST),
            ErrorKind::StaleConnection | ErrorKind::ConnectionFailure { .. } => {
                Some(SQLSTATE_CONNECTION_FAILURE)
            }
            ErrorKind::NotValidInGlobalTransaction { .. }
            | ErrorKind::InvalidTransactionState { .. }
            | ErrorKind::TransactionTimeout { .. } => Some(SQLSTATE_INVALID_TRANSACTION_STATE),
            ErrorKind::NotSupported { .. } => Some(SQLSTATE_FEATURE_NOT_SUPPORTED),
            ErrorKind::Driver(e) | ErrorKind::BatchUpdate(e) => e.sql_state(),
            _ => None,
        }
    }

    /// The underlying driver error for driver and batch failures.
    #[must_use]
    pub const fn driver_error(&self) -> Option<&DriverError> {
        match &self.kind {
            ErrorKind::Driver(e) | ErrorKind::BatchUpdate(e) => Some(e),
            _ => None,
        }
    }

    /// Per-statement update counts of a failed batch.
    #[must_use]
    pub fn update_counts(&self) -> Option<&[i64]> {
        match &self.kind {
            ErrorKind::BatchUpdate(e) => e.update_counts(),
            _ => None,
        }
    }
}

/// Adapter errors that crossed the manager boundary come back in their
/// original kind.
impl From<ResourceError> for Error {
    fn from(error: ResourceError) -> Self {
        match error {
            ResourceError::Adapter(inner) => *inner,
            other => Self::resource(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::Serialization(error),
        }
    }
}

/// Cause attached to sharing-violation errors.
///
/// Pool implementations look for this type in the source chain to tell a
/// sharing conflict apart from other setter failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot change {property} while {handles} handles share the managed connection")]
pub struct SharingViolation {
    property: &'static str,
    handles: usize,
}

impl SharingViolation {
    #[must_use]
    pub const fn property(&self) -> &'static str {
        self.property
    }

    #[must_use]
    pub const fn handles(&self) -> usize {
        self.handles
    }
}

/// Error reported by the vendor driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    sql_state: Option<String>,
    vendor_code: i32,
    update_counts: Option<Vec<i64>>,
}

impl DriverError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            vendor_code: 0,
            update_counts: None,
        }
    }

    /// Create a batch failure carrying the per-statement outcome.
    #[must_use]
    pub fn batch_update(message: impl Into<String>, update_counts: Vec<i64>) -> Self {
        Self {
            update_counts: Some(update_counts),
            ..Self::new(message)
        }
    }

    #[must_use]
    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    #[must_use]
    pub const fn with_vendor_code(mut self, vendor_code: i32) -> Self {
        self.vendor_code = vendor_code;
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    #[must_use]
    pub const fn vendor_code(&self) -> i32 {
        self.vendor_code
    }

    #[must_use]
    pub fn update_counts(&self) -> Option<&[i64]> {
        self.update_counts.as_deref()
    }

    #[must_use]
    pub const fn is_batch_update(&self) -> bool {
        self.update_counts.is_some()
    }
}

/// XA error codes relevant to enlistment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaErrorCode {
    /// Resource manager failure; the physical connection is presumed dead.
    RmFail,
    /// Resource manager error.
    RmErr,
    /// Protocol violation.
    Proto,
    /// Any other XA code.
    Other(i32),
}

impl fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RmFail => f.write_str("XAER_RMFAIL"),
            Self::RmErr => f.write_str("XAER_RMERR"),
            Self::Proto => f.write_str("XAER_PROTO"),
            Self::Other(code) => write!(f, "XA error {code}"),
        }
    }
}

/// XA failure reported by the transaction manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}")]
pub struct XaError {
    code: XaErrorCode,
}

impl XaError {
    #[must_use]
    pub const fn new(code: XaErrorCode) -> Self {
        Self { code }
    }

    #[must_use]
    pub const fn code(&self) -> XaErrorCode {
        self.code
    }
}

/// Error at the connection-manager boundary.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("{0}")]
    General(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("enlistment failed: {message}")]
    Enlistment {
        message: String,
        #[source]
        xa: Option<XaError>,
    },

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Adapter(Box<Error>),
}

impl ResourceError {
    #[must_use]
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    #[must_use]
    pub fn enlistment(message: impl Into<String>, xa: Option<XaError>) -> Self {
        Self::Enlistment {
            message: message.into(),
            xa,
        }
    }

    /// XA code of an enlistment failure, if one was recorded.
    #[must_use]
    pub const fn xa_code(&self) -> Option<XaErrorCode> {
        match self {
            Self::Enlistment { xa: Some(xa), .. } => Some(xa.code()),
            _ => None,
        }
    }

    /// Returns true if the failure was a resource-manager failure.
    #[must_use]
    pub const fn is_rm_fail(&self) -> bool {
        matches!(self.xa_code(), Some(XaErrorCode::RmFail))
    }
}

impl From<Error> for ResourceError {
    fn from(error: Error) -> Self {
        Self::Adapter(Box::new(error))
    }
}
