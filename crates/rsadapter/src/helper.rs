//! Vendor-specific driver policy.

use std::fmt;

use crate::driver::DriverStatement;
use crate::error::{DriverError, DriverResult};

/// SQLSTATE class for connection exceptions.
const CONNECTION_EXCEPTION_CLASS: &str = "08";
/// Statement completion unknown; the link dropped mid-statement.
const STATEMENT_COMPLETION_UNKNOWN: &str = "40003";

/// Per-vendor policy object consulted by the wrappers.
pub trait DriverHelper: Send + Sync + fmt::Debug {
    /// Whether `error` means the physical connection is unusable.
    fn is_connection_error(&self, error: &DriverError) -> bool;

    /// Vendor-specific rewrite of a driver error before it is classified.
    fn map_error(&self, error: DriverError) -> DriverError {
        error
    }

    /// Reset statement properties before the statement goes back to the cache.
    fn do_statement_cleanup(&self, statement: &mut dyn DriverStatement) -> DriverResult<()> {
        statement.set_fetch_size(0)?;
        statement.set_query_timeout(0)
    }

    /// Whether the isolation level can be switched per handle on a shared
    /// physical connection.
    fn supports_isolation_switching(&self) -> bool {
        false
    }

    fn update_count(&self, statement: &mut dyn DriverStatement) -> DriverResult<i64> {
        statement.update_count()
    }
}

/// Helper for drivers that report standard SQLSTATE values.
#[derive(Debug, Clone, Default)]
pub struct GenericHelper {
    connection_error_codes: Vec<i32>,
    isolation_switching: bool,
}

impl GenericHelper {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connection_error_codes: Vec::new(),
            isolation_switching: false,
        }
    }

    /// Vendor error codes that also count as connection errors.
    #[must_use]
    pub fn with_connection_error_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.connection_error_codes.extend(codes);
        self
    }

    #[must_use]
    pub const fn with_isolation_switching(mut self, enabled: bool) -> Self {
        self.isolation_switching = enabled;
        self
    }
}

impl DriverHelper for GenericHelper {
    fn is_connection_error(&self, error: &DriverError) -> bool {
        let by_state = error.sql_state().is_some_and(|state| {
            state.starts_with(CONNECTION_EXCEPTION_CLASS) || state == STATEMENT_COMPLETION_UNKNOWN
        });
        by_state || self.connection_error_codes.contains(&error.vendor_code())
    }

    fn supports_isolation_switching(&self) -> bool {
        self.isolation_switching
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_by_sql_state() {
        let helper = GenericHelper::new();
        assert!(helper.is_connection_error(&DriverError::new("lost").with_sql_state("08S01")));
        assert!(helper.is_connection_error(&DriverError::new("unknown").with_sql_state("40003")));
        assert!(!helper.is_connection_error(&DriverError::new("dup").with_sql_state("23505")));
        assert!(!helper.is_connection_error(&DriverError::new("no state")));
    }

    #[test]
    fn test_connection_error_by_vendor_code() {
        let helper = GenericHelper::new().with_connection_error_codes([-4499, 17002]);
        assert!(helper.is_connection_error(&DriverError::new("io").with_vendor_code(17002)));
        assert!(!helper.is_connection_error(&DriverError::new("io").with_vendor_code(1)));
    }

    #[test]
    fn test_isolation_switching_flag() {
        assert!(!GenericHelper::new().supports_isolation_switching());
        assert!(GenericHelper::new().with_isolation_switching(true).supports_isolation_switching());
    }
}
