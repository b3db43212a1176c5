//! Data source configuration and its builder

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How handles are matched to shared managed connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionSharing {
    /// Match on the properties of the original connection request.
    #[default]
    MatchOriginalRequest,
    /// Match on the current state of the connection; setters update the
    /// request info used for matching.
    MatchCurrentState,
}

impl FromStr for ConnectionSharing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "match-original-request" | "original" => Ok(Self::MatchOriginalRequest),
            "match-current-state" | "current" => Ok(Self::MatchCurrentState),
            other => Err(format!("unknown connection sharing mode: {other}")),
        }
    }
}

/// Treatment of `set_auto_commit(true)` and isolation changes while a local
/// transaction is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalTransactionSwitching {
    /// Auto-commit on commits the transaction first; isolation changes are
    /// forwarded and left to the driver.
    #[default]
    Permissive,
    /// Both are rejected while the local transaction is active.
    Strict,
}

impl FromStr for LocalTransactionSwitching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "permissive" => Ok(Self::Permissive),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown local transaction switching policy: {other}")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Data source configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DataSourceConfig {
    /// Statements cached per physical connection; 0 disables caching.
    pub statement_cache_size: usize,
    /// Fold the isolation level into statement cache keys.
    pub statement_cache_isolation_level: bool,
    pub enable_multithreaded_access_detection: bool,
    pub sync_query_timeout_with_transaction_timeout: bool,
    /// Default query timeout applied to new statements.
    pub query_timeout: Option<Duration>,
    pub begin_tran_for_result_set_scrolling_apis: bool,
    pub begin_tran_for_vendor_apis: bool,
    /// Free large objects returned by a result set when it closes.
    pub free_resources_on_close: bool,
    pub connection_sharing: ConnectionSharing,
    /// Whether connections participate in transactions at all.
    pub transactional: bool,
    pub local_transaction_switching: LocalTransactionSwitching,
    pub logging: LoggingConfig,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            statement_cache_size: 10,
            statement_cache_isolation_level: false,
            enable_multithreaded_access_detection: false,
            sync_query_timeout_with_transaction_timeout: false,
            query_timeout: None,
            begin_tran_for_result_set_scrolling_apis: true,
            begin_tran_for_vendor_apis: true,
            free_resources_on_close: false,
            connection_sharing: ConnectionSharing::MatchOriginalRequest,
            transactional: true,
            local_transaction_switching: LocalTransactionSwitching::Permissive,
            logging: LoggingConfig::default(),
        }
    }
}

impl DataSourceConfig {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Default query timeout in whole seconds, rounded up.
    #[must_use]
    pub fn query_timeout_secs(&self) -> Option<u32> {
        self.query_timeout
            .map(|t| u32::try_from(t.as_millis().div_ceil(1000)).unwrap_or(u32::MAX))
    }
}

/// Fluent builder for [`DataSourceConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: DataSourceConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn statement_cache_size(mut self, size: usize) -> Self {
        self.config.statement_cache_size = size;
        self
    }

    #[must_use]
    pub const fn statement_cache_isolation_level(mut self, enabled: bool) -> Self {
        self.config.statement_cache_isolation_level = enabled;
        self
    }

    #[must_use]
    pub const fn enable_multithreaded_access_detection(mut self, enabled: bool) -> Self {
        self.config.enable_multithreaded_access_detection = enabled;
        self
    }

    #[must_use]
    pub const fn sync_query_timeout_with_transaction_timeout(mut self, enabled: bool) -> Self {
        self.config.sync_query_timeout_with_transaction_timeout = enabled;
        self
    }

    #[must_use]
    pub const fn query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn begin_tran_for_result_set_scrolling_apis(mut self, enabled: bool) -> Self {
        self.config.begin_tran_for_result_set_scrolling_apis = enabled;
        self
    }

    #[must_use]
    pub const fn begin_tran_for_vendor_apis(mut self, enabled: bool) -> Self {
        self.config.begin_tran_for_vendor_apis = enabled;
        self
    }

    #[must_use]
    pub const fn free_resources_on_close(mut self, enabled: bool) -> Self {
        self.config.free_resources_on_close = enabled;
        self
    }

    #[must_use]
    pub const fn connection_sharing(mut self, sharing: ConnectionSharing) -> Self {
        self.config.connection_sharing = sharing;
        self
    }

    #[must_use]
    pub const fn transactional(mut self, enabled: bool) -> Self {
        self.config.transactional = enabled;
        self
    }

    #[must_use]
    pub const fn local_transaction_switching(mut self, policy: LocalTransactionSwitching) -> Self {
        self.config.local_transaction_switching = policy;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> DataSourceConfig {
        self.config
    }
}
