//! Managed connection factory.
//!
//! One factory per data source. It owns the live configuration, the driver
//! helper, the capability registry and the privileged [`AccessKey`] shared by
//! every managed connection it creates.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;

use crate::Result;
use crate::capability::CapabilityRegistry;
use crate::config::DataSourceConfig;
use crate::driver::DriverConnection;
use crate::helper::DriverHelper;
use crate::managed::{ConnectionRequestInfo, ManagedConnection};
use crate::manager::TransactionServices;

struct KeyToken;

/// Opaque capability guarding container-only handle methods.
///
/// Keys compare by identity. Application code can hold a clone but can never
/// forge one; only a factory creates them.
#[derive(Clone)]
pub struct AccessKey(Arc<KeyToken>);

impl AccessKey {
    fn new() -> Self {
        Self(Arc::new(KeyToken))
    }
}

impl PartialEq for AccessKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for AccessKey {}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(..)")
    }
}

/// Factory of managed connections for one data source.
pub struct ConnectionFactory {
    config: ArcSwap<DataSourceConfig>,
    helper: Arc<dyn DriverHelper>,
    transactions: Arc<dyn TransactionServices>,
    capabilities: CapabilityRegistry,
    key: AccessKey,
    detected_multithreaded_access: AtomicBool,
}

impl ConnectionFactory {
    #[must_use]
    pub fn new(
        config: DataSourceConfig,
        helper: Arc<dyn DriverHelper>,
        transactions: Arc<dyn TransactionServices>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            helper,
            transactions,
            capabilities: CapabilityRegistry::new(),
            key: AccessKey::new(),
            detected_multithreaded_access: AtomicBool::new(false),
        })
    }

    /// Current configuration (lock-free read).
    ///
    /// Operations capture the config once; an update applies to the next
    /// operation, never to one in flight.
    #[must_use]
    pub fn config(&self) -> Arc<DataSourceConfig> {
        self.config.load_full()
    }

    /// Replace the live configuration.
    ///
    /// The statement cache size of existing managed connections is fixed at
    /// creation and is not affected.
    pub fn update_config(&self, config: DataSourceConfig) {
        tracing::info!(
            statement_cache_size = config.statement_cache_size,
            transactional = config.transactional,
            "data source configuration updated"
        );
        self.config.store(Arc::new(config));
    }

    #[must_use]
    pub fn helper(&self) -> &dyn DriverHelper {
        self.helper.as_ref()
    }

    #[must_use]
    pub fn transactions(&self) -> &dyn TransactionServices {
        self.transactions.as_ref()
    }

    #[must_use]
    pub const fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// The key managed connections present to privileged handle methods.
    #[must_use]
    pub const fn access_key(&self) -> &AccessKey {
        &self.key
    }

    /// Whether any handle of this data source was used from two threads.
    #[must_use]
    pub fn has_detected_multithreaded_access(&self) -> bool {
        self.detected_multithreaded_access.load(Ordering::Acquire)
    }

    pub(crate) fn mark_multithreaded_access(&self) {
        self.detected_multithreaded_access
            .store(true, Ordering::Release);
    }

    /// Wrap a freshly opened physical connection.
    pub fn create_managed_connection(
        self: &Arc<Self>,
        physical: Box<dyn DriverConnection>,
        request_info: ConnectionRequestInfo,
    ) -> Result<Arc<ManagedConnection>> {
        ManagedConnection::new(self, physical, request_info)
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("config", &self.config.load())
            .field("helper", &self.helper)
            .field("capabilities", &self.capabilities)
            .field(
                "detected_multithreaded_access",
                &self.has_detected_multithreaded_access(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::GenericHelper;
    use crate::manager::NoGlobalTransactions;

    fn factory() -> Arc<ConnectionFactory> {
        ConnectionFactory::new(
            DataSourceConfig::default(),
            Arc::new(GenericHelper::new()),
            Arc::new(NoGlobalTransactions),
        )
    }

    #[test]
    fn test_access_key_identity() {
        let a = factory();
        let b = factory();
        assert_eq!(a.access_key(), &a.access_key().clone());
        assert_ne!(a.access_key(), b.access_key());
    }

    #[test]
    fn test_update_config_applies_to_next_read() {
        let factory = factory();
        let before = factory.config();

        factory.update_config(DataSourceConfig::builder().statement_cache_size(0).build());

        assert_eq!(before.statement_cache_size, 10);
        assert_eq!(factory.config().statement_cache_size, 0);
    }

    #[test]
    fn test_multithreaded_flag() {
        let factory = factory();
        assert!(!factory.has_detected_multithreaded_access());
        factory.mark_multithreaded_access();
        assert!(factory.has_detected_multithreaded_access());
    }
}
