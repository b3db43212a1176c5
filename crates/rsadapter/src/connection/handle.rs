//! Public connection handle.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::Mutex;

use super::inner::{HandleCore, SharedCore};
use super::HandleId;
use crate::capability::VendorInterface;
use crate::config::LocalTransactionSwitching;
use crate::driver::{
    ClientInfo, Holdability, IsolationLevel, Savepoint, StatementOptions, TypeMap,
};
use crate::factory::AccessKey;
use crate::managed::{ManagedConnection, TransactionState};
use crate::manager::ConnectionManager;
use crate::metadata::DatabaseMetaData;
use crate::state::{Introspection, WrapperKind, WrapperState};
use crate::statement::{CallableStatement, PreparedStatement, Statement};
use crate::warnings::MatchingWarning;
use crate::{Error, Result};

/// Application-facing connection handle.
///
/// Cloning yields another reference to the same handle, not a new one.
#[derive(Clone)]
pub struct Connection {
    pub(crate) core: SharedCore,
    id: HandleId,
}

/// Non-owning reference to a handle, held by its managed connection.
#[derive(Clone)]
pub struct WeakConnection {
    core: Weak<Mutex<HandleCore>>,
    id: HandleId,
}

impl WeakConnection {
    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> {
        self.core.upgrade().map(|core| Connection { core, id: self.id })
    }

    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// Whether some owner still holds the handle.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.core.strong_count() > 0
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakConnection").field(&self.id).finish()
    }
}

impl Connection {
    pub(crate) fn bound(
        manager: Arc<dyn ConnectionManager>,
        managed: &Arc<ManagedConnection>,
        auto_commit: bool,
        isolation: IsolationLevel,
        owner: Option<ThreadId>,
    ) -> Self {
        let core = HandleCore::bound(manager, managed, auto_commit, isolation, owner);
        let id = core.id;
        Self {
            core: Arc::new(Mutex::new(core)),
            id,
        }
    }

    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            core: Arc::downgrade(&self.core),
            id: self.id,
        }
    }

    #[must_use]
    pub fn state(&self) -> WrapperState {
        self.core.lock().state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == WrapperState::Closed
    }

    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.core.lock().reserved
    }

    /// Number of open statements created from this handle.
    #[must_use]
    pub fn open_statements(&self) -> usize {
        self.core.lock().statements.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Make sure the handle is bound, asking the connection manager for a
    /// managed connection when it was dissociated.
    ///
    /// A failed reassociation leaves the handle `INACTIVE`; retrying is up to
    /// the caller.
    pub fn activate(&self) -> Result<()> {
        let (factory, manager, request_info) = {
            let core = self.core.lock();
            match core.state {
                WrapperState::Active => return Ok(()),
                WrapperState::Closed => return Err(Error::closed(WrapperKind::Connection)),
                WrapperState::Inactive => (
                    Arc::clone(&core.factory),
                    Arc::clone(&core.manager),
                    core.request_info().cloned(),
                ),
            }
        };

        tracing::debug!(handle = %self.id, "reactivating dissociated handle");
        manager
            .associate_connection(self, &factory, request_info.as_ref())
            .map_err(|e| {
                tracing::warn!(handle = %self.id, error = %e, "failed to reassociate connection handle");
                Error::from(e)
            })
    }

    /// Detach from the managed connection, closing every child wrapper.
    pub fn dissociate(&self) -> Result<()> {
        self.core.lock().dissociate()
    }

    /// Bind a dissociated (or reserved) handle to `managed`.
    ///
    /// Only the owning factory's key is accepted.
    pub fn reassociate(&self, managed: &Arc<ManagedConnection>, key: &AccessKey) -> Result<()> {
        self.core.lock().reassociate(managed, key)
    }

    /// Drop to `INACTIVE` while keeping children and the physical connection,
    /// for a caller that guarantees reassociation with the same managed
    /// connection.
    pub fn reserve(&self, key: &AccessKey) -> Result<()> {
        self.core.lock().reserve(key)
    }

    /// Close the handle and every wrapper created from it. Closing twice is
    /// a no-op.
    pub fn close(&self) -> Result<()> {
        self.core.lock().close()
    }

    /// Whether the physical connection answers within `timeout`. A closed
    /// handle is never valid.
    pub fn is_valid(&self, timeout: Duration) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        self.activate()?;
        self.core
            .lock()
            .with_physical("is_valid", |c| c.is_valid(timeout))
    }

    #[must_use]
    pub fn introspect(&self) -> Introspection {
        self.core.lock().introspect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transactions
    // ═══════════════════════════════════════════════════════════════════════

    pub fn begin_transaction_if_necessary(&self) -> Result<()> {
        self.activate()?;
        self.core.lock().begin_transaction_if_necessary()
    }

    pub fn commit(&self) -> Result<()> {
        self.core.lock().complete_transaction(true)
    }

    pub fn rollback(&self) -> Result<()> {
        self.core.lock().complete_transaction(false)
    }

    pub fn set_savepoint(&self, name: Option<&str>) -> Result<Savepoint> {
        self.activate()?;
        let mut core = self.core.lock();
        if core.managed()?.in_global_transaction() {
            return Err(Error::not_valid_in_global_transaction("set_savepoint"));
        }
        core.begin_transaction_if_necessary()?;
        core.with_physical("set_savepoint", |c| c.set_savepoint(name))
    }

    pub fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        if core.managed()?.in_global_transaction() {
            return Err(Error::not_valid_in_global_transaction("rollback_to_savepoint"));
        }
        core.with_physical("rollback_to_savepoint", |c| c.rollback_to_savepoint(savepoint))
    }

    pub fn release_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        if core.managed()?.in_global_transaction() {
            return Err(Error::not_valid_in_global_transaction("release_savepoint"));
        }
        core.with_physical("release_savepoint", |c| c.release_savepoint(savepoint))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Connection properties
    // ═══════════════════════════════════════════════════════════════════════

    /// The handle's auto-commit setting.
    pub fn auto_commit(&self) -> Result<bool> {
        let core = self.core.lock();
        core.ensure_open()?;
        Ok(core.auto_commit)
    }

    pub fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.activate()?;
        let mut core = self.core.lock();
        let managed = Arc::clone(core.managed()?);
        HandleCore::check_sharing(&managed, "auto-commit", &managed.auto_commit(), &auto_commit)?;

        match managed.transaction_state() {
            TransactionState::GlobalTransactionActive if auto_commit => {
                return Err(Error::not_valid_in_global_transaction("set_auto_commit(true)"));
            }
            TransactionState::GlobalTransactionActive => {
                core.auto_commit = false;
                return Ok(());
            }
            TransactionState::LocalTransactionActive if auto_commit && !core.auto_commit => {
                if core.config().local_transaction_switching == LocalTransactionSwitching::Strict {
                    return Err(Error::invalid_transaction_state(
                        "set_auto_commit(true)",
                        TransactionState::LocalTransactionActive,
                    ));
                }
                tracing::debug!(handle = %core.id, "auto-commit enabled; committing local transaction");
                managed
                    .process_local_transaction_committed(core.id)
                    .map_err(|e| core.map_resource_error(e))?;
            }
            _ => {}
        }

        managed
            .enforce_auto_commit(auto_commit)
            .map_err(|e| core.map_driver_error(e))?;
        core.auto_commit = auto_commit;
        Ok(())
    }

    /// The handle's isolation level.
    pub fn transaction_isolation(&self) -> Result<IsolationLevel> {
        let core = self.core.lock();
        core.ensure_open()?;
        Ok(core.isolation)
    }

    pub fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.activate()?;
        let mut core = self.core.lock();
        let managed = Arc::clone(core.managed()?);
        let current = managed.transaction_isolation();
        HandleCore::check_sharing(&managed, "transaction isolation", &current, &level)?;

        if level != current
            && managed.transaction_state() == TransactionState::LocalTransactionActive
            && core.config().local_transaction_switching == LocalTransactionSwitching::Strict
        {
            return Err(Error::invalid_transaction_state(
                "set_transaction_isolation",
                TransactionState::LocalTransactionActive,
            ));
        }

        managed
            .set_transaction_isolation(level)
            .map_err(|e| core.map_driver_error(e))?;
        core.isolation = level;
        if !core.factory.helper().supports_isolation_switching() {
            core.update_request_info(&managed, |info| info.isolation = Some(level));
        }
        Ok(())
    }

    pub fn catalog(&self) -> Result<Option<String>> {
        self.activate()?;
        Ok(self.core.lock().managed()?.catalog())
    }

    pub fn set_catalog(&self, catalog: &str) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        let managed = Arc::clone(core.managed()?);
        let requested = Some(catalog.to_string());
        HandleCore::check_sharing(&managed, "catalog", &managed.catalog(), &requested)?;
        core.warn_matching(MatchingWarning::Catalog);

        managed
            .set_catalog(catalog)
            .map_err(|e| core.map_driver_error(e))?;
        core.update_request_info(&managed, |info| info.catalog = requested);
        Ok(())
    }

    pub fn is_read_only(&self) -> Result<bool> {
        self.activate()?;
        Ok(self.core.lock().managed()?.is_read_only())
    }

    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        let managed = Arc::clone(core.managed()?);
        HandleCore::check_sharing(&managed, "read-only", &managed.is_read_only(), &read_only)?;
        core.warn_matching(MatchingWarning::ReadOnly);

        managed
            .set_read_only(read_only)
            .map_err(|e| core.map_driver_error(e))?;
        core.update_request_info(&managed, |info| info.read_only = Some(read_only));
        Ok(())
    }

    pub fn holdability(&self) -> Result<Holdability> {
        self.activate()?;
        Ok(self.core.lock().managed()?.holdability())
    }

    pub fn set_holdability(&self, holdability: Holdability) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        let managed = Arc::clone(core.managed()?);
        HandleCore::check_sharing(&managed, "holdability", &managed.holdability(), &holdability)?;
        core.warn_matching(MatchingWarning::Holdability);

        managed
            .set_holdability(holdability)
            .map_err(|e| core.map_driver_error(e))?;
        core.update_request_info(&managed, |info| info.holdability = Some(holdability));
        Ok(())
    }

    pub fn type_map(&self) -> Result<TypeMap> {
        self.activate()?;
        Ok(self.core.lock().managed()?.type_map())
    }

    /// Replace the type map. Refused outright while the managed connection
    /// is shared.
    pub fn set_type_map(&self, map: TypeMap) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        let managed = Arc::clone(core.managed()?);
        let handles = managed.handle_count();
        if handles > 1 {
            return Err(Error::sharing_violation("type map", handles));
        }
        core.warn_matching(MatchingWarning::TypeMap);

        managed
            .set_type_map(&map)
            .map_err(|e| core.map_driver_error(e))?;
        core.update_request_info(&managed, |info| info.type_map = Some(map));
        Ok(())
    }

    pub fn schema(&self) -> Result<Option<String>> {
        self.activate()?;
        Ok(self.core.lock().managed()?.schema())
    }

    pub fn set_schema(&self, schema: &str) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        let managed = Arc::clone(core.managed()?);
        let requested = Some(schema.to_string());
        HandleCore::check_sharing(&managed, "schema", &managed.schema(), &requested)?;

        managed
            .set_schema(schema)
            .map_err(|e| core.map_driver_error(e))?;
        core.update_request_info(&managed, |info| info.schema = requested);
        Ok(())
    }

    pub fn client_info(&self) -> Result<ClientInfo> {
        self.activate()?;
        self.core
            .lock()
            .with_physical("client_info", |c| c.client_info())
    }

    pub fn set_client_info(&self, info: &ClientInfo) -> Result<()> {
        self.activate()?;
        let core = self.core.lock();
        core.with_physical("set_client_info", |c| c.set_client_info(info))?;
        core.managed()?.mark_client_info_explicitly_set();
        Ok(())
    }

    pub fn database_product_name(&self) -> Result<String> {
        self.activate()?;
        self.core
            .lock()
            .with_physical("database_product_name", |c| c.database_product_name())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Child wrappers
    // ═══════════════════════════════════════════════════════════════════════

    pub fn create_statement(&self) -> Result<Statement> {
        self.create_statement_with(StatementOptions::default())
    }

    pub fn create_statement_with(&self, options: StatementOptions) -> Result<Statement> {
        self.activate()?;
        let id = self.core.lock().create_statement(&options)?;
        Ok(Statement::new(self.clone(), id))
    }

    pub fn prepare_statement(&self, sql: &str) -> Result<PreparedStatement> {
        self.prepare_statement_with(sql, StatementOptions::default())
    }

    pub fn prepare_statement_with(
        &self,
        sql: &str,
        options: StatementOptions,
    ) -> Result<PreparedStatement> {
        self.activate()?;
        let id = self.core.lock().prepare_statement(sql, &options)?;
        Ok(PreparedStatement::new(self.clone(), id))
    }

    pub fn prepare_call(&self, sql: &str) -> Result<CallableStatement> {
        self.prepare_call_with(sql, StatementOptions::default())
    }

    pub fn prepare_call_with(&self, sql: &str, options: StatementOptions) -> Result<CallableStatement> {
        self.activate()?;
        let id = self.core.lock().prepare_call(sql, &options)?;
        Ok(CallableStatement::new(self.clone(), id))
    }

    /// Prepare a statement from a stored SQL-module section.
    ///
    /// When `suffix_required` is set and no suffix is given, the statement is
    /// prepared but never cached.
    pub fn prepare_section(
        &self,
        sql: &str,
        section: &str,
        suffix: Option<&str>,
        suffix_required: bool,
    ) -> Result<PreparedStatement> {
        self.activate()?;
        let id = self.core.lock().prepare_section(
            sql,
            &StatementOptions::default(),
            section,
            suffix,
            suffix_required,
        )?;
        Ok(PreparedStatement::new(self.clone(), id))
    }

    /// The metadata wrapper of this handle, created on first use.
    pub fn metadata(&self) -> Result<DatabaseMetaData> {
        self.activate()?;
        let id = self.core.lock().metadata_id()?;
        Ok(DatabaseMetaData::new(self.clone(), id))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vendor interfaces
    // ═══════════════════════════════════════════════════════════════════════

    /// Adapter to the vendor driver type `T`, which must be registered on the
    /// factory's capability registry.
    pub fn unwrap<T: Any>(&self) -> Result<VendorInterface<T>> {
        self.activate()?;
        let slot = self.core.lock().vendor_adapter::<T>()?;
        Ok(VendorInterface::new(self.clone(), slot))
    }

    pub fn is_wrapper_for<T: Any>(&self) -> Result<bool> {
        self.activate()?;
        self.core.lock().implements::<T>()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Privileged accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn managed_connection(&self, key: &AccessKey) -> Result<Option<Arc<ManagedConnection>>> {
        self.core.lock().managed_connection(key)
    }

    /// Record the calling thread as the handle's owner for multithreaded
    /// access detection.
    pub fn set_thread_id(&self, key: &AccessKey) -> Result<()> {
        self.core.lock().set_thread_id(key)
    }

    /// Overwrite the tracked auto-commit without touching the driver.
    pub fn set_current_auto_commit(&self, auto_commit: bool, key: &AccessKey) -> Result<()> {
        let mut core = self.core.lock();
        core.check_key(key, "set_current_auto_commit")?;
        core.auto_commit = auto_commit;
        Ok(())
    }

    /// Overwrite the tracked isolation level without touching the driver.
    pub fn set_current_transaction_isolation(
        &self,
        level: IsolationLevel,
        key: &AccessKey,
    ) -> Result<()> {
        let mut core = self.core.lock();
        core.check_key(key, "set_current_transaction_isolation")?;
        core.isolation = level;
        Ok(())
    }
}

impl HandleCore {
    /// One-time hint that the property change affects connection matching.
    fn warn_matching(&self, warning: MatchingWarning) {
        if self.config().connection_sharing == crate::config::ConnectionSharing::MatchOriginalRequest {
            warning.warn_once();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_activate_is_noop_when_active() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        conn.activate().unwrap();
        assert_eq!(conn.state(), WrapperState::Active);
        assert_eq!(fixture.manager.associations(), 0);
    }

    #[test]
    fn test_activate_reassociates_inactive_handle() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        conn.dissociate().unwrap();
        assert_eq!(conn.state(), WrapperState::Inactive);

        conn.create_statement().unwrap();

        assert_eq!(conn.state(), WrapperState::Active);
        assert_eq!(fixture.manager.associations(), 1);
    }

    #[test]
    fn test_failed_activation_stays_inactive() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        conn.dissociate().unwrap();
        fixture.manager.fail_associations(true);

        let err = conn.create_statement().unwrap_err();
        assert!(err.is_resource());
        assert_eq!(conn.state(), WrapperState::Inactive);

        fixture.manager.fail_associations(false);
        assert!(conn.create_statement().is_ok());
    }

    #[test]
    fn test_close_is_idempotent() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        conn.close().unwrap();
        conn.close().unwrap();

        assert!(conn.is_closed());
        assert!(conn.activate().unwrap_err().is_closed());
        assert!(!conn.is_valid(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_close_of_inactive_handle_notifies_manager() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        conn.dissociate().unwrap();

        conn.close().unwrap();

        assert_eq!(fixture.manager.inactive_closed(), vec![conn.id()]);
    }

    #[test]
    fn test_wrong_key_is_denied() {
        let fixture = Fixture::new();
        let other = Fixture::new();
        let conn = fixture.connection();

        let err = conn.reserve(other.factory.access_key()).unwrap_err();
        assert!(err.is_access_denied());
        assert!(conn.set_thread_id(other.factory.access_key()).unwrap_err().is_access_denied());
        assert!(
            conn.managed_connection(other.factory.access_key())
                .unwrap_err()
                .is_access_denied()
        );
    }

    #[test]
    fn test_privileged_accessors_with_key() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let key = fixture.factory.access_key();

        let managed = conn.managed_connection(key).unwrap().unwrap();
        assert!(Arc::ptr_eq(&managed, &fixture.managed));

        conn.set_current_auto_commit(false, key).unwrap();
        assert!(!conn.auto_commit().unwrap());
        assert_eq!(fixture.driver.calls_named("set_auto_commit"), 0);

        conn.set_current_transaction_isolation(IsolationLevel::Serializable, key)
            .unwrap();
        assert_eq!(conn.transaction_isolation().unwrap(), IsolationLevel::Serializable);
    }

    #[test]
    fn test_closed_handle_key_is_gone() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        conn.close().unwrap();

        let err = conn.reserve(fixture.factory.access_key()).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_introspect_reports_state() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        conn.create_statement().unwrap();

        let snapshot = conn.introspect();
        assert_eq!(snapshot.state, WrapperState::Active);
        assert_eq!(snapshot.children, 1);
        assert_eq!(snapshot.details["statements"], 1);
        assert!(snapshot.to_json().unwrap().contains("\"reserved\": false"));
    }
}
