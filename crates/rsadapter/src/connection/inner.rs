//! Handle core: the state machine behind a connection handle.

use std::any::{Any, TypeId};
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::HandleId;
use crate::capability::AdapterSlot;
use crate::config::{ConnectionSharing, DataSourceConfig};
use crate::driver::{ClientInfo, DriverConnection, Holdability, IsolationLevel};
use crate::error::{DriverError, DriverResult, ResourceError};
use crate::factory::{AccessKey, ConnectionFactory};
use crate::managed::{ConnectionRequestInfo, ManagedConnection, SharedPhysical, TransactionState};
use crate::manager::ConnectionManager;
use crate::metadata::MetadataEntry;
use crate::result_set::ResultSetEntry;
use crate::state::{ChildSet, Introspection, WrapperId, WrapperKind, WrapperState};
use crate::statement::StatementEntry;
use crate::{Error, Result};

pub(crate) type SharedCore = Arc<Mutex<HandleCore>>;

/// State of one connection handle and every wrapper created from it.
///
/// `children` holds the metadata wrapper in its primary slot and statements
/// in creation order in its list. Statement and result-set entries are owned
/// by the maps below; an id missing from its map is a closed wrapper.
pub(crate) struct HandleCore {
    pub(crate) id: HandleId,
    pub(crate) state: WrapperState,
    pub(crate) factory: Arc<ConnectionFactory>,
    pub(crate) manager: Arc<dyn ConnectionManager>,
    key: Option<AccessKey>,
    managed: Option<Arc<ManagedConnection>>,
    physical: Option<SharedPhysical>,
    pub(crate) reserved: bool,
    pub(crate) auto_commit: bool,
    pub(crate) isolation: IsolationLevel,
    request_info: Option<ConnectionRequestInfo>,
    client_info: Option<ClientInfo>,
    thread_id: Option<ThreadId>,
    pub(crate) children: ChildSet<WrapperId>,
    pub(crate) statements: HashMap<WrapperId, StatementEntry>,
    pub(crate) result_sets: HashMap<WrapperId, ResultSetEntry>,
    pub(crate) metadata: Option<MetadataEntry>,
    vendor_adapters: HashMap<TypeId, Arc<AdapterSlot>>,
    next_child: u64,
}

impl HandleCore {
    pub(crate) fn bound(
        manager: Arc<dyn ConnectionManager>,
        managed: &Arc<ManagedConnection>,
        auto_commit: bool,
        isolation: IsolationLevel,
        owner: Option<ThreadId>,
    ) -> Self {
        let factory = Arc::clone(managed.factory());
        Self {
            id: HandleId::next(),
            state: WrapperState::Active,
            key: Some(factory.access_key().clone()),
            factory,
            manager,
            managed: Some(Arc::clone(managed)),
            physical: Some(managed.physical()),
            reserved: false,
            auto_commit,
            isolation,
            request_info: None,
            client_info: None,
            thread_id: owner,
            children: ChildSet::default(),
            statements: HashMap::new(),
            result_sets: HashMap::new(),
            metadata: None,
            vendor_adapters: HashMap::new(),
            next_child: 0,
        }
    }

    pub(crate) const fn next_child_id(&mut self) -> WrapperId {
        self.next_child += 1;
        WrapperId(self.next_child)
    }

    pub(crate) fn config(&self) -> Arc<DataSourceConfig> {
        self.factory.config()
    }

    pub(crate) const fn ensure_open(&self) -> Result<()> {
        match self.state {
            WrapperState::Closed => Err(Error::closed(WrapperKind::Connection)),
            _ => Ok(()),
        }
    }

    /// The bound managed connection; a handle without one is closed as far
    /// as the caller is concerned.
    pub(crate) fn managed(&self) -> Result<&Arc<ManagedConnection>> {
        self.managed
            .as_ref()
            .ok_or(Error::closed(WrapperKind::Connection))
    }

    pub(crate) fn managed_if_bound(&self) -> Option<&Arc<ManagedConnection>> {
        self.managed.as_ref()
    }

    pub(crate) fn physical(&self) -> Result<SharedPhysical> {
        self.physical
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::closed(WrapperKind::Connection))
    }

    pub(crate) const fn request_info(&self) -> Option<&ConnectionRequestInfo> {
        self.request_info.as_ref()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Exception mapping
    // ═══════════════════════════════════════════════════════════════════════

    /// Classify a driver failure. Connection errors are reported to the
    /// managed connection so the pool can evict it.
    pub(crate) fn map_driver_error(&self, error: DriverError) -> Error {
        self.map_driver_error_on(self.managed.as_deref(), error)
    }

    /// Classify a driver failure against `managed`, which need not be the
    /// connection the handle is currently bound to.
    fn map_driver_error_on(&self, managed: Option<&ManagedConnection>, error: DriverError) -> Error {
        let helper = self.factory.helper();
        let error = helper.map_error(error);
        if helper.is_connection_error(&error) {
            if let Some(managed) = managed {
                managed.connection_error_occurred(error.message());
            }
            return Error::connection_failure(error.message().to_string(), Some(Box::new(error)));
        }
        Error::driver(error)
    }

    pub(crate) fn map_resource_error(&self, error: ResourceError) -> Error {
        match error {
            ResourceError::Driver(e) => self.map_driver_error(e),
            ResourceError::Adapter(e) => *e,
            other => Error::resource(other),
        }
    }

    /// Run `f` against the physical connection and map its failure.
    pub(crate) fn with_physical<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn DriverConnection) -> DriverResult<R>,
    ) -> Result<R> {
        let physical = self.physical()?;
        let result = {
            let _span =
                tracing::debug_span!("driver.connection", handle = %self.id, operation).entered();
            let mut driver = physical.lock();
            f(&mut **driver)
        };
        result.map_err(|e| self.map_driver_error(e))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transactions
    // ═══════════════════════════════════════════════════════════════════════

    /// Make sure the next unit of work runs in the right transaction.
    pub(crate) fn begin_transaction_if_necessary(&mut self) -> Result<()> {
        let managed = Arc::clone(self.managed()?);
        if managed.is_stale() {
            return Err(Error::stale_connection());
        }

        self.detect_multithreaded_access();

        if self.factory.helper().supports_isolation_switching() {
            managed
                .set_transaction_isolation(self.isolation)
                .map_err(|e| self.map_driver_error(e))?;
        }

        if !managed.is_transactional() {
            return managed
                .enforce_auto_commit(self.auto_commit)
                .map_err(|e| self.map_driver_error(e));
        }

        match managed.transaction_state() {
            TransactionState::GlobalTransactionActive | TransactionState::LocalTransactionActive => {
                Ok(())
            }
            TransactionState::NoTransaction if managed.is_global_transaction_active() => {
                self.lazy_enlist(&managed)
            }
            TransactionState::NoTransaction => self.begin_local_transaction(&managed),
            state => Err(Error::invalid_transaction_state(
                "begin transaction",
                state,
            )),
        }
    }

    fn lazy_enlist(&self, managed: &Arc<ManagedConnection>) -> Result<()> {
        let Some(enlistment) = self.manager.lazy_enlistment() else {
            tracing::debug!(
                handle = %self.id,
                "connection manager does not enlist lazily; using a local transaction"
            );
            return self.begin_local_transaction(managed);
        };

        enlistment.lazy_enlist(managed).map_err(|e| {
            if e.is_rm_fail() {
                let message = e.to_string();
                managed.connection_error_occurred(message.as_str());
                Error::connection_failure(message, Some(Box::new(e)))
            } else {
                Error::resource(e)
            }
        })
    }

    /// Start a local transaction when auto-commit is off, then push the
    /// handle's auto-commit onto the physical connection.
    fn begin_local_transaction(&self, managed: &Arc<ManagedConnection>) -> Result<()> {
        if !self.auto_commit {
            managed
                .process_local_transaction_started(self.id)
                .map_err(|e| self.map_resource_error(e))?;
        }
        managed
            .enforce_auto_commit(self.auto_commit)
            .map_err(|e| self.map_driver_error(e))
    }

    fn detect_multithreaded_access(&self) {
        let Some(owner) = self.thread_id else {
            return;
        };
        if !self.factory.config().enable_multithreaded_access_detection {
            return;
        }
        let current = thread::current().id();
        if current != owner {
            self.factory.mark_multithreaded_access();
            tracing::warn!(
                handle = %self.id,
                owner = ?owner,
                current = ?current,
                backtrace = %Backtrace::force_capture(),
                "connection handle used by a thread other than the one that obtained it"
            );
        }
    }

    /// Commit (`commit == true`) or roll back the handle's work.
    pub(crate) fn complete_transaction(&mut self, commit: bool) -> Result<()> {
        let operation = if commit { "commit" } else { "rollback" };
        if self.managed.as_ref().is_some_and(|m| m.is_stale()) {
            return Err(Error::stale_connection());
        }
        self.ensure_open()?;
        self.detect_multithreaded_access();
        if self.state == WrapperState::Inactive {
            return Ok(());
        }

        let managed = Arc::clone(self.managed()?);
        let forward = |driver: &mut dyn DriverConnection| {
            if commit {
                driver.commit()
            } else {
                driver.rollback()
            }
        };

        if !managed.is_transactional() {
            self.with_physical(operation, forward)?;
            return self.close_cursors_at_commit();
        }

        match managed.transaction_state() {
            TransactionState::GlobalTransactionActive => {
                Err(Error::not_valid_in_global_transaction(operation))
            }
            TransactionState::LocalTransactionActive => {
                let outcome = if commit {
                    managed.process_local_transaction_committed(self.id)
                } else {
                    managed.process_local_transaction_rolled_back(self.id)
                };
                outcome.map_err(|e| self.map_resource_error(e))?;
                self.close_cursors_at_commit()
            }
            _ => self.with_physical(operation, forward),
        }
    }

    /// Close the result sets of every statement whose cursors do not survive
    /// a commit, newest statement first.
    fn close_cursors_at_commit(&mut self) -> Result<()> {
        let statements: Vec<WrapperId> = self.children.list().iter().rev().copied().collect();
        let mut first_error = None;
        for id in statements {
            let closes = self
                .statements
                .get(&id)
                .is_some_and(|s| s.holdability == Holdability::CloseCursorsAtCommit);
            if closes && let Err(e) = self.close_statement_results(id, false) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sharing
    // ═══════════════════════════════════════════════════════════════════════

    /// Reject a change of a shared property while other handles use the
    /// managed connection.
    pub(crate) fn check_sharing<T: PartialEq>(
        managed: &ManagedConnection,
        property: &'static str,
        current: &T,
        requested: &T,
    ) -> Result<()> {
        let handles = managed.handle_count();
        if handles > 1 && current != requested {
            tracing::debug!(property, handles, "sharing violation");
            return Err(Error::sharing_violation(property, handles));
        }
        Ok(())
    }

    /// Record a property change in the request info used for matching.
    pub(crate) fn update_request_info(
        &self,
        managed: &ManagedConnection,
        update: impl FnOnce(&mut ConnectionRequestInfo),
    ) {
        if self.config().connection_sharing == ConnectionSharing::MatchCurrentState {
            managed.update_request_info(update);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Association
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn check_key(&self, key: &AccessKey, operation: &'static str) -> Result<()> {
        match &self.key {
            None => Err(Error::closed(WrapperKind::Connection)),
            Some(own) if own != key => Err(Error::access_denied(operation)),
            Some(_) => Ok(()),
        }
    }

    pub(crate) fn reserve(&mut self, key: &AccessKey) -> Result<()> {
        self.check_key(key, "reserve")?;
        self.reserved = true;
        self.state = WrapperState::Inactive;
        tracing::debug!(handle = %self.id, "handle reserved");
        Ok(())
    }

    pub(crate) fn dissociate(&mut self) -> Result<()> {
        match self.state {
            WrapperState::Active => {}
            WrapperState::Inactive if self.reserved => self.reserved = false,
            WrapperState::Inactive => return Ok(()),
            WrapperState::Closed => return Err(Error::closed(WrapperKind::Connection)),
        }

        let mut first_error = self.close_children();

        if let Some(managed) = self.managed.take() {
            self.request_info = Some(managed.request_info());
            if managed.client_info_touched() {
                match self.with_physical("client_info", |c| c.client_info()) {
                    Ok(info) => self.client_info = Some(info),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            managed.dissociate_handle(self.id);
        }
        self.physical = None;
        self.state = WrapperState::Inactive;
        tracing::debug!(handle = %self.id, "handle dissociated");

        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn reassociate(
        &mut self,
        managed: &Arc<ManagedConnection>,
        key: &AccessKey,
    ) -> Result<()> {
        self.check_key(key, "reassociate")?;

        if self.reserved {
            let same = self
                .managed
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, managed));
            if !same {
                tracing::error!(
                    handle = %self.id,
                    "reserved handle offered a different managed connection"
                );
                return Err(Error::reservation_mismatch());
            }
            self.reserved = false;
            self.state = WrapperState::Active;
            tracing::debug!(handle = %self.id, "reserved handle reactivated");
            return Ok(());
        }

        let open = self.children.len();
        if open > 0 {
            tracing::error!(handle = %self.id, open, "reassociation requested with child wrappers still open");
            return Err(Error::children_still_open(open));
        }
        if self.state != WrapperState::Inactive {
            return Err(Error::cannot_reassociate(self.state));
        }

        let physical = managed.physical();
        self.revalidate_vendor_adapters(&physical);

        if let Some(info) = &self.client_info {
            let restored = physical.lock().set_client_info(info);
            if let Err(e) = restored {
                tracing::debug!(handle = %self.id, error = %e, "failed to restore client info");
                return Err(self.map_driver_error_on(Some(managed.as_ref()), e));
            }
        }

        self.managed = Some(Arc::clone(managed));
        self.physical = Some(physical);
        self.request_info = None;
        self.client_info = None;
        self.state = WrapperState::Active;
        tracing::debug!(handle = %self.id, "handle reassociated");
        Ok(())
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.state == WrapperState::Closed {
            return Ok(());
        }

        if let Some(e) = self.close_children() {
            tracing::debug!(handle = %self.id, error = %e, "error closing children of handle");
        }
        for slot in self.vendor_adapters.values() {
            slot.set_closed(true);
        }
        self.vendor_adapters.clear();

        match self.managed.take() {
            Some(managed) => managed.process_connection_closed(self.id),
            None => self.manager.inactive_connection_closed(self.id, &self.factory),
        }

        self.key = None;
        self.physical = None;
        self.request_info = None;
        self.client_info = None;
        self.reserved = false;
        self.state = WrapperState::Closed;
        tracing::debug!(handle = %self.id, "handle closed");
        Ok(())
    }

    /// Close the metadata wrapper and every statement, returning the first
    /// failure after all of them were attempted.
    pub(crate) fn close_children(&mut self) -> Option<Error> {
        let mut first_error = None;
        if let Err(e) = self.close_metadata() {
            first_error.get_or_insert(e);
        }
        let statements: Vec<WrapperId> = self.children.list().iter().rev().copied().collect();
        for id in statements {
            if let Err(e) = self.close_statement(id) {
                first_error.get_or_insert(e);
            }
        }
        first_error
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Privileged accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn set_thread_id(&mut self, key: &AccessKey) -> Result<()> {
        self.check_key(key, "set_thread_id")?;
        self.thread_id = Some(thread::current().id());
        Ok(())
    }

    pub(crate) fn managed_connection(&self, key: &AccessKey) -> Result<Option<Arc<ManagedConnection>>> {
        self.check_key(key, "managed_connection")?;
        Ok(self.managed.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vendor interfaces
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn vendor_adapter<T: Any>(&mut self) -> Result<Arc<AdapterSlot>> {
        let type_id = TypeId::of::<T>();
        if let Some(slot) = self.vendor_adapters.get(&type_id) {
            return Ok(Arc::clone(slot));
        }

        if !self.implements::<T>()? {
            return Err(Error::not_supported(std::any::type_name::<T>()));
        }
        let name = self
            .factory
            .capabilities()
            .lookup(type_id)
            .map_or_else(|| std::any::type_name::<T>(), |c| c.name());
        let slot = Arc::new(AdapterSlot::new(name));
        self.vendor_adapters.insert(type_id, Arc::clone(&slot));
        tracing::debug!(handle = %self.id, interface = name, "vendor interface adapter created");
        Ok(slot)
    }

    /// Whether `T` is registered and the current physical connection is one.
    pub(crate) fn implements<T: Any>(&self) -> Result<bool> {
        let Some(capability) = self.factory.capabilities().lookup(TypeId::of::<T>()) else {
            return Ok(false);
        };
        let physical = self.physical()?;
        let mut driver = physical.lock();
        Ok(capability.is_implemented_by(&mut **driver))
    }

    fn revalidate_vendor_adapters(&self, physical: &SharedPhysical) {
        for (type_id, slot) in &self.vendor_adapters {
            let implemented = self
                .factory
                .capabilities()
                .lookup(*type_id)
                .is_some_and(|c| c.is_implemented_by(&mut **physical.lock()));
            slot.set_closed(!implemented);
            if !implemented {
                tracing::warn!(
                    handle = %self.id,
                    interface = slot.name(),
                    "new physical connection does not implement vendor interface; adapter closed"
                );
            }
        }
    }

    pub(crate) fn introspect(&self) -> Introspection {
        Introspection::new(WrapperKind::Connection, self.state, self.children.len())
            .with("handle", self.id.to_string())
            .with("reserved", self.reserved)
            .with("bound", self.managed.is_some())
            .with("auto_commit", self.auto_commit)
            .with("isolation", self.isolation.to_string())
            .with("statements", self.statements.len())
            .with("result_sets", self.result_sets.len())
            .with("vendor_adapters", self.vendor_adapters.len())
            .with("thread_tracking", self.thread_id.is_some())
            .with("client_info_saved", self.client_info.is_some())
    }
}

/// The last reference to a handle went away without `close()`; run the close
/// path so the managed connection forgets it and cached statements go back.
impl Drop for HandleCore {
    fn drop(&mut self) {
        if self.state == WrapperState::Closed {
            return;
        }
        tracing::debug!(handle = %self.id, "handle dropped without close");
        if let Err(e) = self.close() {
            tracing::debug!(handle = %self.id, error = %e, "error closing dropped handle");
        }
    }
}
