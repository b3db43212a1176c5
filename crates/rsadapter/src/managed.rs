//! Reference managed connection.
//!
//! A [`ManagedConnection`] owns one physical driver connection, its statement
//! cache and its transaction state, and tracks the handles currently bound to
//! it. Pools normally keep it for the lifetime of the physical connection and
//! hand out [`Connection`] handles from it.
//!
//! Locking: the state mutex is never held while calling into a handle, and
//! listener events are dispatched after it is released.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::cache_key::StatementCacheKey;
use crate::connection::{Connection, HandleId, WeakConnection};
use crate::driver::{DriverConnection, DriverStatement, Holdability, IsolationLevel, TypeMap};
use crate::error::{DriverResult, ResourceError};
use crate::factory::{AccessKey, ConnectionFactory};
use crate::manager::{ConnectionEvent, ConnectionEventListener, ConnectionManager};
use crate::statement_cache::{CacheStats, StatementCache};
use crate::{Error, Result};

/// Physical connection shared between a managed connection and its bound
/// handles.
pub(crate) type SharedPhysical = Arc<Mutex<Box<dyn DriverConnection>>>;

/// Transaction state of a managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    #[default]
    NoTransaction,
    LocalTransactionActive,
    GlobalTransactionActive,
    /// Commit or rollback of a global transaction is in progress.
    TransactionEnding,
    TransactionFailed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoTransaction => "NO_TRANSACTION_ACTIVE",
            Self::LocalTransactionActive => "LOCAL_TRANSACTION_ACTIVE",
            Self::GlobalTransactionActive => "GLOBAL_TRANSACTION_ACTIVE",
            Self::TransactionEnding => "TRANSACTION_ENDING",
            Self::TransactionFailed => "TRANSACTION_FAIL",
        };
        f.write_str(name)
    }
}

/// Connection request properties used by the pool to match handles to
/// managed connections.
///
/// Unset fields mean "driver default". Equality ignores whether the instance
/// is changeable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionRequestInfo {
    pub user: Option<String>,
    pub catalog: Option<String>,
    pub read_only: Option<bool>,
    pub isolation: Option<IsolationLevel>,
    pub holdability: Option<Holdability>,
    pub type_map: Option<TypeMap>,
    pub schema: Option<String>,
    changeable: bool,
}

impl ConnectionRequestInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    #[must_use]
    pub const fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    #[must_use]
    pub const fn holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = Some(holdability);
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub const fn is_changeable(&self) -> bool {
        self.changeable
    }

    /// Mutable access for sharing setters. A fixed instance is swapped for a
    /// changeable copy first, so snapshots taken earlier keep their values.
    pub(crate) fn make_changeable(&mut self) -> &mut Self {
        if !self.changeable {
            *self = Self {
                changeable: true,
                ..self.clone()
            };
        }
        self
    }
}

impl PartialEq for ConnectionRequestInfo {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user
            && self.catalog == other.catalog
            && self.read_only == other.read_only
            && self.isolation == other.isolation
            && self.holdability == other.holdability
            && self.type_map == other.type_map
            && self.schema == other.schema
    }
}

impl Eq for ConnectionRequestInfo {}

/// Connection properties as last applied to the physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Properties {
    auto_commit: bool,
    isolation: IsolationLevel,
    catalog: Option<String>,
    read_only: bool,
    holdability: Holdability,
    type_map: TypeMap,
    schema: Option<String>,
}

impl Properties {
    fn read(physical: &mut dyn DriverConnection) -> DriverResult<Self> {
        Ok(Self {
            auto_commit: physical.auto_commit()?,
            isolation: physical.transaction_isolation()?,
            catalog: physical.catalog()?,
            read_only: physical.is_read_only()?,
            holdability: physical.holdability()?,
            type_map: physical.type_map()?,
            schema: physical.schema()?,
        })
    }

    /// Apply the requested values that differ from the current ones.
    fn apply_request(
        &mut self,
        physical: &mut dyn DriverConnection,
        request: &ConnectionRequestInfo,
    ) -> DriverResult<()> {
        if let Some(isolation) = request.isolation.filter(|i| *i != self.isolation) {
            physical.set_transaction_isolation(isolation)?;
            self.isolation = isolation;
        }
        if let Some(catalog) = request.catalog.as_ref().filter(|c| self.catalog.as_ref() != Some(*c)) {
            physical.set_catalog(catalog)?;
            self.catalog = Some(catalog.clone());
        }
        if let Some(read_only) = request.read_only.filter(|r| *r != self.read_only) {
            physical.set_read_only(read_only)?;
            self.read_only = read_only;
        }
        if let Some(holdability) = request.holdability.filter(|h| *h != self.holdability) {
            physical.set_holdability(holdability)?;
            self.holdability = holdability;
        }
        if let Some(map) = request.type_map.as_ref().filter(|m| **m != self.type_map) {
            physical.set_type_map(map)?;
            self.type_map = map.clone();
        }
        if let Some(schema) = request.schema.as_ref().filter(|s| self.schema.as_ref() != Some(*s)) {
            physical.set_schema(schema)?;
            self.schema = Some(schema.clone());
        }
        Ok(())
    }

    /// Put the physical connection back to `initial`.
    fn restore(&mut self, physical: &mut dyn DriverConnection, initial: &Self) -> DriverResult<()> {
        if self.auto_commit != initial.auto_commit {
            physical.set_auto_commit(initial.auto_commit)?;
        }
        let request = ConnectionRequestInfo {
            catalog: initial.catalog.clone(),
            read_only: Some(initial.read_only),
            isolation: Some(initial.isolation),
            holdability: Some(initial.holdability),
            type_map: Some(initial.type_map.clone()),
            schema: initial.schema.clone(),
            ..ConnectionRequestInfo::default()
        };
        self.apply_request(physical, &request)?;
        self.auto_commit = initial.auto_commit;
        Ok(())
    }
}

struct ManagedState {
    transaction: TransactionState,
    properties: Properties,
    handles: Vec<WeakConnection>,
    cleaning_up_handles: bool,
    request_info: ConnectionRequestInfo,
    statement_cache: Option<StatementCache>,
    client_info_explicitly_set: bool,
    client_info_implicitly_set: bool,
}

/// A pooled physical connection plus its transaction and cache state.
pub struct ManagedConnection {
    factory: Arc<ConnectionFactory>,
    physical: SharedPhysical,
    initial: Properties,
    initial_request: ConnectionRequestInfo,
    stale: AtomicBool,
    destroyed: AtomicBool,
    connection_error_reported: AtomicBool,
    state: Mutex<ManagedState>,
    listeners: RwLock<Vec<Arc<dyn ConnectionEventListener>>>,
}

impl ManagedConnection {
    /// Wrap `physical`, applying the properties requested in `request_info`.
    pub fn new(
        factory: &Arc<ConnectionFactory>,
        mut physical: Box<dyn DriverConnection>,
        request_info: ConnectionRequestInfo,
    ) -> Result<Arc<Self>> {
        let initial = Properties::read(physical.as_mut()).map_err(Error::driver)?;
        let mut properties = initial.clone();
        properties
            .apply_request(physical.as_mut(), &request_info)
            .map_err(Error::driver)?;

        let config = factory.config();
        let statement_cache = StatementCache::with_capacity(config.statement_cache_size);
        tracing::debug!(
            statement_cache_size = config.statement_cache_size,
            auto_commit = properties.auto_commit,
            isolation = %properties.isolation,
            "managed connection created"
        );

        Ok(Arc::new(Self {
            factory: Arc::clone(factory),
            physical: Arc::new(Mutex::new(physical)),
            initial,
            initial_request: request_info.clone(),
            stale: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            connection_error_reported: AtomicBool::new(false),
            state: Mutex::new(ManagedState {
                transaction: TransactionState::NoTransaction,
                properties,
                handles: Vec::new(),
                cleaning_up_handles: false,
                request_info,
                statement_cache,
                client_info_explicitly_set: false,
                client_info_implicitly_set: false,
            }),
            listeners: RwLock::new(Vec::new()),
        }))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Pool operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new handle bound to this managed connection.
    pub fn get_connection(self: &Arc<Self>, manager: Arc<dyn ConnectionManager>) -> Result<Connection> {
        if self.is_stale() {
            return Err(Error::stale_connection());
        }
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::resource(ResourceError::IllegalState(
                "managed connection has been destroyed".to_string(),
            )));
        }
        let track_thread = self.factory.config().enable_multithreaded_access_detection;

        let mut state = self.state.lock();
        let handle = Connection::bound(
            manager,
            self,
            state.properties.auto_commit,
            state.properties.isolation,
            track_thread.then(|| thread::current().id()),
        );
        state.handles.push(handle.downgrade());
        tracing::debug!(
            handle = %handle.id(),
            handles = state.handles.len(),
            "handle created"
        );
        Ok(handle)
    }

    /// Bind an inactive (or reserved) handle to this managed connection.
    pub fn associate_connection(self: &Arc<Self>, handle: &Connection) -> std::result::Result<(), ResourceError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ResourceError::IllegalState(
                "managed connection has been destroyed".to_string(),
            ));
        }
        handle.reassociate(self, self.access_key())?;

        let mut state = self.state.lock();
        if !state.handles.iter().any(|h| h.id() == handle.id()) {
            state.handles.push(handle.downgrade());
        }
        tracing::debug!(handle = %handle.id(), handles = state.handles.len(), "handle associated");
        Ok(())
    }

    /// Dissociate every handle and return the physical connection to its
    /// initial properties, ready for reuse by the pool.
    pub fn cleanup(&self) -> std::result::Result<(), ResourceError> {
        let handles = {
            let mut state = self.state.lock();
            state.cleaning_up_handles = true;
            std::mem::take(&mut state.handles)
        };

        let mut first_error: Option<ResourceError> = None;
        for handle in handles.iter().filter_map(WeakConnection::upgrade) {
            if let Err(e) = handle.dissociate() {
                tracing::debug!(handle = %handle.id(), error = %e, "dissociate during cleanup failed");
                first_error.get_or_insert(e.into());
            }
        }

        let mut state = self.state.lock();
        state.cleaning_up_handles = false;
        state.client_info_explicitly_set = false;
        state.client_info_implicitly_set = false;
        state.request_info = self.initial_request.clone();
        if state.transaction != TransactionState::GlobalTransactionActive {
            state.transaction = TransactionState::NoTransaction;
        }
        let restored = {
            let mut physical = self.physical.lock();
            state.properties.restore(physical.as_mut(), &self.initial)
        };
        drop(state);
        if let Err(e) = restored {
            first_error.get_or_insert(ResourceError::Driver(e));
        }

        tracing::debug!("managed connection cleaned up");
        first_error.map_or(Ok(()), Err)
    }

    /// Release the physical connection. Handles still bound are dissociated.
    pub fn destroy(&self) -> std::result::Result<(), ResourceError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = self.cleanup().err();

        let cached = self
            .state
            .lock()
            .statement_cache
            .as_mut()
            .map(StatementCache::drain)
            .unwrap_or_default();
        for mut statement in cached {
            if let Err(e) = statement.close() {
                tracing::debug!(error = %e, "failed to close cached statement");
            }
        }

        if let Err(e) = self.physical.lock().close() {
            first_error.get_or_insert(ResourceError::Driver(e));
        }
        tracing::debug!("managed connection destroyed");
        first_error.map_or(Ok(()), Err)
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionEventListener>) {
        self.listeners.write().push(listener);
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<ConnectionFactory> {
        &self.factory
    }

    #[must_use]
    pub fn access_key(&self) -> &AccessKey {
        self.factory.access_key()
    }

    pub(crate) fn physical(&self) -> SharedPhysical {
        Arc::clone(&self.physical)
    }

    fn fire(&self, event: &ConnectionEvent) {
        let listeners = self.listeners.read().clone();
        tracing::trace!(event = event.name(), listeners = listeners.len(), "firing connection event");
        for listener in listeners {
            listener.connection_event(event);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Staleness and transactions
    // ═══════════════════════════════════════════════════════════════════════

    /// Flag the connection as purged by an administrator. Every further
    /// transactional operation on its handles fails with a stale error.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
        tracing::info!("managed connection marked stale");
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        self.state.lock().transaction
    }

    /// Whether this connection is enlisted in a global transaction.
    #[must_use]
    pub fn in_global_transaction(&self) -> bool {
        self.transaction_state() == TransactionState::GlobalTransactionActive
    }

    /// Whether the calling context has a global transaction, enlisted or not.
    #[must_use]
    pub fn is_global_transaction_active(&self) -> bool {
        self.factory.transactions().is_global_transaction_active()
    }

    #[must_use]
    pub fn global_transaction_deadline(&self) -> Option<Instant> {
        self.factory.transactions().global_transaction_deadline()
    }

    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.factory.config().transactional
    }

    /// Enlist in the caller's global transaction.
    pub fn enlist_global(&self) -> std::result::Result<(), ResourceError> {
        self.transition(
            "enlist",
            TransactionState::NoTransaction,
            TransactionState::GlobalTransactionActive,
        )
    }

    /// Complete the global transaction branch.
    pub fn end_global(&self) -> std::result::Result<(), ResourceError> {
        let mut state = self.state.lock();
        match state.transaction {
            TransactionState::GlobalTransactionActive
            | TransactionState::TransactionEnding
            | TransactionState::TransactionFailed => {
                state.transaction = TransactionState::NoTransaction;
                Ok(())
            }
            other => Err(ResourceError::IllegalState(format!(
                "cannot end a global transaction in state {other}"
            ))),
        }
    }

    /// Record that the global transaction branch is being completed.
    pub fn begin_global_end(&self) -> std::result::Result<(), ResourceError> {
        self.transition(
            "end",
            TransactionState::GlobalTransactionActive,
            TransactionState::TransactionEnding,
        )
    }

    pub fn mark_transaction_failed(&self) {
        self.state.lock().transaction = TransactionState::TransactionFailed;
    }

    fn transition(
        &self,
        operation: &str,
        from: TransactionState,
        to: TransactionState,
    ) -> std::result::Result<(), ResourceError> {
        let mut state = self.state.lock();
        if state.transaction != from {
            return Err(ResourceError::IllegalState(format!(
                "cannot {operation} in transaction state {}",
                state.transaction
            )));
        }
        state.transaction = to;
        Ok(())
    }

    /// A handle started a local transaction.
    pub fn process_local_transaction_started(&self, handle: HandleId) -> std::result::Result<(), ResourceError> {
        self.transition(
            "begin a local transaction",
            TransactionState::NoTransaction,
            TransactionState::LocalTransactionActive,
        )?;
        tracing::debug!(handle = %handle, "local transaction started");
        self.fire(&ConnectionEvent::LocalTransactionStarted { handle });
        Ok(())
    }

    /// A handle committed its local transaction.
    pub fn process_local_transaction_committed(&self, handle: HandleId) -> std::result::Result<(), ResourceError> {
        self.complete_local_transaction(handle, true)?;
        self.fire(&ConnectionEvent::LocalTransactionCommitted { handle });
        Ok(())
    }

    /// A handle rolled back its local transaction.
    pub fn process_local_transaction_rolled_back(&self, handle: HandleId) -> std::result::Result<(), ResourceError> {
        self.complete_local_transaction(handle, false)?;
        self.fire(&ConnectionEvent::LocalTransactionRolledBack { handle });
        Ok(())
    }

    fn complete_local_transaction(&self, handle: HandleId, commit: bool) -> std::result::Result<(), ResourceError> {
        let mut state = self.state.lock();
        if state.transaction != TransactionState::LocalTransactionActive {
            return Err(ResourceError::IllegalState(format!(
                "no local transaction to complete in state {}",
                state.transaction
            )));
        }

        if !state.properties.auto_commit {
            let _span = tracing::debug_span!("local_transaction", handle = %handle, commit).entered();
            let mut physical = self.physical.lock();
            let outcome = if commit {
                physical.commit()
            } else {
                physical.rollback()
            };
            outcome.map_err(|e| {
                state.transaction = TransactionState::TransactionFailed;
                ResourceError::Driver(e)
            })?;
        }
        state.transaction = TransactionState::NoTransaction;
        Ok(())
    }

    /// A bound handle closed.
    pub fn process_connection_closed(&self, handle: HandleId) {
        {
            let mut state = self.state.lock();
            if state.cleaning_up_handles {
                return;
            }
            state.handles.retain(|h| h.id() != handle);
        }
        self.fire(&ConnectionEvent::ConnectionClosed { handle });
    }

    /// The physical connection is unusable; ask the pool to evict it.
    ///
    /// Only the first report fires an event.
    pub fn connection_error_occurred(&self, message: impl Into<String>) {
        if self.connection_error_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        let message = message.into();
        tracing::warn!(%message, "connection error; managed connection will be evicted");
        self.fire(&ConnectionEvent::ConnectionErrorOccurred { message });
    }

    /// Forget `handle` without firing an event.
    pub fn dissociate_handle(&self, handle: HandleId) {
        let mut state = self.state.lock();
        if !state.cleaning_up_handles {
            state.handles.retain(|h| h.id() != handle);
        }
    }

    /// Number of handles currently sharing this managed connection.
    ///
    /// Handles whose last owner is gone are pruned first.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        let mut state = self.state.lock();
        state.handles.retain(WeakConnection::is_alive);
        state.handles.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Connection properties
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn auto_commit(&self) -> bool {
        self.state.lock().properties.auto_commit
    }

    /// Make the physical connection's auto-commit match `auto_commit`,
    /// skipping the driver when it already does.
    pub fn enforce_auto_commit(&self, auto_commit: bool) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.properties.auto_commit != auto_commit {
            self.physical.lock().set_auto_commit(auto_commit)?;
            state.properties.auto_commit = auto_commit;
        }
        Ok(())
    }

    #[must_use]
    pub fn transaction_isolation(&self) -> IsolationLevel {
        self.state.lock().properties.isolation
    }

    pub fn set_transaction_isolation(&self, level: IsolationLevel) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.properties.isolation != level {
            self.physical.lock().set_transaction_isolation(level)?;
            state.properties.isolation = level;
        }
        Ok(())
    }

    #[must_use]
    pub fn catalog(&self) -> Option<String> {
        self.state.lock().properties.catalog.clone()
    }

    pub fn set_catalog(&self, catalog: &str) -> DriverResult<()> {
        let mut state = self.state.lock();
        self.physical.lock().set_catalog(catalog)?;
        state.properties.catalog = Some(catalog.to_string());
        Ok(())
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state.lock().properties.read_only
    }

    pub fn set_read_only(&self, read_only: bool) -> DriverResult<()> {
        let mut state = self.state.lock();
        self.physical.lock().set_read_only(read_only)?;
        state.properties.read_only = read_only;
        Ok(())
    }

    #[must_use]
    pub fn holdability(&self) -> Holdability {
        self.state.lock().properties.holdability
    }

    pub fn set_holdability(&self, holdability: Holdability) -> DriverResult<()> {
        let mut state = self.state.lock();
        self.physical.lock().set_holdability(holdability)?;
        state.properties.holdability = holdability;
        Ok(())
    }

    #[must_use]
    pub fn type_map(&self) -> TypeMap {
        self.state.lock().properties.type_map.clone()
    }

    pub fn set_type_map(&self, map: &TypeMap) -> DriverResult<()> {
        let mut state = self.state.lock();
        self.physical.lock().set_type_map(map)?;
        state.properties.type_map = map.clone();
        Ok(())
    }

    #[must_use]
    pub fn schema(&self) -> Option<String> {
        self.state.lock().properties.schema.clone()
    }

    pub fn set_schema(&self, schema: &str) -> DriverResult<()> {
        let mut state = self.state.lock();
        self.physical.lock().set_schema(schema)?;
        state.properties.schema = Some(schema.to_string());
        Ok(())
    }

    /// Current request info used for pool matching.
    #[must_use]
    pub fn request_info(&self) -> ConnectionRequestInfo {
        self.state.lock().request_info.clone()
    }

    /// Update the request info after a sharing setter changed a property.
    pub(crate) fn update_request_info(&self, update: impl FnOnce(&mut ConnectionRequestInfo)) {
        let mut state = self.state.lock();
        update(state.request_info.make_changeable());
    }

    pub fn mark_client_info_explicitly_set(&self) {
        self.state.lock().client_info_explicitly_set = true;
    }

    /// Client info was changed as a side effect of another operation.
    pub fn mark_client_info_implicitly_set(&self) {
        self.state.lock().client_info_implicitly_set = true;
    }

    #[must_use]
    pub fn client_info_touched(&self) -> bool {
        let state = self.state.lock();
        state.client_info_explicitly_set || state.client_info_implicitly_set
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Statement cache
    // ═══════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn is_statement_caching_enabled(&self) -> bool {
        self.state.lock().statement_cache.is_some()
    }

    /// Take the statement cached under `key`, if any.
    pub fn take_statement(&self, key: &StatementCacheKey) -> Option<Box<dyn DriverStatement>> {
        self.state
            .lock()
            .statement_cache
            .as_mut()
            .and_then(|cache| cache.take(key))
    }

    /// Return a statement to the cache. Whatever it displaces is closed.
    pub fn cache_statement(&self, key: StatementCacheKey, statement: Box<dyn DriverStatement>) {
        let displaced = {
            let mut state = self.state.lock();
            match state.statement_cache.as_mut() {
                Some(cache) => cache.put(key, statement),
                None => Some(statement),
            }
        };
        if let Some(mut displaced) = displaced {
            if let Err(e) = displaced.close() {
                tracing::debug!(error = %e, "failed to close statement displaced from cache");
            }
        }
    }

    #[must_use]
    pub fn statement_cache_stats(&self) -> Option<CacheStats> {
        self.state.lock().statement_cache.as_ref().map(StatementCache::stats)
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("stale", &self.is_stale())
            .field("destroyed", &self.destroyed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
