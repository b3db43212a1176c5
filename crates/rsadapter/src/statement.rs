//! Statement wrappers.
//!
//! [`Statement`], [`PreparedStatement`] and [`CallableStatement`] are ids into
//! their connection handle's arena. Every execute call first closes the
//! statement's outstanding result sets, then begins a transaction if needed
//! and pushes pending property changes to the driver statement.
//!
//! Prepared and callable statements carry a cache key. Closing one returns
//! the driver statement to the managed connection's statement cache when it
//! is reusable as-is.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::MutexGuard;

use crate::cache_key::{KeyContext, StatementCacheKey};
use crate::connection::{Connection, HandleCore};
use crate::driver::{CurrentResult, DriverResultSet, DriverStatement, Holdability, StatementOptions, Value};
use crate::error::DriverResult;
use crate::helper::DriverHelper;
use crate::result_set::{ResultSet, ResultSetEntry, ResultSetParent};
use crate::state::{ChildSet, Introspection, WrapperId, WrapperKind, WrapperState};
use crate::{Error, Result};

/// How the query timeout follows the global transaction timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeoutSync {
    Off,
    /// Push the remaining transaction time, in seconds.
    Push(u32),
    /// No global transaction; restore a timeout overridden earlier.
    Restore,
}

/// Arena entry of one open statement.
pub(crate) struct StatementEntry {
    pub(crate) kind: WrapperKind,
    driver: Box<dyn DriverStatement>,
    requested_fetch_size: u32,
    applied_fetch_size: u32,
    poolable: bool,
    pub(crate) close_on_completion: bool,
    has_batch_parameters: bool,
    query_timeout_set_by_user: bool,
    timeout_before_sync: Option<u32>,
    properties_changed: bool,
    pub(crate) holdability: Holdability,
    cache_key: Option<StatementCacheKey>,
    /// Primary slot: the result of `execute_query`. List: further results.
    pub(crate) results: ChildSet<WrapperId>,
    sql: Option<String>,
}

impl StatementEntry {
    fn new(
        kind: WrapperKind,
        driver: Box<dyn DriverStatement>,
        holdability: Holdability,
        cache_key: Option<StatementCacheKey>,
    ) -> Self {
        Self {
            kind,
            driver,
            requested_fetch_size: 0,
            applied_fetch_size: 0,
            poolable: kind != WrapperKind::Statement,
            close_on_completion: false,
            has_batch_parameters: false,
            query_timeout_set_by_user: false,
            timeout_before_sync: None,
            properties_changed: false,
            holdability,
            cache_key,
            results: ChildSet::default(),
            sql: None,
        }
    }

    fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }

    /// Apply the requested fetch size and the synced query timeout.
    fn enforce_properties(&mut self, sync: TimeoutSync) -> DriverResult<()> {
        if self.requested_fetch_size != self.applied_fetch_size {
            self.driver.set_fetch_size(self.requested_fetch_size)?;
            self.applied_fetch_size = self.requested_fetch_size;
            self.properties_changed = true;
        }

        match sync {
            TimeoutSync::Off => {}
            TimeoutSync::Push(seconds) => {
                if self.timeout_before_sync.is_none() {
                    self.timeout_before_sync = Some(self.driver.query_timeout()?);
                }
                self.driver.set_query_timeout(seconds)?;
                self.properties_changed = true;
            }
            TimeoutSync::Restore => {
                if let Some(previous) = self.timeout_before_sync.take() {
                    self.driver.set_query_timeout(previous)?;
                }
            }
        }
        Ok(())
    }

    /// Put the driver statement back into a state fit for the cache.
    fn reset_for_cache(
        &mut self,
        helper: &dyn DriverHelper,
        default_timeout: Option<u32>,
    ) -> DriverResult<()> {
        if self.properties_changed {
            helper.do_statement_cleanup(self.driver.as_mut())?;
            if let Some(seconds) = default_timeout {
                self.driver.set_query_timeout(seconds)?;
            }
        }
        self.driver.clear_parameters()?;
        if self.has_batch_parameters {
            self.driver.clear_batch()?;
        }
        Ok(())
    }
}

fn close_quietly(mut statement: Box<dyn DriverStatement>) {
    if let Err(e) = statement.close() {
        tracing::debug!(error = %e, "failed to close driver statement");
    }
}

/// Whole seconds left until `deadline`, rounded up.
fn remaining_seconds(deadline: Instant, now: Instant) -> std::result::Result<u32, u64> {
    match deadline.checked_duration_since(now) {
        Some(left) if !left.is_zero() => {
            Ok(u32::try_from(left.as_millis().div_ceil(1000)).unwrap_or(u32::MAX))
        }
        _ => Err(u64::try_from(now.duration_since(deadline).as_millis()).unwrap_or(u64::MAX)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Handle core: statement creation and lifecycle
// ═══════════════════════════════════════════════════════════════════════════

impl HandleCore {
    fn statement_mut(&mut self, id: WrapperId) -> Result<&mut StatementEntry> {
        self.statements
            .get_mut(&id)
            .ok_or(Error::closed(WrapperKind::Statement))
    }

    fn register_statement(&mut self, entry: StatementEntry) -> WrapperId {
        let id = self.next_child_id();
        tracing::debug!(
            handle = %self.id,
            statement = %id,
            kind = %entry.kind,
            cached = entry.cache_key.is_some(),
            "statement created"
        );
        self.children.push(id);
        self.statements.insert(id, entry);
        id
    }

    /// Apply the configured default query timeout to a new driver statement.
    fn apply_default_timeout(
        &self,
        mut statement: Box<dyn DriverStatement>,
    ) -> Result<Box<dyn DriverStatement>> {
        if let Some(seconds) = self.config().query_timeout_secs()
            && let Err(e) = statement.set_query_timeout(seconds)
        {
            close_quietly(statement);
            return Err(self.map_driver_error(e));
        }
        Ok(statement)
    }

    pub(crate) fn create_statement(&mut self, options: &StatementOptions) -> Result<WrapperId> {
        self.ensure_open()?;
        self.begin_transaction_if_necessary()?;
        let holdability = match options.holdability {
            Some(holdability) => holdability,
            None => self.managed()?.holdability(),
        };

        let driver = self.with_physical("create_statement", |c| c.create_statement(options))?;
        let driver = self.apply_default_timeout(driver)?;
        Ok(self.register_statement(StatementEntry::new(
            WrapperKind::Statement,
            driver,
            holdability,
            None,
        )))
    }

    /// Cache key for a new prepared statement, or `None` when caching is off
    /// or `build` declines.
    fn cache_key(
        &self,
        build: impl FnOnce(KeyContext<'_>) -> Option<StatementCacheKey>,
    ) -> Result<Option<StatementCacheKey>> {
        let managed = self.managed()?;
        if !managed.is_statement_caching_enabled() {
            return Ok(None);
        }
        let schema = managed.schema();
        let ctx = KeyContext {
            holdability: managed.holdability(),
            isolation: self
                .config()
                .statement_cache_isolation_level
                .then_some(self.isolation),
            schema: schema.as_deref(),
        };
        Ok(build(ctx))
    }

    pub(crate) fn prepare_statement(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<WrapperId> {
        self.ensure_open()?;
        let key = self.cache_key(|ctx| Some(StatementCacheKey::prepared(sql, options, ctx)))?;
        self.prepare_entry(WrapperKind::PreparedStatement, sql, options, key)
    }

    pub(crate) fn prepare_call(&mut self, sql: &str, options: &StatementOptions) -> Result<WrapperId> {
        self.ensure_open()?;
        let key = self.cache_key(|ctx| Some(StatementCacheKey::callable(sql, options, ctx)))?;
        self.prepare_entry(WrapperKind::CallableStatement, sql, options, key)
    }

    pub(crate) fn prepare_section(
        &mut self,
        sql: &str,
        options: &StatementOptions,
        section: &str,
        suffix: Option<&str>,
        suffix_required: bool,
    ) -> Result<WrapperId> {
        self.ensure_open()?;
        let key = self.cache_key(|ctx| {
            StatementCacheKey::section(
                sql,
                options,
                ctx,
                section,
                suffix.map(str::to_owned),
                suffix_required,
            )
        })?;
        if key.is_none() && suffix_required && suffix.is_none() {
            tracing::debug!(handle = %self.id, section, "no suffix for section; statement not cached");
        }
        self.prepare_entry(WrapperKind::PreparedStatement, sql, options, key)
    }

    fn prepare_entry(
        &mut self,
        kind: WrapperKind,
        sql: &str,
        options: &StatementOptions,
        key: Option<StatementCacheKey>,
    ) -> Result<WrapperId> {
        self.begin_transaction_if_necessary()?;
        let managed = Arc::clone(self.managed()?);
        let holdability = options.holdability.unwrap_or_else(|| managed.holdability());

        let cached = key.as_ref().and_then(|k| managed.take_statement(k));
        let driver = match cached {
            Some(mut statement) => {
                tracing::debug!(handle = %self.id, sql, "statement cache hit");
                let mut reset = statement.clear_parameters();
                if reset.is_ok() && kind == WrapperKind::CallableStatement {
                    reset = statement.clear_batch();
                }
                if let Err(e) = reset {
                    close_quietly(statement);
                    return Err(self.map_driver_error(e));
                }
                statement
            }
            None => {
                let statement = self.with_physical("prepare", |c| {
                    if kind == WrapperKind::CallableStatement {
                        c.prepare_call(sql, options)
                    } else {
                        c.prepare_statement(sql, options)
                    }
                })?;
                self.apply_default_timeout(statement)?
            }
        };

        let entry = StatementEntry::new(kind, driver, holdability, key).with_sql(sql);
        Ok(self.register_statement(entry))
    }

    /// Close a statement and its result sets. Reusable prepared statements go
    /// back to the cache instead of being closed on the driver.
    pub(crate) fn close_statement(&mut self, id: WrapperId) -> Result<()> {
        let Some(entry) = self.statements.get_mut(&id) else {
            return Ok(());
        };
        entry.close_on_completion = false;

        let mut first_error = self.close_statement_results(id, false).err();
        self.children.remove(id);
        if let Some(entry) = self.statements.remove(&id)
            && let Err(e) = self.release_statement(entry)
        {
            first_error.get_or_insert(e);
        }
        tracing::debug!(handle = %self.id, statement = %id, "statement closed");
        first_error.map_or(Ok(()), Err)
    }

    fn release_statement(&self, mut entry: StatementEntry) -> Result<()> {
        let key = entry.cache_key.take();
        let managed = self.managed_if_bound().map(Arc::clone);
        let (Some(key), true, Some(managed)) = (key, entry.poolable, managed) else {
            return entry.driver.close().map_err(|e| self.map_driver_error(e));
        };

        let helper = self.factory.helper();
        let reusable = match entry.driver.more_results(CurrentResult::CloseCurrent) {
            Ok(false) => matches!(helper.update_count(entry.driver.as_mut()), Ok(-1)),
            _ => false,
        };
        if !reusable {
            return entry.driver.close().map_err(|e| self.map_driver_error(e));
        }

        if let Err(e) = entry.reset_for_cache(helper, self.config().query_timeout_secs()) {
            tracing::debug!(handle = %self.id, error = %e, "statement cleanup failed; closing instead of caching");
            close_quietly(entry.driver);
            return Err(self.map_driver_error(e));
        }
        tracing::trace!(handle = %self.id, key = %key, "statement returned to cache");
        managed.cache_statement(key, entry.driver);
        Ok(())
    }

    /// Close every result set of a statement, newest first.
    ///
    /// `wrapper_only` skips the driver close, for cursors the driver already
    /// closed itself.
    pub(crate) fn close_statement_results(&mut self, id: WrapperId, wrapper_only: bool) -> Result<()> {
        let Some(entry) = self.statements.get(&id) else {
            return Ok(());
        };
        let results = entry.results.snapshot();
        let mut first_error = None;
        for result_set in results.into_iter().rev() {
            if let Err(e) = self.close_result_set(result_set, wrapper_only) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Execution
    // ═══════════════════════════════════════════════════════════════════════

    /// Timeout sync decision for the next execution of `id`.
    fn timeout_sync(&self, id: WrapperId) -> Result<TimeoutSync> {
        let user_set = self
            .statements
            .get(&id)
            .is_some_and(|s| s.query_timeout_set_by_user);
        if user_set || !self.config().sync_query_timeout_with_transaction_timeout {
            return Ok(TimeoutSync::Off);
        }

        let managed = self.managed()?;
        if !managed.in_global_transaction() {
            return Ok(TimeoutSync::Restore);
        }
        let Some(deadline) = managed.global_transaction_deadline() else {
            return Ok(TimeoutSync::Restore);
        };
        remaining_seconds(deadline, Instant::now())
            .map(TimeoutSync::Push)
            .map_err(Error::transaction_timeout)
    }

    fn enforce_statement_properties(&mut self, id: WrapperId) -> Result<()> {
        let sync = self.timeout_sync(id)?;
        let outcome = self.statement_mut(id)?.enforce_properties(sync);
        outcome.map_err(|e| self.map_driver_error(e))
    }

    /// Common preamble of every execute call.
    fn prepare_execution(&mut self, id: WrapperId) -> Result<()> {
        let kind = self.statement_mut(id)?.kind;
        if let Err(e) = self.close_statement_results(id, false) {
            tracing::trace!(handle = %self.id, statement = %id, error = %e, "error closing previous results");
        }
        if !self.statements.contains_key(&id) {
            return Err(Error::closed(kind));
        }
        self.begin_transaction_if_necessary()?;
        self.enforce_statement_properties(id)
    }

    fn execute_with<R>(
        &mut self,
        id: WrapperId,
        operation: &'static str,
        sql: Option<&str>,
        f: impl FnOnce(&mut dyn DriverStatement) -> DriverResult<R>,
    ) -> Result<R> {
        self.prepare_execution(id)?;
        let handle = self.id;
        let entry = self.statement_mut(id)?;
        if let Some(sql) = sql {
            entry.sql = Some(sql.to_string());
        }
        let result = {
            let _span =
                tracing::debug_span!("driver.statement", handle = %handle, statement = %id, operation)
                    .entered();
            f(entry.driver.as_mut())
        };
        result.map_err(|e| self.map_driver_error(e))
    }

    pub(crate) fn execute(&mut self, id: WrapperId, sql: Option<&str>) -> Result<bool> {
        self.execute_with(id, "execute", sql, |s| s.execute(sql))
    }

    pub(crate) fn execute_update(&mut self, id: WrapperId, sql: Option<&str>) -> Result<i64> {
        self.execute_with(id, "execute_update", sql, |s| s.execute_update(sql))
    }

    pub(crate) fn execute_query(&mut self, id: WrapperId, sql: Option<&str>) -> Result<WrapperId> {
        let driver = self.execute_with(id, "execute_query", sql, |s| s.execute_query(sql))?;
        let sql = self.statements.get(&id).and_then(|s| s.sql.clone());
        Ok(self.register_result_set(ResultSetParent::Statement(id), driver, sql, true))
    }

    /// Run the batch. A batch failure keeps the driver error intact so the
    /// per-statement counts survive, even when it also reports a dead
    /// connection.
    pub(crate) fn execute_batch(&mut self, id: WrapperId) -> Result<Vec<i64>> {
        self.prepare_execution(id)?;
        let handle = self.id;
        let entry = self.statement_mut(id)?;
        entry.has_batch_parameters = false;
        let result = {
            let _span = tracing::debug_span!(
                "driver.statement",
                handle = %handle,
                statement = %id,
                operation = "execute_batch"
            )
            .entered();
            entry.driver.execute_batch()
        };

        result.map_err(|e| {
            if !e.is_batch_update() {
                return self.map_driver_error(e);
            }
            if self.factory.helper().is_connection_error(&e)
                && let Some(managed) = self.managed_if_bound()
            {
                managed.connection_error_occurred(e.message());
            }
            tracing::debug!(handle = %handle, statement = %id, error = %e, "batch update failed");
            Error::batch_update(e)
        })
    }

    /// Move to the next result, closing current ones by `current`.
    ///
    /// Close-on-completion is suppressed while the old results are closed and
    /// re-checked once the driver has answered.
    pub(crate) fn more_results(&mut self, id: WrapperId, current: CurrentResult) -> Result<bool> {
        let entry = self.statement_mut(id)?;
        let close_on_completion = std::mem::replace(&mut entry.close_on_completion, false);
        let outcome = self.advance_results(id, current);
        if let Some(entry) = self.statements.get_mut(&id) {
            entry.close_on_completion = close_on_completion;
        }
        let more = outcome?;

        if close_on_completion && !more && current != CurrentResult::KeepCurrent {
            let count = match self.statements.get_mut(&id) {
                Some(entry) => self.factory.helper().update_count(entry.driver.as_mut()),
                None => return Ok(more),
            };
            if count.map_err(|e| self.map_driver_error(e))? == -1 {
                tracing::debug!(handle = %self.id, statement = %id, "statement complete; closing");
                self.close_statement(id)?;
            }
        }
        Ok(more)
    }

    fn advance_results(&mut self, id: WrapperId, current: CurrentResult) -> Result<bool> {
        let entry = self.statement_mut(id)?;
        let closing: Vec<WrapperId> = match current {
            CurrentResult::CloseAll => entry.results.snapshot(),
            CurrentResult::CloseCurrent => entry.results.current().into_iter().collect(),
            CurrentResult::KeepCurrent => Vec::new(),
        };
        for result_set in closing {
            if let Err(e) = self.close_result_set(result_set, true) {
                tracing::trace!(handle = %self.id, error = %e, "error detaching result set");
            }
        }
        self.with_statement(id, "more_results", |s| s.driver.more_results(current))
    }

    /// Wrap the driver's current result set.
    pub(crate) fn current_result_set(&mut self, id: WrapperId) -> Result<Option<WrapperId>> {
        let driver = self.with_statement(id, "result_set", |s| s.driver.result_set())?;
        let sql = self.statements.get(&id).and_then(|s| s.sql.clone());
        Ok(driver.map(|d| self.register_result_set(ResultSetParent::Statement(id), d, sql, false)))
    }

    pub(crate) fn register_result_set(
        &mut self,
        parent: ResultSetParent,
        driver: Box<dyn DriverResultSet>,
        sql: Option<String>,
        primary: bool,
    ) -> WrapperId {
        let id = self.next_child_id();
        match parent {
            ResultSetParent::Statement(statement) => {
                if let Some(entry) = self.statements.get_mut(&statement) {
                    if primary {
                        entry.results.set_primary(id);
                    } else {
                        entry.results.add(id);
                    }
                }
            }
            ResultSetParent::Metadata(_) => {
                if let Some(metadata) = self.metadata.as_mut() {
                    metadata.results.push(id);
                }
            }
        }
        self.result_sets
            .insert(id, ResultSetEntry::new(driver, parent, sql));
        id
    }

    /// Run `f` against a statement entry and map its failure.
    pub(crate) fn with_statement<R>(
        &mut self,
        id: WrapperId,
        operation: &'static str,
        f: impl FnOnce(&mut StatementEntry) -> DriverResult<R>,
    ) -> Result<R> {
        let handle = self.id;
        let entry = self.statement_mut(id)?;
        let result = {
            let _span =
                tracing::debug_span!("driver.statement", handle = %handle, statement = %id, operation)
                    .entered();
            f(entry)
        };
        result.map_err(|e| self.map_driver_error(e))
    }

    fn introspect_statement(&self, id: WrapperId, kind: WrapperKind) -> Introspection {
        let Some(entry) = self.statements.get(&id) else {
            return Introspection::new(kind, WrapperState::Closed, 0).with("id", id.to_string());
        };
        Introspection::new(entry.kind, WrapperState::Active, entry.results.len())
            .with("id", id.to_string())
            .with("handle", self.id.to_string())
            .with("sql", entry.sql.clone())
            .with("cache_key", entry.cache_key.as_ref().map(ToString::to_string))
            .with("requested_fetch_size", entry.requested_fetch_size)
            .with("applied_fetch_size", entry.applied_fetch_size)
            .with("poolable", entry.poolable)
            .with("close_on_completion", entry.close_on_completion)
            .with("has_batch_parameters", entry.has_batch_parameters)
            .with("query_timeout_set_by_user", entry.query_timeout_set_by_user)
            .with("properties_changed", entry.properties_changed)
            .with("holdability", format!("{:?}", entry.holdability))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Public wrappers
// ═══════════════════════════════════════════════════════════════════════════

/// Operations shared by every statement kind.
#[derive(Clone)]
pub struct StatementHandle {
    connection: Connection,
    id: WrapperId,
    kind: WrapperKind,
}

impl StatementHandle {
    /// Lock the handle core, reactivating the connection if it is reserved.
    fn open(&self) -> Result<MutexGuard<'_, HandleCore>> {
        {
            let core = self.connection.core.lock();
            if !core.statements.contains_key(&self.id) {
                return Err(Error::closed(self.kind));
            }
            if core.state == WrapperState::Active {
                return Ok(core);
            }
        }
        self.connection.activate()?;
        let core = self.connection.core.lock();
        if !core.statements.contains_key(&self.id) {
            return Err(Error::closed(self.kind));
        }
        Ok(core)
    }

    fn result_set(&self, id: WrapperId) -> ResultSet {
        ResultSet::new(self.connection.clone(), id)
    }

    #[must_use]
    pub const fn id(&self) -> WrapperId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> WrapperKind {
        self.kind
    }

    /// The connection handle that created this statement.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.connection.core.lock().statements.contains_key(&self.id)
    }

    pub fn execute_batch(&self) -> Result<Vec<i64>> {
        self.open()?.execute_batch(self.id)
    }

    pub fn clear_batch(&self) -> Result<()> {
        self.open()?.with_statement(self.id, "clear_batch", |s| {
            s.driver.clear_batch()?;
            s.has_batch_parameters = false;
            Ok(())
        })
    }

    pub fn more_results(&self, current: CurrentResult) -> Result<bool> {
        self.open()?.more_results(self.id, current)
    }

    /// The driver's current result set, if the last execution produced one.
    pub fn current_result_set(&self) -> Result<Option<ResultSet>> {
        let id = self.open()?.current_result_set(self.id)?;
        Ok(id.map(|id| self.result_set(id)))
    }

    pub fn update_count(&self) -> Result<i64> {
        let mut core = self.open()?;
        let factory = Arc::clone(&core.factory);
        core.with_statement(self.id, "update_count", |s| {
            factory.helper().update_count(s.driver.as_mut())
        })
    }

    /// Record a fetch size; it reaches the driver on the next execution.
    pub fn set_fetch_size(&self, rows: u32) -> Result<()> {
        let mut core = self.open()?;
        core.statement_mut(self.id)?.requested_fetch_size = rows;
        Ok(())
    }

    pub fn fetch_size(&self) -> Result<u32> {
        let mut core = self.open()?;
        Ok(core.statement_mut(self.id)?.requested_fetch_size)
    }

    pub fn set_query_timeout(&self, seconds: u32) -> Result<()> {
        self.open()?.with_statement(self.id, "set_query_timeout", |s| {
            s.driver.set_query_timeout(seconds)?;
            s.query_timeout_set_by_user = true;
            s.timeout_before_sync = None;
            s.properties_changed = true;
            Ok(())
        })
    }

    pub fn query_timeout(&self) -> Result<u32> {
        self.open()?
            .with_statement(self.id, "query_timeout", |s| s.driver.query_timeout())
    }

    pub fn set_poolable(&self, poolable: bool) -> Result<()> {
        self.open()?.with_statement(self.id, "set_poolable", |s| {
            s.driver.set_poolable(poolable)?;
            s.poolable = poolable;
            Ok(())
        })
    }

    pub fn is_poolable(&self) -> Result<bool> {
        let mut core = self.open()?;
        Ok(core.statement_mut(self.id)?.poolable)
    }

    pub fn cancel(&self) -> Result<()> {
        self.open()?
            .with_statement(self.id, "cancel", |s| s.driver.cancel())
    }

    /// Close the statement automatically once all its results are consumed.
    pub fn close_on_completion(&self) -> Result<()> {
        let mut core = self.connection.core.lock();
        match core.statements.get_mut(&self.id) {
            Some(entry) => {
                entry.close_on_completion = true;
                Ok(())
            }
            None => Err(Error::closed(self.kind)),
        }
    }

    pub fn is_close_on_completion(&self) -> Result<bool> {
        let core = self.connection.core.lock();
        core.statements
            .get(&self.id)
            .map(|s| s.close_on_completion)
            .ok_or(Error::closed(self.kind))
    }

    /// Close the statement and its result sets. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.connection.core.lock().close_statement(self.id)
    }

    #[must_use]
    pub fn introspect(&self) -> Introspection {
        self.connection
            .core
            .lock()
            .introspect_statement(self.id, self.kind)
    }
}

impl std::fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementHandle")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .finish()
    }
}

/// Plain SQL statement.
#[derive(Debug, Clone)]
pub struct Statement {
    handle: StatementHandle,
}

impl Statement {
    pub(crate) const fn new(connection: Connection, id: WrapperId) -> Self {
        Self {
            handle: StatementHandle {
                connection,
                id,
                kind: WrapperKind::Statement,
            },
        }
    }

    pub fn execute(&self, sql: &str) -> Result<bool> {
        self.handle.open()?.execute(self.handle.id, Some(sql))
    }

    pub fn execute_query(&self, sql: &str) -> Result<ResultSet> {
        let id = self.handle.open()?.execute_query(self.handle.id, Some(sql))?;
        Ok(self.handle.result_set(id))
    }

    pub fn execute_update(&self, sql: &str) -> Result<i64> {
        self.handle.open()?.execute_update(self.handle.id, Some(sql))
    }

    pub fn add_batch(&self, sql: &str) -> Result<()> {
        self.handle.open()?.with_statement(self.handle.id, "add_batch", |s| {
            s.driver.add_batch(Some(sql))?;
            s.has_batch_parameters = true;
            Ok(())
        })
    }
}

impl Deref for Statement {
    type Target = StatementHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

/// Precompiled statement with bound parameters.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    handle: StatementHandle,
}

impl PreparedStatement {
    pub(crate) const fn new(connection: Connection, id: WrapperId) -> Self {
        Self::with_kind(connection, id, WrapperKind::PreparedStatement)
    }

    const fn with_kind(connection: Connection, id: WrapperId, kind: WrapperKind) -> Self {
        Self {
            handle: StatementHandle {
                connection,
                id,
                kind,
            },
        }
    }

    pub fn execute(&self) -> Result<bool> {
        self.handle.open()?.execute(self.handle.id, None)
    }

    pub fn execute_query(&self) -> Result<ResultSet> {
        let id = self.handle.open()?.execute_query(self.handle.id, None)?;
        Ok(self.handle.result_set(id))
    }

    pub fn execute_update(&self) -> Result<i64> {
        self.handle.open()?.execute_update(self.handle.id, None)
    }

    /// Bind `value` to the 1-based parameter `index`.
    pub fn set_parameter(&self, index: usize, value: Value) -> Result<()> {
        self.handle
            .open()?
            .with_statement(self.handle.id, "set_parameter", |s| s.driver.set_parameter(index, value))
    }

    pub fn clear_parameters(&self) -> Result<()> {
        self.handle
            .open()?
            .with_statement(self.handle.id, "clear_parameters", |s| s.driver.clear_parameters())
    }

    /// Add the current parameter set to the batch.
    pub fn add_batch(&self) -> Result<()> {
        self.handle.open()?.with_statement(self.handle.id, "add_batch", |s| {
            s.driver.add_batch(None)?;
            s.has_batch_parameters = true;
            Ok(())
        })
    }
}

impl Deref for PreparedStatement {
    type Target = StatementHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

/// Stored procedure call.
#[derive(Debug, Clone)]
pub struct CallableStatement {
    prepared: PreparedStatement,
}

impl CallableStatement {
    pub(crate) const fn new(connection: Connection, id: WrapperId) -> Self {
        Self {
            prepared: PreparedStatement::with_kind(connection, id, WrapperKind::CallableStatement),
        }
    }

    pub fn register_out_parameter(&self, index: usize, sql_type: i32) -> Result<()> {
        let handle = &self.prepared.handle;
        handle.open()?.with_statement(handle.id, "register_out_parameter", |s| {
            s.driver.register_out_parameter(index, sql_type)
        })
    }

    pub fn out_parameter(&self, index: usize) -> Result<Value> {
        let handle = &self.prepared.handle;
        handle
            .open()?
            .with_statement(handle.id, "out_parameter", |s| s.driver.out_parameter(index))
    }
}

impl Deref for CallableStatement {
    type Target = PreparedStatement;

    fn deref(&self) -> &Self::Target {
        &self.prepared
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::DriverError;
    use crate::testing::Fixture;

    #[test]
    fn test_remaining_seconds_rounds_up() {
        let now = Instant::now();
        assert_eq!(remaining_seconds(now + Duration::from_millis(1200), now), Ok(2));
        assert_eq!(remaining_seconds(now + Duration::from_secs(3), now), Ok(3));
        assert!(remaining_seconds(now, now + Duration::from_millis(40)).is_err());
    }

    #[test]
    fn test_fetch_size_applied_once() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();

        stmt.set_fetch_size(50).unwrap();
        assert_eq!(stmt.fetch_size().unwrap(), 50);
        assert_eq!(fixture.driver.calls_named("statement.set_fetch_size"), 0);

        stmt.execute("UPDATE T SET A = 1").unwrap();
        stmt.execute("UPDATE T SET A = 2").unwrap();
        assert_eq!(fixture.driver.calls_named("statement.set_fetch_size"), 1);
    }

    #[test]
    fn test_execute_query_closes_previous_result() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();

        let first = stmt.execute_query("SELECT 1").unwrap();
        let second = stmt.execute_query("SELECT 2").unwrap();

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(fixture.driver.calls_named("result_set.close"), 1);
    }

    #[test]
    fn test_default_query_timeout_applied() {
        let fixture = Fixture::with_config(|b| b.query_timeout(Some(Duration::from_secs(30))));
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();

        assert_eq!(stmt.query_timeout().unwrap(), 30);
    }

    #[test]
    fn test_batch_connection_error_keeps_counts() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.prepare_statement("INSERT INTO T VALUES (?)").unwrap();
        stmt.add_batch().unwrap();
        fixture.driver.fail_on(
            "statement.execute_batch",
            DriverError::batch_update("link lost", vec![1, -3]).with_sql_state("08S01"),
        );

        let err = stmt.execute_batch().unwrap_err();

        assert!(err.is_batch_update());
        assert_eq!(err.update_counts(), Some(&[1, -3][..]));
        assert_eq!(fixture.listener.names(), vec!["CONNECTION_ERROR_OCCURRED"]);
    }

    #[test]
    fn test_plain_batch_failure_is_not_remapped() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();
        stmt.add_batch("INSERT INTO T VALUES (1)").unwrap();
        fixture.driver.fail_on(
            "statement.execute_batch",
            DriverError::batch_update("duplicate key", vec![-3]).with_sql_state("23505"),
        );

        let err = stmt.execute_batch().unwrap_err();

        assert!(err.is_batch_update());
        assert_eq!(err.sql_state(), Some("23505"));
        assert!(fixture.listener.names().is_empty());
    }

    #[test]
    fn test_more_results_close_on_completion() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();
        stmt.close_on_completion().unwrap();
        assert!(stmt.is_close_on_completion().unwrap());
        stmt.execute("CALL P()").unwrap();

        assert!(!stmt.more_results(CurrentResult::CloseCurrent).unwrap());

        assert!(stmt.is_closed());
        assert!(stmt.close_on_completion().unwrap_err().is_closed());
    }

    #[test]
    fn test_more_results_keep_current_does_not_close() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();
        stmt.close_on_completion().unwrap();
        let rs = stmt.execute_query("SELECT 1").unwrap();

        assert!(!stmt.more_results(CurrentResult::KeepCurrent).unwrap());

        assert!(!stmt.is_closed());
        assert!(!rs.is_closed());
    }

    #[test]
    fn test_more_results_detaches_without_driver_close() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();
        let rs = stmt.execute_query("SELECT 1").unwrap();

        stmt.more_results(CurrentResult::CloseCurrent).unwrap();

        assert!(rs.is_closed());
        assert_eq!(fixture.driver.calls_named("result_set.close"), 0);
    }

    #[test]
    fn test_result_set_close_cascades_to_statement() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.create_statement().unwrap();
        stmt.close_on_completion().unwrap();
        let rs = stmt.execute_query("SELECT 1").unwrap();

        rs.close().unwrap();

        assert!(stmt.is_closed());
    }

    #[test]
    fn test_prepared_statement_returns_to_cache() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        let stmt = conn.prepare_statement("SELECT * FROM T WHERE ID = ?").unwrap();
        stmt.set_parameter(1, Value::Int(7)).unwrap();
        stmt.close().unwrap();
        assert_eq!(fixture.driver.calls_named("statement.close"), 0);

        let again = conn.prepare_statement("SELECT * FROM T WHERE ID = ?").unwrap();
        assert_eq!(fixture.driver.calls_named("prepare_statement"), 1);
        assert!(!again.is_closed());

        let stats = fixture.managed.statement_cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_non_poolable_statement_is_closed() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.prepare_statement("SELECT 1").unwrap();
        stmt.set_poolable(false).unwrap();

        stmt.close().unwrap();

        assert_eq!(fixture.driver.calls_named("statement.close"), 1);
        assert_eq!(fixture.managed.statement_cache_stats().unwrap().len, 0);
    }

    #[test]
    fn test_pending_results_prevent_caching() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.prepare_statement("CALL P()").unwrap();
        fixture.driver.set_update_count(3);

        stmt.close().unwrap();

        assert_eq!(fixture.driver.calls_named("statement.close"), 1);
    }

    #[test]
    fn test_changed_properties_cleaned_before_caching() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.prepare_statement("SELECT 1").unwrap();
        stmt.set_query_timeout(5).unwrap();
        stmt.add_batch().unwrap();

        stmt.close().unwrap();

        // cleanup resets fetch size and timeout before the statement is cached
        assert_eq!(fixture.driver.calls_named("statement.set_fetch_size"), 1);
        assert_eq!(fixture.driver.calls_named("statement.set_query_timeout"), 2);
        assert_eq!(fixture.driver.calls_named("statement.clear_batch"), 1);
        assert_eq!(fixture.managed.statement_cache_stats().unwrap().len, 1);
    }

    #[test]
    fn test_section_without_required_suffix_is_not_cached() {
        let fixture = Fixture::new();
        let conn = fixture.connection();

        let stmt = conn.prepare_section("SELECT 1", "PKG.1", None, true).unwrap();
        stmt.close().unwrap();
        assert_eq!(fixture.driver.calls_named("statement.close"), 1);

        let stmt = conn.prepare_section("SELECT 1", "PKG.1", Some("A"), true).unwrap();
        stmt.close().unwrap();
        assert_eq!(fixture.managed.statement_cache_stats().unwrap().len, 1);
    }

    #[test]
    fn test_callable_out_parameters() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let call = conn.prepare_call("CALL P(?, ?)").unwrap();

        call.set_parameter(1, Value::Int(1)).unwrap();
        call.register_out_parameter(2, 4).unwrap();
        call.execute().unwrap();

        assert_eq!(call.out_parameter(2).unwrap(), Value::Int(2));
        assert_eq!(call.kind(), WrapperKind::CallableStatement);
    }

    #[test]
    fn test_closed_statement_reports_its_kind() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.prepare_statement("SELECT 1").unwrap();
        stmt.close().unwrap();
        stmt.close().unwrap();

        let err = stmt.execute().unwrap_err();
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "PreparedStatement is closed");
    }

    #[test]
    fn test_statement_introspection() {
        let fixture = Fixture::new();
        let conn = fixture.connection();
        let stmt = conn.prepare_statement("SELECT 1").unwrap();
        stmt.set_fetch_size(10).unwrap();

        let snapshot = stmt.introspect();
        assert_eq!(snapshot.kind, WrapperKind::PreparedStatement);
        assert_eq!(snapshot.details["requested_fetch_size"], 10);
        assert_eq!(snapshot.details["poolable"], true);

        stmt.close().unwrap();
        assert_eq!(stmt.introspect().state, WrapperState::Closed);
    }
}
