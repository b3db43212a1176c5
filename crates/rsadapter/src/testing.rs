//! In-memory driver, pool and transaction manager doubles.
//!
//! Every mock shares one [`MockDriver`] call log, so a test can assert on
//! exactly which driver calls a wrapper made. Connection calls are logged by
//! method name (`"commit"`), statement calls as `"statement.<name>"`, result
//! set calls as `"result_set.<name>"` and large object calls as
//! `"lob.<name>"`.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cache_key::{KeyContext, StatementCacheKey};
use crate::config::{ConfigBuilder, DataSourceConfig};
use crate::connection::{Connection, HandleId};
use crate::datasource::{DataSource, ResourceRefConfig};
use crate::driver::{
    ClientInfo, CurrentResult, DriverConnection, DriverResultSet, DriverStatement, Holdability,
    IsolationLevel, LargeObject, LobKind, MetadataQuery, Navigation, RowChange, Savepoint,
    StatementOptions, TypeMap, Value,
};
use crate::error::{DriverError, DriverResult, ResourceError, XaError, XaErrorCode};
use crate::factory::ConnectionFactory;
use crate::helper::{DriverHelper, GenericHelper};
use crate::managed::{ConnectionRequestInfo, ManagedConnection};
use crate::manager::{
    ConnectionEvent, ConnectionEventListener, ConnectionManager, LazyEnlistment,
    TransactionServices,
};

// ═══════════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct DriverState {
    calls: Vec<String>,
    faults: HashMap<String, DriverError>,
    rows: Vec<Vec<Value>>,
    update_count: i64,
    more_results: bool,
}

impl Default for DriverState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            faults: HashMap::new(),
            rows: Vec::new(),
            update_count: -1,
            more_results: false,
        }
    }
}

/// Shared state and call log behind every mock driver object.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<DriverState>>,
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new physical connection of the standard vendor type.
    #[must_use]
    pub fn connection(&self) -> Box<dyn DriverConnection> {
        Box::new(MockConnection::<StandardVendor>::new(self.clone()))
    }

    /// A new physical connection of vendor type `V`.
    #[must_use]
    pub fn connection_as<V: fmt::Debug + Send + 'static>(&self) -> Box<dyn DriverConnection> {
        Box::new(MockConnection::<V>::new(self.clone()))
    }

    /// A detached prepared statement.
    #[must_use]
    pub fn statement(&self) -> Box<dyn DriverStatement> {
        Box::new(MockStatement::new(self.clone(), None))
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    #[must_use]
    pub fn calls_named(&self, name: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == name).count()
    }

    /// Fail every later call to `operation` with `error`.
    pub fn fail_on(&self, operation: &str, error: DriverError) {
        self.state.lock().faults.insert(operation.to_string(), error);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Rows returned by result sets created from now on.
    pub fn set_rows(&self, rows: Vec<Vec<Value>>) {
        self.state.lock().rows = rows;
    }

    /// Update count reported by statements; -1 means no pending count.
    pub fn set_update_count(&self, count: i64) {
        self.state.lock().update_count = count;
    }

    pub fn set_more_results(&self, more: bool) {
        self.state.lock().more_results = more;
    }

    fn record(&self, operation: &str) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.calls.push(operation.to_string());
        state.faults.get(operation).cloned().map_or(Ok(()), Err)
    }

    fn rows(&self) -> Vec<Vec<Value>> {
        self.state.lock().rows.clone()
    }

    fn result_set(&self) -> Box<dyn DriverResultSet> {
        Box::new(MockResultSet::new(self.clone(), self.rows()))
    }
}

/// Vendor marker of connections made by [`MockDriver::connection`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardVendor;

/// Vendor marker for a second, unrelated driver type.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtherVendor;

/// Physical connection of the mock driver. `V` only distinguishes vendor
/// types for capability lookups.
#[derive(Debug)]
pub struct MockConnection<V = StandardVendor> {
    driver: MockDriver,
    auto_commit: bool,
    isolation: IsolationLevel,
    catalog: Option<String>,
    read_only: bool,
    holdability: Holdability,
    type_map: TypeMap,
    schema: Option<String>,
    client_info: ClientInfo,
    next_savepoint: u32,
    _vendor: PhantomData<fn() -> V>,
}

impl<V> MockConnection<V> {
    fn new(driver: MockDriver) -> Self {
        Self {
            driver,
            auto_commit: true,
            isolation: IsolationLevel::ReadCommitted,
            catalog: None,
            read_only: false,
            holdability: Holdability::CloseCursorsAtCommit,
            type_map: TypeMap::new(),
            schema: None,
            client_info: ClientInfo::new(),
            next_savepoint: 0,
            _vendor: PhantomData,
        }
    }

    /// The shared driver behind this connection.
    pub const fn driver(&self) -> &MockDriver {
        &self.driver
    }
}

impl<V: fmt::Debug + Send + 'static> DriverConnection for MockConnection<V> {
    fn create_statement(
        &mut self,
        _options: &StatementOptions,
    ) -> DriverResult<Box<dyn DriverStatement>> {
        self.driver.record("create_statement")?;
        Ok(Box::new(MockStatement::new(self.driver.clone(), None)))
    }

    fn prepare_statement(
        &mut self,
        sql: &str,
        _options: &StatementOptions,
    ) -> DriverResult<Box<dyn DriverStatement>> {
        self.driver.record("prepare_statement")?;
        Ok(Box::new(MockStatement::new(self.driver.clone(), Some(sql))))
    }

    fn prepare_call(
        &mut self,
        sql: &str,
        _options: &StatementOptions,
    ) -> DriverResult<Box<dyn DriverStatement>> {
        self.driver.record("prepare_call")?;
        Ok(Box::new(MockStatement::new(self.driver.clone(), Some(sql))))
    }

    fn metadata_query(&mut self, _query: &MetadataQuery) -> DriverResult<Box<dyn DriverResultSet>> {
        self.driver.record("metadata_query")?;
        Ok(self.driver.result_set())
    }

    fn database_product_name(&mut self) -> DriverResult<String> {
        self.driver.record("database_product_name")?;
        Ok("MockDB".to_string())
    }

    fn auto_commit(&mut self) -> DriverResult<bool> {
        self.driver.record("auto_commit")?;
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()> {
        self.driver.record("set_auto_commit")?;
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.driver.record("commit")
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.driver.record("rollback")
    }

    fn set_savepoint(&mut self, name: Option<&str>) -> DriverResult<Savepoint> {
        self.driver.record("set_savepoint")?;
        self.next_savepoint += 1;
        Ok(Savepoint {
            id: self.next_savepoint,
            name: name.map(str::to_owned),
        })
    }

    fn rollback_to_savepoint(&mut self, _savepoint: &Savepoint) -> DriverResult<()> {
        self.driver.record("rollback_to_savepoint")
    }

    fn release_savepoint(&mut self, _savepoint: &Savepoint) -> DriverResult<()> {
        self.driver.record("release_savepoint")
    }

    fn transaction_isolation(&mut self) -> DriverResult<IsolationLevel> {
        self.driver.record("transaction_isolation")?;
        Ok(self.isolation)
    }

    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> DriverResult<()> {
        self.driver.record("set_transaction_isolation")?;
        self.isolation = level;
        Ok(())
    }

    fn catalog(&mut self) -> DriverResult<Option<String>> {
        self.driver.record("catalog")?;
        Ok(self.catalog.clone())
    }

    fn set_catalog(&mut self, catalog: &str) -> DriverResult<()> {
        self.driver.record("set_catalog")?;
        self.catalog = Some(catalog.to_string());
        Ok(())
    }

    fn is_read_only(&mut self) -> DriverResult<bool> {
        self.driver.record("is_read_only")?;
        Ok(self.read_only)
    }

    fn set_read_only(&mut self, read_only: bool) -> DriverResult<()> {
        self.driver.record("set_read_only")?;
        self.read_only = read_only;
        Ok(())
    }

    fn holdability(&mut self) -> DriverResult<Holdability> {
        self.driver.record("holdability")?;
        Ok(self.holdability)
    }

    fn set_holdability(&mut self, holdability: Holdability) -> DriverResult<()> {
        self.driver.record("set_holdability")?;
        self.holdability = holdability;
        Ok(())
    }

    fn type_map(&mut self) -> DriverResult<TypeMap> {
        self.driver.record("type_map")?;
        Ok(self.type_map.clone())
    }

    fn set_type_map(&mut self, map: &TypeMap) -> DriverResult<()> {
        self.driver.record("set_type_map")?;
        self.type_map = map.clone();
        Ok(())
    }

    fn schema(&mut self) -> DriverResult<Option<String>> {
        self.driver.record("schema")?;
        Ok(self.schema.clone())
    }

    fn set_schema(&mut self, schema: &str) -> DriverResult<()> {
        self.driver.record("set_schema")?;
        self.schema = Some(schema.to_string());
        Ok(())
    }

    fn client_info(&mut self) -> DriverResult<ClientInfo> {
        self.driver.record("client_info")?;
        Ok(self.client_info.clone())
    }

    fn set_client_info(&mut self, info: &ClientInfo) -> DriverResult<()> {
        self.driver.record("set_client_info")?;
        self.client_info = info.clone();
        Ok(())
    }

    fn is_valid(&mut self, _timeout: Duration) -> DriverResult<bool> {
        self.driver.record("is_valid")?;
        Ok(true)
    }

    fn close(&mut self) -> DriverResult<()> {
        self.driver.record("close")
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Driver statement of the mock driver.
#[derive(Debug)]
pub struct MockStatement {
    driver: MockDriver,
    sql: Option<String>,
    parameters: BTreeMap<usize, Value>,
    out_parameters: BTreeMap<usize, i32>,
    batch: Vec<Option<String>>,
    fetch_size: u32,
    query_timeout: u32,
    poolable: bool,
    has_result_set: bool,
}

impl MockStatement {
    fn new(driver: MockDriver, sql: Option<&str>) -> Self {
        Self {
            driver,
            sql: sql.map(str::to_owned),
            parameters: BTreeMap::new(),
            out_parameters: BTreeMap::new(),
            batch: Vec::new(),
            fetch_size: 0,
            query_timeout: 0,
            poolable: true,
            has_result_set: false,
        }
    }

    fn is_query(&self, sql: Option<&str>) -> bool {
        sql.or(self.sql.as_deref()).is_some_and(|s| {
            s.trim_start()
                .get(..6)
                .is_some_and(|head| head.eq_ignore_ascii_case("select"))
        })
    }

    fn record(&self, operation: &str) -> DriverResult<()> {
        self.driver.record(&format!("statement.{operation}"))
    }
}

impl DriverStatement for MockStatement {
    fn execute(&mut self, sql: Option<&str>) -> DriverResult<bool> {
        self.record("execute")?;
        self.has_result_set = self.is_query(sql);
        Ok(self.has_result_set)
    }

    fn execute_query(&mut self, _sql: Option<&str>) -> DriverResult<Box<dyn DriverResultSet>> {
        self.record("execute_query")?;
        self.has_result_set = false;
        Ok(self.driver.result_set())
    }

    fn execute_update(&mut self, _sql: Option<&str>) -> DriverResult<i64> {
        self.record("execute_update")?;
        self.has_result_set = false;
        Ok(1)
    }

    fn add_batch(&mut self, sql: Option<&str>) -> DriverResult<()> {
        self.record("add_batch")?;
        self.batch.push(sql.map(str::to_owned));
        Ok(())
    }

    fn clear_batch(&mut self) -> DriverResult<()> {
        self.record("clear_batch")?;
        self.batch.clear();
        Ok(())
    }

    fn execute_batch(&mut self) -> DriverResult<Vec<i64>> {
        self.record("execute_batch")?;
        Ok(self.batch.drain(..).map(|_| 1).collect())
    }

    fn set_parameter(&mut self, index: usize, value: Value) -> DriverResult<()> {
        self.record("set_parameter")?;
        self.parameters.insert(index, value);
        Ok(())
    }

    fn clear_parameters(&mut self) -> DriverResult<()> {
        self.record("clear_parameters")?;
        self.parameters.clear();
        Ok(())
    }

    fn register_out_parameter(&mut self, index: usize, sql_type: i32) -> DriverResult<()> {
        self.record("register_out_parameter")?;
        self.out_parameters.insert(index, sql_type);
        Ok(())
    }

    /// Echoes the parameter index.
    fn out_parameter(&mut self, index: usize) -> DriverResult<Value> {
        self.record("out_parameter")?;
        if !self.out_parameters.contains_key(&index) {
            return Err(DriverError::new(format!("parameter {index} is not an out parameter")));
        }
        Ok(Value::Int(i64::try_from(index).unwrap_or(i64::MAX)))
    }

    fn result_set(&mut self) -> DriverResult<Option<Box<dyn DriverResultSet>>> {
        self.record("result_set")?;
        Ok(std::mem::take(&mut self.has_result_set).then(|| self.driver.result_set()))
    }

    fn more_results(&mut self, _current: CurrentResult) -> DriverResult<bool> {
        self.record("more_results")?;
        self.has_result_set = false;
        Ok(self.driver.state.lock().more_results)
    }

    fn update_count(&mut self) -> DriverResult<i64> {
        self.record("update_count")?;
        Ok(self.driver.state.lock().update_count)
    }

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()> {
        self.record("set_fetch_size")?;
        self.fetch_size = rows;
        Ok(())
    }

    fn query_timeout(&mut self) -> DriverResult<u32> {
        self.record("query_timeout")?;
        Ok(self.query_timeout)
    }

    fn set_query_timeout(&mut self, seconds: u32) -> DriverResult<()> {
        self.record("set_query_timeout")?;
        self.query_timeout = seconds;
        Ok(())
    }

    fn set_poolable(&mut self, poolable: bool) -> DriverResult<()> {
        self.record("set_poolable")?;
        self.poolable = poolable;
        Ok(())
    }

    fn cancel(&mut self) -> DriverResult<()> {
        self.record("cancel")
    }

    fn close(&mut self) -> DriverResult<()> {
        self.record("close")
    }
}

/// Cursor over a fixed set of rows. Position 0 is before the first row and
/// `rows.len() + 1` after the last.
#[derive(Debug)]
pub struct MockResultSet {
    driver: MockDriver,
    rows: Vec<Vec<Value>>,
    position: i64,
}

impl MockResultSet {
    const fn new(driver: MockDriver, rows: Vec<Vec<Value>>) -> Self {
        Self {
            driver,
            rows,
            position: 0,
        }
    }

    fn len(&self) -> i64 {
        i64::try_from(self.rows.len()).unwrap_or(i64::MAX)
    }

    fn current_row(&self) -> DriverResult<&Vec<Value>> {
        usize::try_from(self.position - 1)
            .ok()
            .and_then(|i| self.rows.get(i))
            .ok_or_else(|| DriverError::new("cursor is not on a row").with_sql_state("24000"))
    }

    fn record(&self, operation: &str) -> DriverResult<()> {
        self.driver.record(&format!("result_set.{operation}"))
    }
}

impl DriverResultSet for MockResultSet {
    fn navigate(&mut self, navigation: Navigation) -> DriverResult<bool> {
        self.record("navigate")?;
        let len = self.len();
        let target = match navigation {
            Navigation::Next => self.position + 1,
            Navigation::Previous => self.position - 1,
            Navigation::First => 1,
            Navigation::Last => len,
            Navigation::BeforeFirst => 0,
            Navigation::AfterLast => len + 1,
            Navigation::Absolute(row) if row < 0 => len + 1 + i64::from(row),
            Navigation::Absolute(row) => i64::from(row),
            Navigation::Relative(rows) => self.position + i64::from(rows),
        };
        self.position = target.clamp(0, len + 1);
        Ok((1..=len).contains(&self.position))
    }

    fn get(&mut self, column: usize) -> DriverResult<Value> {
        self.record("get")?;
        let row = self.current_row()?;
        column
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .cloned()
            .ok_or_else(|| DriverError::new(format!("invalid column index {column}")).with_sql_state("07009"))
    }

    fn get_large_object(&mut self, _column: usize, kind: LobKind) -> DriverResult<Arc<dyn LargeObject>> {
        self.record("get_large_object")?;
        Ok(Arc::new(MockLob {
            driver: self.driver.clone(),
            kind,
        }))
    }

    fn update(&mut self, _column: usize, _value: Value) -> DriverResult<()> {
        self.record("update")
    }

    fn change_row(&mut self, _change: RowChange) -> DriverResult<()> {
        self.record("change_row")
    }

    fn close(&mut self) -> DriverResult<()> {
        self.record("close")
    }
}

#[derive(Debug)]
pub struct MockLob {
    driver: MockDriver,
    kind: LobKind,
}

impl LargeObject for MockLob {
    fn kind(&self) -> LobKind {
        self.kind
    }

    fn free(&self) -> DriverResult<()> {
        self.driver.record("lob.free")
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Transaction manager
// ═══════════════════════════════════════════════════════════════════════════

/// Transaction services whose global transaction is switched by the test.
#[derive(Debug, Default)]
pub struct MockTransactions {
    active: AtomicBool,
    deadline: Mutex<Option<Instant>>,
}

impl MockTransactions {
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.lock() = deadline;
    }
}

impl TransactionServices for MockTransactions {
    fn is_global_transaction_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn global_transaction_deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Connection manager
// ═══════════════════════════════════════════════════════════════════════════

/// Lazy enlistment that enlists the managed connection directly, or fails
/// with a configured XA code.
#[derive(Debug, Default)]
pub struct MockEnlistment {
    enlisted: AtomicUsize,
    failure: Mutex<Option<XaErrorCode>>,
}

impl MockEnlistment {
    #[must_use]
    pub fn enlisted(&self) -> usize {
        self.enlisted.load(Ordering::Acquire)
    }

    pub fn fail_with(&self, code: Option<XaErrorCode>) {
        *self.failure.lock() = code;
    }
}

impl LazyEnlistment for MockEnlistment {
    fn lazy_enlist(&self, managed: &Arc<ManagedConnection>) -> Result<(), ResourceError> {
        if let Some(code) = *self.failure.lock() {
            return Err(ResourceError::enlistment(
                "resource manager rejected the branch",
                Some(XaError::new(code)),
            ));
        }
        managed.enlist_global()?;
        self.enlisted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Pool double. Handles are reassociated with the target managed connection.
#[derive(Debug)]
pub struct MockConnectionManager {
    this: Weak<Self>,
    driver: MockDriver,
    target: Mutex<Option<Arc<ManagedConnection>>>,
    associations: AtomicUsize,
    fail_associations: AtomicBool,
    inactive_closed: Mutex<Vec<HandleId>>,
    lazy_enlistment: AtomicBool,
    enlistment: MockEnlistment,
}

impl MockConnectionManager {
    #[must_use]
    pub fn new(driver: MockDriver) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            driver,
            target: Mutex::new(None),
            associations: AtomicUsize::new(0),
            fail_associations: AtomicBool::new(false),
            inactive_closed: Mutex::new(Vec::new()),
            lazy_enlistment: AtomicBool::new(false),
            enlistment: MockEnlistment::default(),
        })
    }

    pub fn set_target(&self, managed: Arc<ManagedConnection>) {
        *self.target.lock() = Some(managed);
    }

    /// Successful reassociations so far.
    #[must_use]
    pub fn associations(&self) -> usize {
        self.associations.load(Ordering::Acquire)
    }

    /// Make allocation and reassociation fail until switched back.
    pub fn fail_associations(&self, fail: bool) {
        self.fail_associations.store(fail, Ordering::Release);
    }

    #[must_use]
    pub fn inactive_closed(&self) -> Vec<HandleId> {
        self.inactive_closed.lock().clone()
    }

    pub fn enable_lazy_enlistment(&self, enabled: bool) {
        self.lazy_enlistment.store(enabled, Ordering::Release);
    }

    #[must_use]
    pub const fn enlistment(&self) -> &MockEnlistment {
        &self.enlistment
    }

    fn shared(&self) -> Result<Arc<dyn ConnectionManager>, ResourceError> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| ResourceError::IllegalState("connection manager dropped".to_string()))?;
        Ok(this)
    }

    fn check_available(&self) -> Result<(), ResourceError> {
        if self.fail_associations.load(Ordering::Acquire) {
            return Err(ResourceError::general("no managed connection available"));
        }
        Ok(())
    }

    /// The target when it matches `request_info`, else a fresh managed
    /// connection.
    fn matching(
        &self,
        factory: &Arc<ConnectionFactory>,
        request_info: Option<&ConnectionRequestInfo>,
    ) -> Result<Arc<ManagedConnection>, ResourceError> {
        let target = self.target.lock().clone();
        match (target, request_info) {
            (Some(managed), None) => Ok(managed),
            (Some(managed), Some(info)) if managed.request_info() == *info => Ok(managed),
            (_, info) => Ok(factory.create_managed_connection(
                self.driver.connection(),
                info.cloned().unwrap_or_default(),
            )?),
        }
    }
}

impl ConnectionManager for MockConnectionManager {
    fn allocate_connection(
        &self,
        factory: &Arc<ConnectionFactory>,
        request_info: &ConnectionRequestInfo,
    ) -> Result<Connection, ResourceError> {
        self.check_available()?;
        let managed = self.matching(factory, Some(request_info))?;
        Ok(managed.get_connection(self.shared()?)?)
    }

    fn associate_connection(
        &self,
        handle: &Connection,
        factory: &Arc<ConnectionFactory>,
        request_info: Option<&ConnectionRequestInfo>,
    ) -> Result<(), ResourceError> {
        self.check_available()?;
        let managed = self.matching(factory, request_info)?;
        managed.associate_connection(handle)?;
        self.associations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn inactive_connection_closed(&self, handle: HandleId, _factory: &ConnectionFactory) {
        self.inactive_closed.lock().push(handle);
    }

    fn lazy_enlistment(&self) -> Option<&dyn LazyEnlistment> {
        self.lazy_enlistment
            .load(Ordering::Acquire)
            .then_some(&self.enlistment as &dyn LazyEnlistment)
    }
}

/// Listener that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl RecordingListener {
    #[must_use]
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ConnectionEvent::name).collect()
    }
}

impl ConnectionEventListener for RecordingListener {
    fn connection_event(&self, event: &ConnectionEvent) {
        self.events.lock().push(event.clone());
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Fixture
// ═══════════════════════════════════════════════════════════════════════════

/// One data source wired to mocks, with a managed connection the pool
/// reassociates handles with.
#[derive(Debug)]
pub struct Fixture {
    pub driver: MockDriver,
    pub transactions: Arc<MockTransactions>,
    pub factory: Arc<ConnectionFactory>,
    pub manager: Arc<MockConnectionManager>,
    pub managed: Arc<ManagedConnection>,
    /// Registered on `managed`.
    pub listener: Arc<RecordingListener>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(|b| b)
    }

    #[must_use]
    pub fn with_config(configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Self {
        Self::with_helper(Arc::new(GenericHelper::new()), configure)
    }

    #[must_use]
    pub fn with_helper(
        helper: Arc<dyn DriverHelper>,
        configure: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
    ) -> Self {
        let config: DataSourceConfig = configure(DataSourceConfig::builder()).build();
        let driver = MockDriver::new();
        let transactions = Arc::new(MockTransactions::default());
        let factory = ConnectionFactory::new(config, helper, transactions.clone());
        let manager = MockConnectionManager::new(driver.clone());
        let managed = factory
            .create_managed_connection(driver.connection(), ConnectionRequestInfo::new())
            .expect("mock managed connection");
        let listener = Arc::new(RecordingListener::default());
        managed.add_listener(listener.clone());
        manager.set_target(Arc::clone(&managed));

        Self {
            driver,
            transactions,
            factory,
            manager,
            managed,
            listener,
        }
    }

    /// A new handle on the fixture's managed connection.
    #[must_use]
    pub fn connection(&self) -> Connection {
        self.handle_on(&self.managed).expect("mock connection handle")
    }

    /// A new handle on `managed`.
    pub fn handle_on(&self, managed: &Arc<ManagedConnection>) -> crate::Result<Connection> {
        managed.get_connection(self.manager.clone())
    }

    /// Another managed connection of the same data source.
    #[must_use]
    pub fn managed_connection(&self) -> Arc<ManagedConnection> {
        self.managed_connection_with(ConnectionRequestInfo::new())
    }

    #[must_use]
    pub fn managed_connection_with(&self, request_info: ConnectionRequestInfo) -> Arc<ManagedConnection> {
        self.factory
            .create_managed_connection(self.driver.connection(), request_info)
            .expect("mock managed connection")
    }

    /// Cache key of a default prepared statement.
    #[must_use]
    pub fn key(&self, sql: &str) -> StatementCacheKey {
        let ctx = KeyContext {
            holdability: Holdability::CloseCursorsAtCommit,
            isolation: None,
            schema: None,
        };
        StatementCacheKey::prepared(sql, &StatementOptions::default(), ctx)
    }

    #[must_use]
    pub fn data_source(&self, filter: &str, resource_ref: ResourceRefConfig) -> DataSource {
        DataSource::new(
            filter,
            resource_ref,
            Arc::clone(&self.factory),
            self.manager.clone(),
        )
    }
}
