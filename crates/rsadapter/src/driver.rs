//! Vendor driver collaborator contracts.
//!
//! The wrapper layer never talks to a database itself. Everything physical
//! goes through these traits, implemented by the vendor driver binding.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DriverResult;

/// Scrollability of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultSetType {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Whether a result set can be updated through the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Concurrency {
    #[default]
    ReadOnly,
    Updatable,
}

/// Whether open cursors survive a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Holdability {
    HoldCursorsOverCommit,
    #[default]
    CloseCursorsAtCommit,
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    None,
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::RepeatableRead => "REPEATABLE_READ",
            Self::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

/// Generated-keys mode requested at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratedKeys {
    /// The application did not ask; driver default applies.
    #[default]
    Unspecified,
    Return,
    NoReturn,
}

/// Execution parameters for statement creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatementOptions {
    pub result_set_type: ResultSetType,
    pub concurrency: Concurrency,
    /// `None` uses the connection's current holdability.
    pub holdability: Option<Holdability>,
    pub generated_keys: GeneratedKeys,
}

impl StatementOptions {
    #[must_use]
    pub const fn new(result_set_type: ResultSetType, concurrency: Concurrency) -> Self {
        Self {
            result_set_type,
            concurrency,
            holdability: None,
            generated_keys: GeneratedKeys::Unspecified,
        }
    }

    #[must_use]
    pub const fn holdability(mut self, holdability: Holdability) -> Self {
        self.holdability = Some(holdability);
        self
    }

    #[must_use]
    pub const fn generated_keys(mut self, generated_keys: GeneratedKeys) -> Self {
        self.generated_keys = generated_keys;
        self
    }
}

/// What to do with the current result when moving to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurrentResult {
    #[default]
    CloseCurrent,
    KeepCurrent,
    CloseAll,
}

/// Cursor movement on a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
    First,
    Last,
    BeforeFirst,
    AfterLast,
    Absolute(i32),
    Relative(i32),
}

/// Row-level change through an updatable cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Insert,
    Update,
    Delete,
    Refresh,
    CancelUpdates,
    MoveToInsertRow,
}

/// Column or parameter value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Kind of driver-managed resource that must be freed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobKind {
    Blob,
    Clob,
    NClob,
    Array,
    SqlXml,
    Stream,
}

/// Driver-side large object or stream.
pub trait LargeObject: Send + Sync + fmt::Debug {
    fn kind(&self) -> LobKind;

    /// Release driver resources. Calling twice is allowed.
    fn free(&self) -> DriverResult<()>;
}

/// Savepoint returned by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub id: u32,
    pub name: Option<String>,
}

/// Client information properties.
pub type ClientInfo = BTreeMap<String, String>;

/// User-defined type mapping.
pub type TypeMap = BTreeMap<String, String>;

/// Catalog queries answered by a database metadata wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataQuery {
    Catalogs,
    Schemas { pattern: Option<String> },
    Tables { schema: Option<String>, pattern: Option<String> },
    Columns { schema: Option<String>, table: String },
    PrimaryKeys { schema: Option<String>, table: String },
}

/// A physical driver connection.
pub trait DriverConnection: Send + fmt::Debug {
    fn create_statement(&mut self, options: &StatementOptions)
    -> DriverResult<Box<dyn DriverStatement>>;

    fn prepare_statement(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> DriverResult<Box<dyn DriverStatement>>;

    fn prepare_call(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> DriverResult<Box<dyn DriverStatement>>;

    fn metadata_query(&mut self, query: &MetadataQuery) -> DriverResult<Box<dyn DriverResultSet>>;

    fn database_product_name(&mut self) -> DriverResult<String>;

    fn auto_commit(&mut self) -> DriverResult<bool>;
    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()>;
    fn commit(&mut self) -> DriverResult<()>;
    fn rollback(&mut self) -> DriverResult<()>;

    fn set_savepoint(&mut self, name: Option<&str>) -> DriverResult<Savepoint>;
    fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> DriverResult<()>;
    fn release_savepoint(&mut self, savepoint: &Savepoint) -> DriverResult<()>;

    fn transaction_isolation(&mut self) -> DriverResult<IsolationLevel>;
    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> DriverResult<()>;
    fn catalog(&mut self) -> DriverResult<Option<String>>;
    fn set_catalog(&mut self, catalog: &str) -> DriverResult<()>;
    fn is_read_only(&mut self) -> DriverResult<bool>;
    fn set_read_only(&mut self, read_only: bool) -> DriverResult<()>;
    fn holdability(&mut self) -> DriverResult<Holdability>;
    fn set_holdability(&mut self, holdability: Holdability) -> DriverResult<()>;
    fn type_map(&mut self) -> DriverResult<TypeMap>;
    fn set_type_map(&mut self, map: &TypeMap) -> DriverResult<()>;
    fn schema(&mut self) -> DriverResult<Option<String>>;
    fn set_schema(&mut self, schema: &str) -> DriverResult<()>;

    fn client_info(&mut self) -> DriverResult<ClientInfo>;
    fn set_client_info(&mut self, info: &ClientInfo) -> DriverResult<()>;

    fn is_valid(&mut self, timeout: Duration) -> DriverResult<bool>;
    fn close(&mut self) -> DriverResult<()>;

    /// Concrete driver type, for vendor capability adapters.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A driver statement. Plain, prepared and callable statements share this
/// contract; `sql` is `Some` only for plain statements.
pub trait DriverStatement: Send + fmt::Debug {
    fn execute(&mut self, sql: Option<&str>) -> DriverResult<bool>;
    fn execute_query(&mut self, sql: Option<&str>) -> DriverResult<Box<dyn DriverResultSet>>;
    fn execute_update(&mut self, sql: Option<&str>) -> DriverResult<i64>;

    fn add_batch(&mut self, sql: Option<&str>) -> DriverResult<()>;
    fn clear_batch(&mut self) -> DriverResult<()>;
    fn execute_batch(&mut self) -> DriverResult<Vec<i64>>;

    fn set_parameter(&mut self, index: usize, value: Value) -> DriverResult<()>;
    fn clear_parameters(&mut self) -> DriverResult<()>;
    fn register_out_parameter(&mut self, index: usize, sql_type: i32) -> DriverResult<()>;
    fn out_parameter(&mut self, index: usize) -> DriverResult<Value>;

    fn result_set(&mut self) -> DriverResult<Option<Box<dyn DriverResultSet>>>;
    fn more_results(&mut self, current: CurrentResult) -> DriverResult<bool>;
    fn update_count(&mut self) -> DriverResult<i64>;

    fn set_fetch_size(&mut self, rows: u32) -> DriverResult<()>;
    fn query_timeout(&mut self) -> DriverResult<u32>;
    fn set_query_timeout(&mut self, seconds: u32) -> DriverResult<()>;
    fn set_poolable(&mut self, poolable: bool) -> DriverResult<()>;

    fn cancel(&mut self) -> DriverResult<()>;
    fn close(&mut self) -> DriverResult<()>;
}

/// A driver result set.
pub trait DriverResultSet: Send + fmt::Debug {
    fn navigate(&mut self, navigation: Navigation) -> DriverResult<bool>;
    fn get(&mut self, column: usize) -> DriverResult<Value>;
    fn get_large_object(&mut self, column: usize, kind: LobKind) -> DriverResult<Arc<dyn LargeObject>>;
    fn update(&mut self, column: usize, value: Value) -> DriverResult<()>;
    fn change_row(&mut self, change: RowChange) -> DriverResult<()>;
    fn close(&mut self) -> DriverResult<()>;
}
