//! Result set wrapper.

use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::connection::{Connection, HandleCore};
use crate::driver::{DriverResultSet, LargeObject, LobKind, Navigation, RowChange, Value};
use crate::error::DriverResult;
use crate::state::{Introspection, WrapperId, WrapperKind, WrapperState};
use crate::{Error, Result};

/// Wrapper that produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultSetParent {
    Statement(WrapperId),
    Metadata(WrapperId),
}

/// Arena entry of one open result set.
pub(crate) struct ResultSetEntry {
    driver: Box<dyn DriverResultSet>,
    parent: ResultSetParent,
    /// Large objects freed when the result set closes.
    resources: Vec<Arc<dyn LargeObject>>,
    sql: Option<String>,
}

impl ResultSetEntry {
    pub(crate) fn new(
        driver: Box<dyn DriverResultSet>,
        parent: ResultSetParent,
        sql: Option<String>,
    ) -> Self {
        Self {
            driver,
            parent,
            resources: Vec::new(),
            sql,
        }
    }
}

impl HandleCore {
    /// Close a result set and detach it from its parent.
    ///
    /// A statement parent set to close on completion is closed as well once
    /// its last result set is gone.
    pub(crate) fn close_result_set(&mut self, id: WrapperId, wrapper_only: bool) -> Result<()> {
        let Some(mut entry) = self.result_sets.remove(&id) else {
            return Ok(());
        };

        let completed_parent = match entry.parent {
            ResultSetParent::Statement(statement) => {
                self.statements.get_mut(&statement).and_then(|parent| {
                    parent.results.remove(id);
                    (parent.close_on_completion && parent.results.is_empty()).then_some(statement)
                })
            }
            ResultSetParent::Metadata(_) => {
                if let Some(metadata) = self.metadata.as_mut() {
                    metadata.results.remove(id);
                }
                None
            }
        };

        let mut first_error = None;
        if !wrapper_only && let Err(e) = entry.driver.close() {
            first_error.get_or_insert(self.map_driver_error(e));
        }
        for resource in entry.resources.drain(..) {
            if let Err(e) = resource.free() {
                tracing::debug!(handle = %self.id, kind = ?resource.kind(), error = %e, "failed to free resource");
                first_error.get_or_insert(self.map_driver_error(e));
            }
        }
        tracing::trace!(handle = %self.id, result_set = %id, wrapper_only, "result set closed");

        if let Some(statement) = completed_parent {
            tracing::debug!(handle = %self.id, statement = %statement, "last result closed; closing statement on completion");
            if let Err(e) = self.close_statement(statement) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn with_result_set<R>(
        &mut self,
        id: WrapperId,
        operation: &'static str,
        f: impl FnOnce(&mut ResultSetEntry) -> DriverResult<R>,
    ) -> Result<R> {
        let handle = self.id;
        let entry = self
            .result_sets
            .get_mut(&id)
            .ok_or(Error::closed(WrapperKind::ResultSet))?;
        let result = {
            let _span =
                tracing::debug_span!("driver.result_set", handle = %handle, result_set = %id, operation)
                    .entered();
            f(entry)
        };
        result.map_err(|e| self.map_driver_error(e))
    }

    fn navigate(&mut self, id: WrapperId, navigation: Navigation) -> Result<bool> {
        if self.config().begin_tran_for_result_set_scrolling_apis {
            self.begin_transaction_if_necessary()?;
        }
        self.with_result_set(id, "navigate", |rs| rs.driver.navigate(navigation))
    }

    fn change_row(&mut self, id: WrapperId, change: RowChange) -> Result<()> {
        self.begin_transaction_if_necessary()?;
        self.with_result_set(id, "change_row", |rs| rs.driver.change_row(change))
    }

    fn large_object(&mut self, id: WrapperId, column: usize, kind: LobKind) -> Result<Arc<dyn LargeObject>> {
        let track = self.config().free_resources_on_close;
        self.with_result_set(id, "get_large_object", |rs| {
            let object = rs.driver.get_large_object(column, kind)?;
            if track {
                rs.resources.push(Arc::clone(&object));
            }
            Ok(object)
        })
    }

    fn introspect_result_set(&self, id: WrapperId) -> Introspection {
        let Some(entry) = self.result_sets.get(&id) else {
            return Introspection::new(WrapperKind::ResultSet, WrapperState::Closed, 0)
                .with("id", id.to_string());
        };
        let parent = match entry.parent {
            ResultSetParent::Statement(parent) => format!("statement {parent}"),
            ResultSetParent::Metadata(parent) => format!("metadata {parent}"),
        };
        Introspection::new(WrapperKind::ResultSet, WrapperState::Active, 0)
            .with("id", id.to_string())
            .with("handle", self.id.to_string())
            .with("parent", parent)
            .with("sql", entry.sql.clone())
            .with("tracked_resources", entry.resources.len())
    }
}

/// Cursor over the rows of a query result.
#[derive(Clone)]
pub struct ResultSet {
    connection: Connection,
    id: WrapperId,
}

impl ResultSet {
    pub(crate) const fn new(connection: Connection, id: WrapperId) -> Self {
        Self { connection, id }
    }

    fn open(&self) -> Result<MutexGuard<'_, HandleCore>> {
        {
            let core = self.connection.core.lock();
            if !core.result_sets.contains_key(&self.id) {
                return Err(Error::closed(WrapperKind::ResultSet));
            }
            if core.state == WrapperState::Active {
                return Ok(core);
            }
        }
        self.connection.activate()?;
        let core = self.connection.core.lock();
        if !core.result_sets.contains_key(&self.id) {
            return Err(Error::closed(WrapperKind::ResultSet));
        }
        Ok(core)
    }

    #[must_use]
    pub const fn id(&self) -> WrapperId {
        self.id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.connection.core.lock().result_sets.contains_key(&self.id)
    }

    /// Move the cursor; returns whether it is on a row.
    pub fn navigate(&self, navigation: Navigation) -> Result<bool> {
        self.open()?.navigate(self.id, navigation)
    }

    pub fn next(&self) -> Result<bool> {
        self.navigate(Navigation::Next)
    }

    /// Value of the 1-based `column` in the current row.
    pub fn get(&self, column: usize) -> Result<Value> {
        self.open()?
            .with_result_set(self.id, "get", |rs| rs.driver.get(column))
    }

    pub fn get_large_object(&self, column: usize, kind: LobKind) -> Result<Arc<dyn LargeObject>> {
        self.open()?.large_object(self.id, column, kind)
    }

    /// Update a column of the current row through an updatable cursor.
    pub fn update(&self, column: usize, value: Value) -> Result<()> {
        self.open()?
            .with_result_set(self.id, "update", |rs| rs.driver.update(column, value))
    }

    pub fn change_row(&self, change: RowChange) -> Result<()> {
        self.open()?.change_row(self.id, change)
    }

    /// Close the cursor. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.connection.core.lock().close_result_set(self.id, false)
    }

    #[must_use]
    pub fn introspect(&self) -> Introspection {
        self.connection.core.lock().introspect_result_set(self.id)
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .finish()
    }
}
