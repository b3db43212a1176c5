//! Database metadata wrapper.
//!
//! One per connection handle, created on first use. Its result sets have no
//! statement parent, so close-on-completion never applies to them.

use crate::connection::{Connection, HandleCore};
use crate::driver::MetadataQuery;
use crate::result_set::{ResultSet, ResultSetParent};
use crate::state::{ChildSet, Introspection, WrapperId, WrapperKind, WrapperState};
use crate::{Error, Result};

/// Arena entry of the metadata wrapper.
#[derive(Debug)]
pub(crate) struct MetadataEntry {
    pub(crate) id: WrapperId,
    pub(crate) results: ChildSet<WrapperId>,
}

impl HandleCore {
    /// Id of the handle's metadata wrapper, creating it if needed.
    pub(crate) fn metadata_id(&mut self) -> Result<WrapperId> {
        self.ensure_open()?;
        if let Some(metadata) = &self.metadata {
            return Ok(metadata.id);
        }
        let id = self.next_child_id();
        self.children.set_primary(id);
        self.metadata = Some(MetadataEntry {
            id,
            results: ChildSet::default(),
        });
        Ok(id)
    }

    fn metadata_is_open(&self, id: WrapperId) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.id == id)
    }

    /// Close the metadata wrapper and its result sets.
    pub(crate) fn close_metadata(&mut self) -> Result<()> {
        let Some(metadata) = self.metadata.take() else {
            return Ok(());
        };
        self.children.remove(metadata.id);

        let mut first_error = None;
        for result_set in metadata.results.snapshot().into_iter().rev() {
            if let Err(e) = self.close_result_set(result_set, false) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn metadata_query(&mut self, id: WrapperId, query: &MetadataQuery) -> Result<WrapperId> {
        let driver = self.with_physical("metadata_query", |c| c.metadata_query(query))?;
        Ok(self.register_result_set(ResultSetParent::Metadata(id), driver, None, false))
    }
}

/// Catalog information about the database behind a connection handle.
#[derive(Debug, Clone)]
pub struct DatabaseMetaData {
    connection: Connection,
    id: WrapperId,
}

impl DatabaseMetaData {
    pub(crate) const fn new(connection: Connection, id: WrapperId) -> Self {
        Self { connection, id }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed(WrapperKind::DatabaseMetaData));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.connection.core.lock().metadata_is_open(self.id)
    }

    /// The connection handle this metadata belongs to.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn query(&self, query: &MetadataQuery) -> Result<ResultSet> {
        self.ensure_open()?;
        self.connection.activate()?;
        let id = {
            let mut core = self.connection.core.lock();
            if !core.metadata_is_open(self.id) {
                return Err(Error::closed(WrapperKind::DatabaseMetaData));
            }
            core.metadata_query(self.id, query)?
        };
        Ok(ResultSet::new(self.connection.clone(), id))
    }

    pub fn database_product_name(&self) -> Result<String> {
        self.ensure_open()?;
        self.connection.database_product_name()
    }

    pub fn close(&self) -> Result<()> {
        let mut core = self.connection.core.lock();
        if !core.metadata_is_open(self.id) {
            return Ok(());
        }
        core.close_metadata()
    }

    #[must_use]
    pub fn introspect(&self) -> Introspection {
        let core = self.connection.core.lock();
        match core.metadata.as_ref().filter(|m| m.id == self.id) {
            Some(metadata) => Introspection::new(
                WrapperKind::DatabaseMetaData,
                WrapperState::Active,
                metadata.results.len(),
            )
            .with("id", self.id.to_string())
            .with("handle", core.id.to_string()),
            None => Introspection::new(WrapperKind::DatabaseMetaData, WrapperState::Closed, 0)
                .with("id", self.id.to_string()),
        }
    }
}
