//! Application-facing data source and its serializable reference.
//!
//! A [`DataSource`] can be persisted as a [`DataSourceReference`] (for
//! example with a session) and rebuilt later by re-resolving the data source.
//! No connection state is ever part of the reference.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::driver::IsolationLevel;
use crate::factory::ConnectionFactory;
use crate::managed::ConnectionRequestInfo;
use crate::manager::ConnectionManager;
use crate::{Error, Result};

/// Whether handles from a resource reference may share a managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharingScope {
    #[default]
    Shareable,
    Unshareable,
}

/// Who signs on to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceAuth {
    #[default]
    Container,
    Application,
}

/// Resource reference settings captured when the data source was looked up.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRefConfig {
    pub name: Option<String>,
    pub sharing_scope: SharingScope,
    pub auth: ResourceAuth,
    pub isolation: Option<IsolationLevel>,
    pub commit_priority: i32,
}

impl ResourceRefConfig {
    /// Request info implied by the reference.
    #[must_use]
    pub fn request_info(&self) -> ConnectionRequestInfo {
        let mut info = ConnectionRequestInfo::new();
        info.isolation = self.isolation;
        info
    }
}

/// Source of connection handles for one configured data source.
pub struct DataSource {
    filter: String,
    resource_ref: ResourceRefConfig,
    factory: Arc<ConnectionFactory>,
    manager: Arc<dyn ConnectionManager>,
}

impl DataSource {
    #[must_use]
    pub fn new(
        filter: impl Into<String>,
        resource_ref: ResourceRefConfig,
        factory: Arc<ConnectionFactory>,
        manager: Arc<dyn ConnectionManager>,
    ) -> Self {
        Self {
            filter: filter.into(),
            resource_ref,
            factory,
            manager,
        }
    }

    /// Lookup filter identifying the data source service.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    #[must_use]
    pub const fn resource_ref(&self) -> &ResourceRefConfig {
        &self.resource_ref
    }

    #[must_use]
    pub const fn factory(&self) -> &Arc<ConnectionFactory> {
        &self.factory
    }

    pub fn get_connection(&self) -> Result<Connection> {
        self.get_connection_with(self.resource_ref.request_info())
    }

    /// Connection for a specific user, on top of the reference's settings.
    pub fn get_connection_as(&self, user: &str) -> Result<Connection> {
        self.get_connection_with(self.resource_ref.request_info().user(user))
    }

    fn get_connection_with(&self, request_info: ConnectionRequestInfo) -> Result<Connection> {
        let connection = self
            .manager
            .allocate_connection(&self.factory, &request_info)
            .map_err(Error::from)?;
        tracing::debug!(filter = %self.filter, handle = %connection.id(), "connection allocated");
        Ok(connection)
    }

    /// Serializable reference to this data source.
    #[must_use]
    pub fn snapshot(&self) -> DataSourceReference {
        DataSourceReference {
            filter: self.filter.clone(),
            resource_ref: self.resource_ref.clone(),
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("filter", &self.filter)
            .field("resource_ref", &self.resource_ref)
            .finish_non_exhaustive()
    }
}

/// Looks data sources up again after deserialization.
pub trait DataSourceResolver {
    fn resolve(&self, filter: &str, resource_ref: &ResourceRefConfig) -> Result<DataSource>;
}

/// Persistent form of a [`DataSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceReference {
    pub filter: String,
    pub resource_ref: ResourceRefConfig,
}

impl DataSourceReference {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve the data source again and get a fresh instance.
    pub fn reconstitute(&self, resolver: &dyn DataSourceResolver) -> Result<DataSource> {
        tracing::debug!(filter = %self.filter, "reconstituting data source");
        resolver.resolve(&self.filter, &self.resource_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    struct FixtureResolver<'a>(&'a Fixture);

    impl DataSourceResolver for FixtureResolver<'_> {
        fn resolve(&self, filter: &str, resource_ref: &ResourceRefConfig) -> Result<DataSource> {
            Ok(self.0.data_source(filter, resource_ref.clone()))
        }
    }

    fn resource_ref() -> ResourceRefConfig {
        ResourceRefConfig {
            name: Some("jdbc/orders".into()),
            isolation: Some(IsolationLevel::RepeatableRead),
            ..ResourceRefConfig::default()
        }
    }

    #[test]
    fn test_get_connection_applies_reference_isolation() {
        let fixture = Fixture::new();
        let ds = fixture.data_source("(id=orders)", resource_ref());

        let conn = ds.get_connection().unwrap();
        assert_eq!(
            conn.transaction_isolation().unwrap(),
            IsolationLevel::RepeatableRead
        );
    }

    #[test]
    fn test_allocation_failure_is_resource_error() {
        let fixture = Fixture::new();
        fixture.manager.fail_associations(true);
        let ds = fixture.data_source("(id=orders)", resource_ref());

        assert!(ds.get_connection().unwrap_err().is_resource());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let fixture = Fixture::new();
        let ds = fixture.data_source("(id=orders)", resource_ref());

        let json = ds.snapshot().to_json().unwrap();
        assert!(json.contains("\"repeatable-read\""));
        let reference = DataSourceReference::from_json(&json).unwrap();
        assert_eq!(reference, ds.snapshot());

        let rebuilt = reference.reconstitute(&FixtureResolver(&fixture)).unwrap();
        assert_eq!(rebuilt.filter(), "(id=orders)");
        assert!(rebuilt.get_connection().is_ok());
    }

    #[test]
    fn test_resource_ref_defaults_from_partial_json() {
        let reference = DataSourceReference::from_json(r#"{"filter":"(id=x)","resource_ref":{}}"#).unwrap();
        assert_eq!(reference.resource_ref.sharing_scope, SharingScope::Shareable);
        assert_eq!(reference.resource_ref.auth, ResourceAuth::Container);
        assert!(DataSourceReference::from_json("{").unwrap_err().is_serialization());
    }
}
