//! Managed connection handles over pooled database connections.
//!
//! Applications obtain [`Connection`] handles from a [`DataSource`]. Each handle
//! is bound to a [`ManagedConnection`] owned by a pool, and every statement,
//! result set and metadata object created through it is a child wrapper that
//! shares the handle's lifecycle.
//!
//! # Features
//!
//! - Handle association, dissociation and reservation driven by the pool
//! - Lazy local transaction begin and lazy global enlistment
//! - Connection sharing rules for handles on one managed connection
//! - Prepared statement caching per managed connection
//! - Driver error mapping with connection error events
//!
//! # Example
//!
//! ```rust,ignore
//! use rsadapter::{DataSource, ResourceRefConfig};
//!
//! let ds = DataSource::new("(id=orders)", ResourceRefConfig::default(), factory, manager);
//! let conn = ds.get_connection()?;
//! let rs = conn.create_statement()?.execute_query("SELECT ID FROM ORDERS")?;
//! while rs.next()? {
//!     println!("{:?}", rs.get(1)?);
//! }
//! conn.close()?;
//! ```
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache_key;
pub mod capability;
pub mod config;
pub mod connection;
pub mod datasource;
pub mod driver;
pub mod error;
pub mod factory;
pub mod helper;
pub mod managed;
pub mod manager;
pub mod metadata;
pub mod observability;
pub mod result_set;
pub mod state;
pub mod statement;
pub mod statement_cache;
mod warnings;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

#[cfg(test)]
mod tests;

// Re-export main types for convenience
pub use capability::{CapabilityRegistry, VendorInterface};
pub use config::{ConfigBuilder, ConnectionSharing, DataSourceConfig, LocalTransactionSwitching};
pub use connection::{Connection, HandleId, WeakConnection};
pub use datasource::{DataSource, DataSourceReference, DataSourceResolver, ResourceRefConfig};
pub use error::{DriverError, Error, ResourceError, Result, SharingViolation, XaError, XaErrorCode};
pub use factory::{AccessKey, ConnectionFactory};
pub use helper::{DriverHelper, GenericHelper};
pub use managed::{ConnectionRequestInfo, ManagedConnection, TransactionState};
pub use manager::{
    ConnectionEvent, ConnectionEventListener, ConnectionManager, LazyEnlistment,
    NoGlobalTransactions, TransactionServices,
};
pub use metadata::DatabaseMetaData;
pub use result_set::ResultSet;
pub use state::{Introspection, WrapperKind, WrapperState};
pub use statement::{CallableStatement, PreparedStatement, Statement};
