//! Environment variable loading for configuration

use std::env;
use std::time::Duration;

use super::builder::{ConfigBuilder, ConnectionSharing, LocalTransactionSwitching};
use crate::{Error, Result};

/// Environment variable names
mod vars {
    pub const STATEMENT_CACHE_SIZE: &str = "RSADAPTER_STATEMENT_CACHE_SIZE";
    pub const STATEMENT_CACHE_ISOLATION: &str = "RSADAPTER_STATEMENT_CACHE_ISOLATION";
    pub const TRANSACTIONAL: &str = "RSADAPTER_TRANSACTIONAL";
    pub const SYNC_QUERY_TIMEOUT: &str = "RSADAPTER_SYNC_QUERY_TIMEOUT";
    pub const QUERY_TIMEOUT_SECS: &str = "RSADAPTER_QUERY_TIMEOUT_SECS";
    pub const LOCAL_SWITCHING: &str = "RSADAPTER_LOCAL_TRANSACTION_SWITCHING";
    pub const CONNECTION_SHARING: &str = "RSADAPTER_CONNECTION_SHARING";
    pub const DETECT_MULTITHREADED: &str = "RSADAPTER_DETECT_MULTITHREADED_ACCESS";
    pub const FREE_RESOURCES: &str = "RSADAPTER_FREE_RESOURCES_ON_CLOSE";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const JSON_LOGS: &str = "RSADAPTER_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(builder: ConfigBuilder) -> Result<ConfigBuilder> {
    load_with(builder, |name| env::var(name).ok())
}

/// Apply variables resolved through `lookup`.
fn load_with(
    mut builder: ConfigBuilder,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder> {
    if let Some(size_str) = lookup(vars::STATEMENT_CACHE_SIZE)
        && let Ok(size) = size_str.parse::<usize>()
    {
        builder = builder.statement_cache_size(size);
    }

    if let Some(val) = lookup(vars::STATEMENT_CACHE_ISOLATION) {
        builder = builder.statement_cache_isolation_level(parse_bool(&val));
    }

    if let Some(val) = lookup(vars::TRANSACTIONAL) {
        builder = builder.transactional(parse_bool(&val));
    }

    if let Some(val) = lookup(vars::SYNC_QUERY_TIMEOUT) {
        builder = builder.sync_query_timeout_with_transaction_timeout(parse_bool(&val));
    }

    if let Some(timeout_str) = lookup(vars::QUERY_TIMEOUT_SECS)
        && let Ok(secs) = timeout_str.parse::<u64>()
    {
        builder = builder.query_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }

    if let Some(val) = lookup(vars::LOCAL_SWITCHING) {
        let policy: LocalTransactionSwitching = val
            .parse()
            .map_err(|e| Error::config(format!("Invalid {}: {e}", vars::LOCAL_SWITCHING)))?;
        builder = builder.local_transaction_switching(policy);
    }

    if let Some(val) = lookup(vars::CONNECTION_SHARING) {
        let sharing: ConnectionSharing = val
            .parse()
            .map_err(|e| Error::config(format!("Invalid {}: {e}", vars::CONNECTION_SHARING)))?;
        builder = builder.connection_sharing(sharing);
    }

    if let Some(val) = lookup(vars::DETECT_MULTITHREADED) {
        builder = builder.enable_multithreaded_access_detection(parse_bool(&val));
    }

    if let Some(val) = lookup(vars::FREE_RESOURCES) {
        builder = builder.free_resources_on_close(parse_bool(&val));
    }

    if let Some(level) = lookup(vars::RUST_LOG) {
        builder = builder.log_level(level);
    }

    if let Some(val) = lookup(vars::JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_env_overrides() {
        let lookup = lookup_from(&[
            (vars::STATEMENT_CACHE_SIZE, "50"),
            (vars::TRANSACTIONAL, "false"),
            (vars::QUERY_TIMEOUT_SECS, "15"),
            (vars::CONNECTION_SHARING, "match-current-state"),
            (vars::DETECT_MULTITHREADED, "yes"),
            (vars::RUST_LOG, "rsadapter=trace"),
        ]);

        let config = load_with(ConfigBuilder::new(), lookup).unwrap().build();
        assert_eq!(config.statement_cache_size, 50);
        assert!(!config.transactional);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.connection_sharing, ConnectionSharing::MatchCurrentState);
        assert!(config.enable_multithreaded_access_detection);
        assert_eq!(config.logging.level, "rsadapter=trace");
    }

    #[test]
    fn test_invalid_values() {
        let lookup = lookup_from(&[(vars::STATEMENT_CACHE_SIZE, "many")]);
        let config = load_with(ConfigBuilder::new(), lookup).unwrap().build();
        assert_eq!(config.statement_cache_size, 10);

        let lookup = lookup_from(&[(vars::LOCAL_SWITCHING, "lenient")]);
        let err = load_with(ConfigBuilder::new(), lookup).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_zero_timeout_clears() {
        let lookup = lookup_from(&[(vars::QUERY_TIMEOUT_SECS, "0")]);
        let config = load_with(
            ConfigBuilder::new().query_timeout(Some(Duration::from_secs(5))),
            lookup,
        )
        .unwrap()
        .build();
        assert_eq!(config.query_timeout, None);
    }
}
