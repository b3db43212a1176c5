//! TOML configuration file loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::builder::{ConfigBuilder, ConnectionSharing, LocalTransactionSwitching};
use crate::{Error, Result};

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./rsadapter.toml",
    "~/.config/rsadapter/config.toml",
    "/etc/rsadapter/config.toml",
];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    statement_cache: Option<StatementCacheSection>,
    transactions: Option<TransactionSection>,
    result_sets: Option<ResultSetSection>,
    sharing: Option<SharingSection>,
    diagnostics: Option<DiagnosticsSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatementCacheSection {
    size: Option<usize>,
    include_isolation_level: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransactionSection {
    enabled: Option<bool>,
    sync_query_timeout: Option<bool>,
    query_timeout_secs: Option<u64>,
    local_switching: Option<LocalTransactionSwitching>,
    begin_for_vendor_apis: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResultSetSection {
    begin_tran_for_scrolling: Option<bool>,
    free_resources_on_close: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SharingSection {
    mode: Option<ConnectionSharing>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DiagnosticsSection {
    detect_multithreaded_access: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    level: Option<String>,
    json: Option<bool>,
}

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        Error::config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(apply_file_config(builder, file_config))
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> ConfigBuilder {
    if let Some(cache) = config.statement_cache {
        if let Some(size) = cache.size {
            builder = builder.statement_cache_size(size);
        }
        if let Some(enabled) = cache.include_isolation_level {
            builder = builder.statement_cache_isolation_level(enabled);
        }
    }

    if let Some(tx) = config.transactions {
        if let Some(enabled) = tx.enabled {
            builder = builder.transactional(enabled);
        }
        if let Some(sync) = tx.sync_query_timeout {
            builder = builder.sync_query_timeout_with_transaction_timeout(sync);
        }
        if let Some(secs) = tx.query_timeout_secs {
            builder = builder.query_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        if let Some(policy) = tx.local_switching {
            builder = builder.local_transaction_switching(policy);
        }
        if let Some(begin) = tx.begin_for_vendor_apis {
            builder = builder.begin_tran_for_vendor_apis(begin);
        }
    }

    if let Some(rs) = config.result_sets {
        if let Some(begin) = rs.begin_tran_for_scrolling {
            builder = builder.begin_tran_for_result_set_scrolling_apis(begin);
        }
        if let Some(free) = rs.free_resources_on_close {
            builder = builder.free_resources_on_close(free);
        }
    }

    if let Some(mode) = config.sharing.and_then(|s| s.mode) {
        builder = builder.connection_sharing(mode);
    }

    if let Some(detect) = config
        .diagnostics
        .and_then(|d| d.detect_multithreaded_access)
    {
        builder = builder.enable_multithreaded_access_detection(detect);
    }

    if let Some(logging) = config.logging {
        if let Some(level) = logging.level {
            builder = builder.log_level(level);
        }
        if let Some(json) = logging.json {
            builder = builder.json_logs(json);
        }
    }

    builder
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[statement_cache]
size = 25
include_isolation_level = true

[transactions]
sync_query_timeout = true
query_timeout_secs = 30
local_switching = "strict"

[result_sets]
begin_tran_for_scrolling = false
free_resources_on_close = true

[sharing]
mode = "match-current-state"

[diagnostics]
detect_multithreaded_access = true

[logging]
level = "debug"
json = true
"#
        )
        .unwrap();

        let config = load_from_file(file.path(), ConfigBuilder::new())
            .unwrap()
            .build();

        assert_eq!(config.statement_cache_size, 25);
        assert!(config.statement_cache_isolation_level);
        assert!(config.sync_query_timeout_with_transaction_timeout);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            config.local_transaction_switching,
            LocalTransactionSwitching::Strict
        );
        assert!(!config.begin_tran_for_result_set_scrolling_apis);
        assert!(config.free_resources_on_close);
        assert_eq!(config.connection_sharing, ConnectionSharing::MatchCurrentState);
        assert!(config.enable_multithreaded_access_detection);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[statement_cache]\nsize = 0").unwrap();

        let config = load_from_file(file.path(), ConfigBuilder::new())
            .unwrap()
            .build();
        assert_eq!(config.statement_cache_size, 0);
        assert!(config.transactional);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[statement_cache]\nsise = 3").unwrap();

        let err = load_from_file(file.path(), ConfigBuilder::new()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_missing_file() {
        let err = load_from_file(Path::new("/nonexistent/rsadapter.toml"), ConfigBuilder::new())
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Failed to read"));
    }
}
