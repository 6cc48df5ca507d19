//! Environment-variable configuration of a worker node.

use std::path::PathBuf;
use std::time::Duration;
use ustore_store::prolly::TreeParams;
use ustore_worker::LogSettings;

pub const ENV_WORKER_FILE: &str = "USTORE_WORKER_FILE";
pub const ENV_CLIENT_SERVICE_FILE: &str = "USTORE_CLIENT_SERVICE_FILE";
pub const ENV_CHUNK_STORE_PATH: &str = "USTORE_CHUNK_STORE_PATH";
pub const ENV_RECOVERY_LOG_PATH: &str = "USTORE_RECOVERY_LOG_PATH";
pub const ENV_CHUNK_PATTERN: &str = "USTORE_CHUNK_PATTERN";
pub const ENV_CHUNK_WINDOW: &str = "USTORE_CHUNK_WINDOW";
pub const ENV_RECV_THREADS: &str = "USTORE_RECV_THREADS";
pub const ENV_STRONG_SYNC: &str = "USTORE_STRONG_SYNC";
pub const ENV_LOG_FLUSH_TIMEOUT_MS: &str = "USTORE_LOG_FLUSH_TIMEOUT_MS";
pub const ENV_LOG_BUFFER_SIZE: &str = "USTORE_LOG_BUFFER_SIZE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UStoreConfig {
    /// Worker list file: `<start_hash_base32> <address>` lines.
    pub worker_file: PathBuf,
    /// Client-service address file consumed by front-ends.
    pub client_service_file: PathBuf,
    /// Chunk data file; in-memory storage when unset.
    pub chunk_store_path: Option<PathBuf>,
    /// Recovery log file; head mutations are not logged when unset.
    pub recovery_log_path: Option<PathBuf>,
    pub chunk_pattern: u32,
    pub chunk_window: usize,
    pub recv_threads: usize,
    pub strong_sync: bool,
    pub log_flush_timeout: Duration,
    pub log_buffer_size: usize,
}

impl Default for UStoreConfig {
    fn default() -> UStoreConfig {
        UStoreConfig {
            worker_file: PathBuf::from("conf/workers.lst"),
            client_service_file: PathBuf::from("conf/services.lst"),
            chunk_store_path: None,
            recovery_log_path: None,
            chunk_pattern: TreeParams::DEFAULT_CHUNK_PATTERN,
            chunk_window: TreeParams::DEFAULT_WINDOW_SIZE,
            recv_threads: 2,
            strong_sync: false,
            log_flush_timeout: Duration::from_secs(5),
            log_buffer_size: 4 << 20,
        }
    }
}

impl UStoreConfig {
    pub fn from_env() -> UStoreConfig {
        UStoreConfig::from_vars(|name| std::env::var(name).ok())
    }

    /// Reads configuration through a lookup function, so tests can inject
    /// variables without touching the process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> UStoreConfig {
        let defaults = UStoreConfig::default();
        fn parsed<T: std::str::FromStr>(raw: Option<String>, name: &str, default: T) -> T {
            match raw {
                None => default,
                Some(raw) => raw.parse().unwrap_or_else(|_| {
                    tracing::warn!(target: "config", %name, %raw, "unparsable value, using default");
                    default
                }),
            }
        }
        UStoreConfig {
            worker_file: lookup(ENV_WORKER_FILE)
                .map(PathBuf::from)
                .unwrap_or(defaults.worker_file),
            client_service_file: lookup(ENV_CLIENT_SERVICE_FILE)
                .map(PathBuf::from)
                .unwrap_or(defaults.client_service_file),
            chunk_store_path: lookup(ENV_CHUNK_STORE_PATH).map(PathBuf::from),
            recovery_log_path: lookup(ENV_RECOVERY_LOG_PATH).map(PathBuf::from),
            chunk_pattern: parsed(
                lookup(ENV_CHUNK_PATTERN),
                ENV_CHUNK_PATTERN,
                defaults.chunk_pattern,
            ),
            chunk_window: parsed(
                lookup(ENV_CHUNK_WINDOW),
                ENV_CHUNK_WINDOW,
                defaults.chunk_window,
            ),
            recv_threads: parsed(
                lookup(ENV_RECV_THREADS),
                ENV_RECV_THREADS,
                defaults.recv_threads,
            ),
            strong_sync: parsed(lookup(ENV_STRONG_SYNC), ENV_STRONG_SYNC, false),
            log_flush_timeout: Duration::from_millis(parsed(
                lookup(ENV_LOG_FLUSH_TIMEOUT_MS),
                ENV_LOG_FLUSH_TIMEOUT_MS,
                defaults.log_flush_timeout.as_millis() as u64,
            )),
            log_buffer_size: parsed(
                lookup(ENV_LOG_BUFFER_SIZE),
                ENV_LOG_BUFFER_SIZE,
                defaults.log_buffer_size,
            ),
        }
    }

    pub fn tree_params(&self) -> TreeParams {
        TreeParams { chunk_pattern: self.chunk_pattern, window_size: self.chunk_window }
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            buffer_size: self.log_buffer_size,
            flush_timeout: self.log_flush_timeout,
            strong_sync: self.strong_sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = UStoreConfig::from_vars(|_| None);
        assert_eq!(config.chunk_pattern, (1 << 12) - 1);
        assert_eq!(config.chunk_window, 64);
        assert_eq!(config.recv_threads, 2);
        assert!(!config.strong_sync);
        assert_eq!(config.log_flush_timeout, Duration::from_secs(5));
        assert_eq!(config.log_buffer_size, 4 << 20);
        assert_eq!(config.chunk_store_path, None);
    }

    #[test]
    fn variables_override_defaults() {
        let vars: std::collections::HashMap<&str, &str> = [
            (ENV_CHUNK_PATTERN, "255"),
            (ENV_CHUNK_WINDOW, "8"),
            (ENV_RECV_THREADS, "4"),
            (ENV_STRONG_SYNC, "true"),
            (ENV_CHUNK_STORE_PATH, "/data/chunks.dat"),
        ]
        .into_iter()
        .collect();
        let config = UStoreConfig::from_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.chunk_pattern, 255);
        assert_eq!(config.chunk_window, 8);
        assert_eq!(config.recv_threads, 4);
        assert!(config.strong_sync);
        assert_eq!(config.chunk_store_path, Some(PathBuf::from("/data/chunks.dat")));
        assert_eq!(config.tree_params().chunk_pattern, 255);
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = UStoreConfig::from_vars(|name| {
            (name == ENV_CHUNK_PATTERN).then(|| "not-a-number".to_string())
        });
        assert_eq!(config.chunk_pattern, (1 << 12) - 1);
    }
}
