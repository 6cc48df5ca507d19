//! Node assembly: reads the configuration, opens the chunk store, replays
//! the recovery log and wires the worker behind the dispatch service.

use std::sync::Arc;
use ustore_primitives::WorkerId;
use ustore_store::{ChunkStore, FileChunkStore, MemoryChunkStore};
use ustore_worker::{InMemoryHeadVersion, Worker};

pub mod config;

pub use config::UStoreConfig;
pub use ustore_network::{RequestHandler, WorkerService};

/// Builds a worker from the configuration: file-backed chunk store when a
/// path is configured (in-memory otherwise), an in-memory head index, and
/// recovery-log replay when a log path is configured.
pub fn start_worker(id: WorkerId, config: &UStoreConfig) -> std::io::Result<Arc<Worker>> {
    let store: Arc<dyn ChunkStore> = match &config.chunk_store_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(
                FileChunkStore::open(path, config.strong_sync)
                    .map_err(|err| std::io::Error::other(err.to_string()))?,
            )
        }
        None => Arc::new(MemoryChunkStore::new()),
    };
    let head = Box::new(InMemoryHeadVersion::new());
    let worker = match &config.recovery_log_path {
        Some(log_path) => {
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Worker::with_recovery_log(
                id,
                store,
                head,
                config.tree_params(),
                log_path,
                config.log_settings(),
            )?
        }
        None => Worker::new(id, store, head, config.tree_params()),
    };
    tracing::info!(target: "ustore", id, "worker started");
    Ok(Arc::new(worker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ustore_worker::Value;

    #[test]
    fn in_memory_node_round_trip() {
        let config = UStoreConfig::default();
        let worker = start_worker(1, &config).unwrap();
        let ver = worker.put(b"k", &Value::string(b"hello"), b"master").unwrap();
        assert!(worker.is_branch_head(b"k", b"master", &ver));
    }

    #[test]
    fn durable_node_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = UStoreConfig {
            chunk_store_path: Some(dir.path().join("chunks.dat")),
            recovery_log_path: Some(dir.path().join("ustore.log")),
            strong_sync: true,
            ..UStoreConfig::default()
        };

        let v2;
        {
            let worker = start_worker(1, &config).unwrap();
            worker.put(b"k", &Value::string(b"v1"), b"master").unwrap();
            v2 = worker.put(b"k", &Value::string(b"v2"), b"master").unwrap();
            worker.rename(b"k", b"master", b"main").unwrap();
        }

        let worker = start_worker(1, &config).unwrap();
        assert_eq!(worker.get_branch_head(b"k", b"main"), v2);
        assert!(!worker.exists_branch(b"k", b"master"));
        let cell = worker.get(b"k", b"main").unwrap();
        assert_eq!(
            worker.read_value(&cell).unwrap(),
            ustore_worker::TypedValue::String(b"v2".to_vec())
        );
    }
}
