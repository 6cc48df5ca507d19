//! The engine facade: Get/Put/Branch/Rename/Merge/Delete/List over keys,
//! branches and versions, backed by the chunk store, the head-version index
//! and the recovery log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use ustore_primitives::{ErrorCode, Hash, UType, WorkerId};
use ustore_store::prolly::TreeParams;
use ustore_store::types::{SBlob, SList, SMap, SSet, SString, TypeError};
use ustore_store::{Chunk, ChunkLoader, ChunkStore, StorageInfo, UCell};

pub mod head_version;
pub mod kv_head_version;
mod merge;
mod metrics;
pub mod recovery;
#[cfg(test)]
mod tests;

pub use head_version::{HeadVersion, InMemoryHeadVersion, dump_head_version, load_head_version};
pub use kv_head_version::KvHeadVersion;
pub use recovery::{LogOp, LogSettings, LogWriter, replay};

pub type Result<T> = std::result::Result<T, ErrorCode>;

/// Edit spec driving every write. `base == Hash::NULL` builds the value
/// from scratch; otherwise the write is an update of the tree rooted at
/// `base`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Value {
    pub utype: Option<UType>,
    /// Data root this edit starts from, null for a fresh value.
    pub base: Hash,
    /// Element position of the edit (Blob/List updates).
    pub pos: u64,
    /// Number of elements to delete at `pos` (Blob/List), or a nonzero
    /// marker selecting removal for Map/Set key updates.
    pub dels: u64,
    pub vals: Vec<Vec<u8>>,
    pub keys: Vec<Vec<u8>>,
}

impl Value {
    pub fn string(data: &[u8]) -> Value {
        Value { utype: Some(UType::String), vals: vec![data.to_vec()], ..Value::default() }
    }

    pub fn blob(data: &[u8]) -> Value {
        Value { utype: Some(UType::Blob), vals: vec![data.to_vec()], ..Value::default() }
    }

    pub fn list(values: &[Vec<u8>]) -> Value {
        Value { utype: Some(UType::List), vals: values.to_vec(), ..Value::default() }
    }

    pub fn map(keys: &[Vec<u8>], vals: &[Vec<u8>]) -> Value {
        Value {
            utype: Some(UType::Map),
            keys: keys.to_vec(),
            vals: vals.to_vec(),
            ..Value::default()
        }
    }

    pub fn set(keys: &[Vec<u8>]) -> Value {
        Value { utype: Some(UType::Set), keys: keys.to_vec(), ..Value::default() }
    }

    /// Whether the caller supplied any content. Merges with an empty value
    /// fall back to automatic conflict resolution.
    pub fn is_empty(&self) -> bool {
        self.utype.is_none()
    }
}

/// A value materialized for a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    String(Vec<u8>),
    Blob(Vec<u8>),
    List(Vec<Vec<u8>>),
    Map(Vec<(Vec<u8>, Vec<u8>)>),
    Set(Vec<Vec<u8>>),
}

/// Worker node: the single object upper layers call.
///
/// Chunk writes happen outside any lock; the per-key mutex is held only for
/// the head-version update, so operations on distinct keys proceed
/// independently while writes under one key linearize in head-update order.
pub struct Worker {
    id: WorkerId,
    store: Arc<dyn ChunkStore>,
    head: Box<dyn HeadVersion>,
    log: Option<LogWriter>,
    params: TreeParams,
    key_locks: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        store: Arc<dyn ChunkStore>,
        head: Box<dyn HeadVersion>,
        params: TreeParams,
    ) -> Worker {
        Worker { id, store, head, log: None, params, key_locks: Mutex::new(HashMap::new()) }
    }

    /// Constructs a worker with a recovery log: the existing log is
    /// replayed into the head index, its torn tail (if any) discarded, and
    /// subsequent head mutations are appended.
    pub fn with_recovery_log(
        id: WorkerId,
        store: Arc<dyn ChunkStore>,
        head: Box<dyn HeadVersion>,
        params: TreeParams,
        log_path: &Path,
        settings: LogSettings,
    ) -> std::io::Result<Worker> {
        let mut worker = Worker::new(id, store, head, params);
        let stats = replay(log_path, |_seq, op| match op {
            LogOp::Update { key, branch, version } => {
                worker.head.put_branch(&key, &branch, &version);
            }
            LogOp::Rename { key, old, new } => worker.head.rename_branch(&key, &old, &new),
            LogOp::Remove { key, branch } => worker.head.remove_branch(&key, &branch),
        })?;
        tracing::info!(
            target: "worker",
            records = stats.records,
            bytes = stats.valid_bytes,
            "recovery log replayed"
        );
        worker.log = Some(LogWriter::open(log_path, settings, stats.valid_bytes)?);
        Ok(worker)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn params(&self) -> TreeParams {
        self.params
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub(crate) fn head(&self) -> &dyn HeadVersion {
        self.head.as_ref()
    }

    pub fn info(&self) -> StorageInfo {
        self.store.info()
    }

    /// Head version of a branch, [`Hash::NULL`] when unavailable.
    pub fn get_branch_head(&self, key: &[u8], branch: &[u8]) -> Hash {
        self.head.get_branch(key, branch).unwrap_or(Hash::NULL)
    }

    pub fn get_latest_versions(&self, key: &[u8]) -> Vec<Hash> {
        self.head.get_latest(key)
    }

    pub fn is_latest_version(&self, key: &[u8], ver: &Hash) -> bool {
        self.head.is_latest(key, ver)
    }

    pub fn is_branch_head(&self, key: &[u8], branch: &[u8], ver: &Hash) -> bool {
        self.head.is_branch_head(key, branch, ver)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.head.exists(key)
    }

    pub fn exists_branch(&self, key: &[u8], branch: &[u8]) -> bool {
        self.head.exists_branch(key, branch)
    }

    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        self.head.list_keys()
    }

    pub fn list_branches(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.head.list_branches(key)
    }

    /// Reads the UCell at the head of a branch.
    pub fn get(&self, key: &[u8], branch: &[u8]) -> Result<UCell> {
        metrics::OPS.with_label_values(&["get"]).inc();
        let ver = self.head.get_branch(key, branch).ok_or(ErrorCode::BranchNotExists)?;
        self.load_cell(key, &ver)
    }

    /// Reads the UCell of an explicit version.
    pub fn get_version(&self, key: &[u8], ver: &Hash) -> Result<UCell> {
        metrics::OPS.with_label_values(&["get"]).inc();
        self.load_cell(key, ver)
    }

    /// Materializes the value a UCell points at.
    pub fn read_value(&self, cell: &UCell) -> Result<TypedValue> {
        let loader = ChunkLoader::new(self.store.clone());
        let data = cell.data_hash();
        let value = match cell.utype() {
            UType::String => TypedValue::String(
                SString::load(&loader, &data).map_err(read_err)?.data().to_vec(),
            ),
            UType::Blob => TypedValue::Blob(
                SBlob::load(&loader, &data).map_err(read_err)?.read_all().map_err(read_err)?,
            ),
            UType::List => {
                let list = SList::load(&loader, &data).map_err(read_err)?;
                let values: std::result::Result<Vec<_>, _> = list.iter().collect();
                TypedValue::List(values.map_err(read_err)?)
            }
            UType::Map => {
                let map = SMap::load(&loader, &data).map_err(read_err)?;
                let entries: std::result::Result<Vec<_>, _> = map.scan().collect();
                TypedValue::Map(entries.map_err(read_err)?)
            }
            UType::Set => {
                let set = SSet::load(&loader, &data).map_err(read_err)?;
                let keys: std::result::Result<Vec<_>, _> = set.scan().collect();
                TypedValue::Set(keys.map_err(read_err)?)
            }
            UType::Bool | UType::Num => return Err(ErrorCode::TypeUnsupported),
        };
        Ok(value)
    }

    /// Raw chunk fetch for clients that decode locally.
    pub fn get_chunk(&self, key: &[u8], ver: &Hash) -> Result<Chunk> {
        let cell = self.load_cell(key, ver)?;
        Ok(cell.chunk().clone())
    }

    /// Writes a new value as the head of `branch`; the previous head (or
    /// null for a new branch) becomes the parent.
    pub fn put(&self, key: &[u8], value: &Value, branch: &[u8]) -> Result<Hash> {
        metrics::OPS.with_label_values(&["put"]).inc();
        let pre = self.get_branch_head(key, branch);
        let cell = self.write(key, value, &pre, &Hash::NULL)?;
        self.commit(key, Some(branch), &cell)?;
        Ok(cell.hash())
    }

    /// Writes a new value as the successor of an explicit version; no
    /// branch head moves.
    pub fn put_version(&self, key: &[u8], value: &Value, pre_ver: &Hash) -> Result<Hash> {
        metrics::OPS.with_label_values(&["put"]).inc();
        if !pre_ver.is_null() {
            // The referred version must exist and belong to this key.
            let loader = ChunkLoader::new(self.store.clone());
            let cell =
                UCell::load(&loader, pre_ver).map_err(|_| ErrorCode::ReferringVersionNotExist)?;
            if cell.key() != key {
                return Err(ErrorCode::InconsistentKey);
            }
        }
        let cell = self.write(key, value, pre_ver, &Hash::NULL)?;
        self.commit(key, None, &cell)?;
        Ok(cell.hash())
    }

    /// Points a new branch at the head of an existing branch.
    pub fn branch(&self, key: &[u8], old_branch: &[u8], new_branch: &[u8]) -> Result<()> {
        metrics::OPS.with_label_values(&["branch"]).inc();
        let ver = self.head.get_branch(key, old_branch).ok_or(ErrorCode::BranchNotExists)?;
        self.branch_at(key, &ver, new_branch)
    }

    /// Points a new branch at an existing version.
    pub fn branch_version(&self, key: &[u8], ver: &Hash, new_branch: &[u8]) -> Result<()> {
        metrics::OPS.with_label_values(&["branch"]).inc();
        self.load_cell(key, ver)?;
        self.branch_at(key, ver, new_branch)
    }

    fn branch_at(&self, key: &[u8], ver: &Hash, new_branch: &[u8]) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();
        if self.head.exists_branch(key, new_branch) {
            return Err(ErrorCode::BranchExists);
        }
        self.append_log(&LogOp::Update {
            key: key.to_vec(),
            branch: new_branch.to_vec(),
            version: *ver,
        })?;
        self.head.put_branch(key, new_branch, ver);
        Ok(())
    }

    /// Atomically renames a branch.
    pub fn rename(&self, key: &[u8], old_branch: &[u8], new_branch: &[u8]) -> Result<()> {
        metrics::OPS.with_label_values(&["rename"]).inc();
        let lock = self.key_lock(key);
        let _guard = lock.lock();
        if !self.head.exists_branch(key, old_branch) {
            return Err(ErrorCode::BranchNotExists);
        }
        if self.head.exists_branch(key, new_branch) {
            return Err(ErrorCode::BranchExists);
        }
        self.append_log(&LogOp::Rename {
            key: key.to_vec(),
            old: old_branch.to_vec(),
            new: new_branch.to_vec(),
        })?;
        self.head.rename_branch(key, old_branch, new_branch);
        Ok(())
    }

    /// Removes the branch entry. Chunks and UCells remain reachable
    /// through history; nothing is garbage collected.
    pub fn delete(&self, key: &[u8], branch: &[u8]) -> Result<()> {
        metrics::OPS.with_label_values(&["delete"]).inc();
        let lock = self.key_lock(key);
        let _guard = lock.lock();
        if !self.head.exists_branch(key, branch) {
            return Err(ErrorCode::BranchNotExists);
        }
        self.append_log(&LogOp::Remove { key: key.to_vec(), branch: branch.to_vec() })?;
        self.head.remove_branch(key, branch);
        Ok(())
    }

    /// Loads a cell, verifying it belongs to `key`.
    fn load_cell(&self, key: &[u8], ver: &Hash) -> Result<UCell> {
        let loader = ChunkLoader::new(self.store.clone());
        let cell = UCell::load(&loader, ver).map_err(|_| ErrorCode::UCellNotFound)?;
        if cell.key() != key {
            return Err(ErrorCode::InconsistentKey);
        }
        Ok(cell)
    }

    /// Writes the value chunks and the UCell; no locks held.
    pub(crate) fn write(
        &self,
        key: &[u8],
        value: &Value,
        pre1: &Hash,
        pre2: &Hash,
    ) -> Result<UCell> {
        let loader = ChunkLoader::new(self.store.clone());
        let utype = value.utype.ok_or(ErrorCode::InvalidValue)?;
        let data = self.write_data(&loader, utype, value)?;
        let cell = UCell::create(&loader, utype, &data, pre1, pre2, key, &[])
            .map_err(|_| ErrorCode::FailedCreateUCell)?;
        Ok(cell)
    }

    fn write_data(&self, loader: &ChunkLoader, utype: UType, value: &Value) -> Result<Hash> {
        match utype {
            UType::String => {
                let data = value.vals.first().ok_or(ErrorCode::InvalidValue)?;
                SString::create(loader, data).map_err(|_| ErrorCode::FailedCreateSString)
            }
            UType::Blob => {
                let insert: Vec<u8> = value.vals.concat();
                if value.base.is_null() {
                    SBlob::create(loader, self.params, &insert)
                        .map_err(|_| ErrorCode::FailedCreateSBlob)
                } else {
                    let blob =
                        SBlob::load(loader, &value.base).map_err(modify_err_blob)?;
                    blob.splice(self.params, value.pos, value.dels, &insert)
                        .map_err(modify_err_blob)
                }
            }
            UType::List => {
                if value.base.is_null() {
                    SList::create(loader, self.params, &value.vals)
                        .map_err(|_| ErrorCode::FailedCreateSList)
                } else {
                    let list =
                        SList::load(loader, &value.base).map_err(modify_err_list)?;
                    list.splice(self.params, value.pos, value.dels, &value.vals)
                        .map_err(modify_err_list)
                }
            }
            UType::Map => {
                if value.base.is_null() {
                    SMap::create(loader, self.params, &value.keys, &value.vals)
                        .map_err(|_| ErrorCode::FailedCreateSMap)
                } else {
                    let map = SMap::load(loader, &value.base).map_err(modify_err_map)?;
                    if value.vals.is_empty() && !value.keys.is_empty() {
                        // Keys with no values remove those entries.
                        let mut root = map.root();
                        for key in &value.keys {
                            let map = SMap::load(loader, &root).map_err(modify_err_map)?;
                            root = map.remove(self.params, key).map_err(modify_err_map)?;
                        }
                        Ok(root)
                    } else {
                        map.set_many(self.params, &value.keys, &value.vals)
                            .map_err(modify_err_map)
                    }
                }
            }
            UType::Set => {
                if value.base.is_null() {
                    SSet::create(loader, self.params, &value.keys)
                        .map_err(|_| ErrorCode::FailedCreateSMap)
                } else {
                    let mut root = value.base;
                    for key in &value.keys {
                        let set = SSet::load(loader, &root).map_err(modify_err_map)?;
                        root = if value.dels > 0 {
                            set.remove(self.params, key).map_err(modify_err_map)?
                        } else {
                            set.insert(self.params, key).map_err(modify_err_map)?
                        };
                    }
                    Ok(root)
                }
            }
            UType::Bool | UType::Num => Err(ErrorCode::TypeUnsupported),
        }
    }

    /// Publishes a freshly written cell: appends the recovery log record,
    /// then updates the branch head and the latest set, all under the
    /// per-key lock. Either the log record is durable and the update
    /// applied, or neither.
    pub(crate) fn commit(&self, key: &[u8], branch: Option<&[u8]>, cell: &UCell) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();
        let ver = cell.hash();
        if let Some(branch) = branch {
            self.append_log(&LogOp::Update {
                key: key.to_vec(),
                branch: branch.to_vec(),
                version: ver,
            })?;
            self.head.put_branch(key, branch, &ver);
        }
        self.head.put_latest(key, &cell.pre_hash(false), &cell.pre_hash(true), &ver);
        Ok(())
    }

    pub(crate) fn append_log(&self, op: &LogOp) -> Result<()> {
        if let Some(log) = &self.log {
            log.append(op).map_err(|err| {
                tracing::error!(target: "worker", %err, "recovery log append failed");
                ErrorCode::WriteFailed
            })?;
        }
        Ok(())
    }

    /// Handle to the per-key mutex; callers lock it for the duration of
    /// the head-version update only.
    pub(crate) fn key_lock(&self, key: &[u8]) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock();
        locks.entry(key.to_vec()).or_default().clone()
    }
}

fn read_err(err: TypeError) -> ErrorCode {
    match err {
        TypeError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
        TypeError::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
        _ => ErrorCode::ReadFailed,
    }
}

fn modify_err(err: TypeError, fallback: ErrorCode) -> ErrorCode {
    match err {
        TypeError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
        TypeError::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
        TypeError::KeyValueMismatch { .. } => ErrorCode::InvalidParameters,
        TypeError::Store(_) => ErrorCode::ChunkNotExists,
        _ => fallback,
    }
}

fn modify_err_blob(err: TypeError) -> ErrorCode {
    modify_err(err, ErrorCode::FailedModifySBlob)
}

fn modify_err_list(err: TypeError) -> ErrorCode {
    modify_err(err, ErrorCode::FailedModifySList)
}

fn modify_err_map(err: TypeError) -> ErrorCode {
    modify_err(err, ErrorCode::FailedModifySMap)
}
