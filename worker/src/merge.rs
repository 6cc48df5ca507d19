//! Three-way merge over the UCell history DAG: fast-forward detection,
//! lowest-common-ancestor search, and per-type combination of the two
//! sides against their common base.

use crate::{Result, Value, Worker, metrics};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use ustore_primitives::{ErrorCode, Hash, UType};
use ustore_store::types::{SList, SMap, SSet, diff};
use ustore_store::{ChunkLoader, UCell};

impl Worker {
    /// Merges the head of `ref_branch` into `tgt_branch`.
    pub fn merge(
        &self,
        key: &[u8],
        value: &Value,
        tgt_branch: &[u8],
        ref_branch: &[u8],
    ) -> Result<Hash> {
        let ref_ver =
            self.head().get_branch(key, ref_branch).ok_or(ErrorCode::BranchNotExists)?;
        self.merge_version(key, value, tgt_branch, &ref_ver)
    }

    /// Merges an explicit version into `tgt_branch`.
    pub fn merge_version(
        &self,
        key: &[u8],
        value: &Value,
        tgt_branch: &[u8],
        ref_ver: &Hash,
    ) -> Result<Hash> {
        let tgt_ver =
            self.head().get_branch(key, tgt_branch).ok_or(ErrorCode::BranchNotExists)?;
        self.merge_impl(key, value, &tgt_ver, ref_ver, Some(tgt_branch))
    }

    /// Merges two explicit versions; no branch head moves.
    pub fn merge_versions(
        &self,
        key: &[u8],
        value: &Value,
        ref_ver1: &Hash,
        ref_ver2: &Hash,
    ) -> Result<Hash> {
        self.merge_impl(key, value, ref_ver1, ref_ver2, None)
    }

    fn merge_impl(
        &self,
        key: &[u8],
        value: &Value,
        ver1: &Hash,
        ver2: &Hash,
        tgt_branch: Option<&[u8]>,
    ) -> Result<Hash> {
        metrics::OPS.with_label_values(&["merge"]).inc();
        let cell1 = self.get_version(key, ver1)?;
        let cell2 = self.get_version(key, ver2)?;

        // A caller-supplied value always wins over auto-resolution.
        if !value.is_empty() {
            let cell = self.write(key, value, ver1, ver2)?;
            self.commit(key, tgt_branch, &cell)?;
            return Ok(cell.hash());
        }

        let loader = ChunkLoader::new(self.store().clone());
        // Fast-forward: one side already contains the other.
        if *ver1 == *ver2 || is_ancestor(&loader, ver2, ver1)? {
            return Ok(*ver1);
        }
        if is_ancestor(&loader, ver1, ver2)? {
            if let Some(branch) = tgt_branch {
                let lock = self.key_lock(key);
                let _guard = lock.lock();
                self.append_log(&crate::LogOp::Update {
                    key: key.to_vec(),
                    branch: branch.to_vec(),
                    version: *ver2,
                })?;
                self.head().put_branch(key, branch, ver2);
            }
            return Ok(*ver2);
        }

        if cell1.utype() != cell2.utype() {
            return Err(ErrorCode::TypeMismatch);
        }
        let base = lowest_common_ancestor(&loader, ver1, ver2)?.ok_or_else(|| {
            metrics::MERGE_CONFLICTS.inc();
            ErrorCode::MergeConflict
        })?;
        let base_cell = self.get_version(key, &base)?;

        let merged_value = self
            .combine(&loader, &base_cell, &cell1, &cell2)
            .inspect_err(|err| {
                if *err == ErrorCode::MergeConflict {
                    metrics::MERGE_CONFLICTS.inc();
                }
            })?;
        let cell = self.write(key, &merged_value, ver1, ver2)?;
        self.commit(key, tgt_branch, &cell)?;
        Ok(cell.hash())
    }

    /// Per-type three-way combination of the values at `base`, `v1`, `v2`.
    /// Produces a fresh-build [`Value`] holding the merged content.
    fn combine(
        &self,
        loader: &ChunkLoader,
        base: &UCell,
        cell1: &UCell,
        cell2: &UCell,
    ) -> Result<Value> {
        let base_data = base.data_hash();
        let data1 = cell1.data_hash();
        let data2 = cell2.data_hash();
        // One side unchanged since the base: take the other side.
        if data1 == base_data || data1 == data2 {
            return self.value_of(cell2);
        }
        if data2 == base_data {
            return self.value_of(cell1);
        }
        match cell1.utype() {
            // Both sides rewrote the content: nothing to combine below
            // element granularity.
            UType::Blob | UType::String => Err(ErrorCode::MergeConflict),
            UType::List => {
                let d1 = diff::list_diff(loader, &base_data, &data1)
                    .map_err(|_| ErrorCode::ReadFailed)?;
                let d2 = diff::list_diff(loader, &base_data, &data2)
                    .map_err(|_| ErrorCode::ReadFailed)?;
                // Positional rule: only meaningful while indexes align, so
                // structural (length-changing) edits on both sides conflict.
                let base_list =
                    SList::load(loader, &base_data).map_err(|_| ErrorCode::ReadFailed)?;
                let len1 = SList::load(loader, &data1).map_err(|_| ErrorCode::ReadFailed)?.size();
                let len2 = SList::load(loader, &data2).map_err(|_| ErrorCode::ReadFailed)?.size();
                if len1 != base_list.size() || len2 != base_list.size() {
                    return Err(ErrorCode::MergeConflict);
                }
                let mut changes: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
                for (idx, _, right) in d1.into_iter().chain(d2) {
                    let new = right.ok_or(ErrorCode::MergeConflict)?;
                    if let Some(prev) = changes.get(&idx) {
                        if *prev != new {
                            return Err(ErrorCode::MergeConflict);
                        }
                    } else {
                        changes.insert(idx, new);
                    }
                }
                let mut values: Vec<Vec<u8>> = base_list
                    .iter()
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| ErrorCode::ReadFailed)?;
                for (idx, new) in changes {
                    values[idx as usize] = new;
                }
                Ok(Value::list(&values))
            }
            UType::Map => {
                let d1 = diff::map_diff(loader, &base_data, &data1)
                    .map_err(|_| ErrorCode::ReadFailed)?;
                let d2 = diff::map_diff(loader, &base_data, &data2)
                    .map_err(|_| ErrorCode::ReadFailed)?;
                // Key -> None means removal on that side.
                let mut changes: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
                for (key, _, right) in d1.into_iter().chain(d2) {
                    if let Some(prev) = changes.get(&key) {
                        if *prev != right {
                            return Err(ErrorCode::MergeConflict);
                        }
                    } else {
                        changes.insert(key, right);
                    }
                }
                let base_map =
                    SMap::load(loader, &base_data).map_err(|_| ErrorCode::ReadFailed)?;
                let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = base_map
                    .scan()
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| ErrorCode::ReadFailed)?;
                for (key, change) in changes {
                    match change {
                        Some(value) => {
                            merged.insert(key, value);
                        }
                        None => {
                            merged.remove(&key);
                        }
                    }
                }
                let keys: Vec<Vec<u8>> = merged.keys().cloned().collect();
                let vals: Vec<Vec<u8>> = merged.values().cloned().collect();
                Ok(Value::map(&keys, &vals))
            }
            UType::Set => {
                let base_keys = scan_set(loader, &base_data)?;
                let keys1 = scan_set(loader, &data1)?;
                let keys2 = scan_set(loader, &data2)?;
                let mut merged = base_keys.clone();
                for side in [&keys1, &keys2] {
                    for added in side.difference(&base_keys) {
                        merged.insert(added.clone());
                    }
                }
                for side in [&keys1, &keys2] {
                    for removed in base_keys.difference(side) {
                        merged.remove(removed);
                    }
                }
                let keys: Vec<Vec<u8>> = merged.into_iter().collect();
                Ok(Value::set(&keys))
            }
            UType::Bool | UType::Num => Err(ErrorCode::TypeUnsupported),
        }
    }

    /// Rebuilds a fresh-build [`Value`] with the content of a cell.
    fn value_of(&self, cell: &UCell) -> Result<Value> {
        Ok(match self.read_value(cell)? {
            crate::TypedValue::String(data) => Value::string(&data),
            crate::TypedValue::Blob(data) => Value::blob(&data),
            crate::TypedValue::List(values) => Value::list(&values),
            crate::TypedValue::Map(entries) => {
                let keys: Vec<Vec<u8>> = entries.iter().map(|(k, _)| k.clone()).collect();
                let vals: Vec<Vec<u8>> = entries.iter().map(|(_, v)| v.clone()).collect();
                Value::map(&keys, &vals)
            }
            crate::TypedValue::Set(keys) => Value::set(&keys),
        })
    }
}

fn scan_set(loader: &ChunkLoader, root: &Hash) -> Result<BTreeSet<Vec<u8>>> {
    let set = SSet::load(loader, root).map_err(|_| ErrorCode::ReadFailed)?;
    set.scan().collect::<std::result::Result<_, _>>().map_err(|_| ErrorCode::ReadFailed)
}

/// Walks the parent DAG from `descendant` looking for `ancestor`.
pub(crate) fn is_ancestor(
    loader: &ChunkLoader,
    ancestor: &Hash,
    descendant: &Hash,
) -> Result<bool> {
    let mut queue = VecDeque::from([*descendant]);
    let mut visited = HashSet::new();
    while let Some(ver) = queue.pop_front() {
        if ver == *ancestor {
            return Ok(true);
        }
        if ver.is_null() || !visited.insert(ver) {
            continue;
        }
        let cell = UCell::load(loader, &ver).map_err(|_| ErrorCode::UCellNotFound)?;
        queue.push_back(cell.pre_hash(false));
        if cell.merged() {
            queue.push_back(cell.pre_hash(true));
        }
    }
    Ok(false)
}

/// Alternating breadth-first search from both versions; the first version
/// reached from both sides is the lowest common ancestor.
pub(crate) fn lowest_common_ancestor(
    loader: &ChunkLoader,
    ver1: &Hash,
    ver2: &Hash,
) -> Result<Option<Hash>> {
    let mut queue1 = VecDeque::from([*ver1]);
    let mut queue2 = VecDeque::from([*ver2]);
    let mut seen1: HashSet<Hash> = HashSet::new();
    let mut seen2: HashSet<Hash> = HashSet::new();
    while !queue1.is_empty() || !queue2.is_empty() {
        if let Some(found) = expand(loader, &mut queue1, &mut seen1, &seen2)? {
            return Ok(Some(found));
        }
        if let Some(found) = expand(loader, &mut queue2, &mut seen2, &seen1)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn expand(
    loader: &ChunkLoader,
    queue: &mut VecDeque<Hash>,
    seen: &mut HashSet<Hash>,
    other: &HashSet<Hash>,
) -> Result<Option<Hash>> {
    if let Some(ver) = queue.pop_front() {
        if ver.is_null() || !seen.insert(ver) {
            return Ok(None);
        }
        if other.contains(&ver) {
            return Ok(Some(ver));
        }
        let cell = UCell::load(loader, &ver).map_err(|_| ErrorCode::UCellNotFound)?;
        queue.push_back(cell.pre_hash(false));
        if cell.merged() {
            queue.push_back(cell.pre_hash(true));
        }
    }
    Ok(None)
}
