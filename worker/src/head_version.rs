//! The head-version index: which version is the head of branch B of key K,
//! and which versions of K are tips of the history DAG.

use borsh::{BorshDeserialize, BorshSerialize};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;
use ustore_primitives::Hash;

/// Authoritative table of branch heads and latest-version sets.
///
/// Invariants:
/// - `latest(k)` is exactly the set of versions of `k` not referenced as a
///   parent by any other version of `k`;
/// - on `put_latest(k, pre1, pre2, v)` the parents leave the set and `v`
///   enters it.
///
/// Implementations are internally synchronized for readers; the worker
/// serializes writers per key.
pub trait HeadVersion: Send + Sync {
    fn get_branch(&self, key: &[u8], branch: &[u8]) -> Option<Hash>;
    fn get_latest(&self, key: &[u8]) -> Vec<Hash>;
    fn put_branch(&self, key: &[u8], branch: &[u8], ver: &Hash);
    fn put_latest(&self, key: &[u8], pre1: &Hash, pre2: &Hash, ver: &Hash);
    fn remove_branch(&self, key: &[u8], branch: &[u8]);
    fn rename_branch(&self, key: &[u8], old: &[u8], new: &[u8]);
    fn exists(&self, key: &[u8]) -> bool;
    fn exists_branch(&self, key: &[u8], branch: &[u8]) -> bool;
    fn is_latest(&self, key: &[u8], ver: &Hash) -> bool;
    fn is_branch_head(&self, key: &[u8], branch: &[u8], ver: &Hash) -> bool;
    fn list_keys(&self) -> Vec<Vec<u8>>;
    fn list_branches(&self, key: &[u8]) -> Vec<Vec<u8>>;
}

/// In-memory implementation over hash maps. Branches of a key are kept in
/// a `BTreeMap` so listings come out in name order.
#[derive(Default)]
pub struct InMemoryHeadVersion {
    branch_ver: RwLock<HashMap<Vec<u8>, BTreeMap<Vec<u8>, Hash>>>,
    latest_ver: RwLock<HashMap<Vec<u8>, HashSet<Hash>>>,
}

impl InMemoryHeadVersion {
    pub fn new() -> InMemoryHeadVersion {
        InMemoryHeadVersion::default()
    }
}

impl HeadVersion for InMemoryHeadVersion {
    fn get_branch(&self, key: &[u8], branch: &[u8]) -> Option<Hash> {
        self.branch_ver.read().get(key)?.get(branch).copied()
    }

    fn get_latest(&self, key: &[u8]) -> Vec<Hash> {
        self.latest_ver
            .read()
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn put_branch(&self, key: &[u8], branch: &[u8], ver: &Hash) {
        self.branch_ver
            .write()
            .entry(key.to_vec())
            .or_default()
            .insert(branch.to_vec(), *ver);
    }

    fn put_latest(&self, key: &[u8], pre1: &Hash, pre2: &Hash, ver: &Hash) {
        let mut latest = self.latest_ver.write();
        let set = latest.entry(key.to_vec()).or_default();
        if !pre1.is_null() {
            set.remove(pre1);
        }
        if !pre2.is_null() {
            set.remove(pre2);
        }
        set.insert(*ver);
    }

    fn remove_branch(&self, key: &[u8], branch: &[u8]) {
        let mut branches = self.branch_ver.write();
        if let Some(of_key) = branches.get_mut(key) {
            of_key.remove(branch);
            if of_key.is_empty() {
                branches.remove(key);
            }
        }
    }

    fn rename_branch(&self, key: &[u8], old: &[u8], new: &[u8]) {
        let mut branches = self.branch_ver.write();
        if let Some(of_key) = branches.get_mut(key) {
            if let Some(ver) = of_key.remove(old) {
                of_key.insert(new.to_vec(), ver);
            }
        }
    }

    fn exists(&self, key: &[u8]) -> bool {
        self.latest_ver.read().contains_key(key)
    }

    fn exists_branch(&self, key: &[u8], branch: &[u8]) -> bool {
        self.branch_ver.read().get(key).is_some_and(|of_key| of_key.contains_key(branch))
    }

    fn is_latest(&self, key: &[u8], ver: &Hash) -> bool {
        self.latest_ver.read().get(key).is_some_and(|set| set.contains(ver))
    }

    fn is_branch_head(&self, key: &[u8], branch: &[u8], ver: &Hash) -> bool {
        self.get_branch(key, branch).is_some_and(|head| head == *ver)
    }

    fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self.latest_ver.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn list_branches(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.branch_ver
            .read()
            .get(key)
            .map(|of_key| of_key.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, PartialEq, Eq)]
pub struct BranchVersion {
    pub branch: Vec<u8>,
    pub version: [u8; 20],
}

#[derive(BorshSerialize, BorshDeserialize, Debug, PartialEq, Eq)]
pub struct KeyVersion {
    pub key: Vec<u8>,
    pub branches: Vec<BranchVersion>,
}

/// Writes a full branch-head snapshot as length-prefixed borsh records.
/// [`load_head_version`] is the exact inverse.
pub fn dump_head_version(head: &dyn HeadVersion, path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    for key in head.list_keys() {
        let branches = head
            .list_branches(&key)
            .into_iter()
            .filter_map(|branch| {
                head.get_branch(&key, &branch)
                    .map(|ver| BranchVersion { branch, version: ver.0 })
            })
            .collect();
        let record = borsh::to_vec(&KeyVersion { key, branches })?;
        file.write_all(&(record.len() as u32).to_le_bytes())?;
        file.write_all(&record)?;
    }
    file.sync_data()
}

/// Loads a snapshot produced by [`dump_head_version`] into an index.
pub fn load_head_version(head: &dyn HeadVersion, path: &Path) -> std::io::Result<()> {
    let mut buf = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut buf)?;
    let mut pos = 0;
    while pos + 4 <= buf.len() {
        let len =
            u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        pos += 4;
        if pos + len > buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated head-version snapshot",
            ));
        }
        let record = KeyVersion::try_from_slice(&buf[pos..pos + len])?;
        pos += len;
        for entry in record.branches {
            head.put_branch(&record.key, &entry.branch, &Hash(entry.version));
        }
    }
    Ok(())
}
