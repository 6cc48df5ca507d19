//! Head-version index over an embedded sorted key-value store.
//!
//! Branch heads live in [`DBCol::BranchHead`] keyed
//! `[key_len u16 LE][key][branch]`; the length prefix keeps keys that are
//! prefixes of each other apart. Latest sets live in
//! [`DBCol::LatestVersion`] keyed `[key_len u16 LE][key]`, encoded as the
//! concatenation of 20-byte version hashes.

use crate::head_version::HeadVersion;
use std::sync::Arc;
use ustore_primitives::Hash;
use ustore_primitives::hash::HASH_BYTE_LEN;
use ustore_store::db::{DBCol, Database};

pub struct KvHeadVersion {
    db: Arc<dyn Database>,
}

fn key_prefix(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + key.len());
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(key);
    out
}

fn branch_key(key: &[u8], branch: &[u8]) -> Vec<u8> {
    let mut out = key_prefix(key);
    out.extend_from_slice(branch);
    out
}

fn decode_latest(blob: &[u8]) -> Vec<Hash> {
    blob.chunks_exact(HASH_BYTE_LEN)
        .map(|raw| Hash::from_slice(raw).expect("fixed-width chunk"))
        .collect()
}

fn encode_latest(versions: &[Hash]) -> Vec<u8> {
    let mut out = Vec::with_capacity(versions.len() * HASH_BYTE_LEN);
    for ver in versions {
        out.extend_from_slice(ver.as_bytes());
    }
    out
}

impl KvHeadVersion {
    pub fn new(db: Arc<dyn Database>) -> KvHeadVersion {
        KvHeadVersion { db }
    }

    fn read_latest(&self, key: &[u8]) -> Vec<Hash> {
        match self.db.get(DBCol::LatestVersion, &key_prefix(key)) {
            Ok(Some(blob)) => decode_latest(&blob),
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::error!(target: "worker", %err, "latest-version read failed");
                Vec::new()
            }
        }
    }
}

impl HeadVersion for KvHeadVersion {
    fn get_branch(&self, key: &[u8], branch: &[u8]) -> Option<Hash> {
        match self.db.get(DBCol::BranchHead, &branch_key(key, branch)) {
            Ok(Some(raw)) => Hash::from_slice(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::error!(target: "worker", %err, "branch-head read failed");
                None
            }
        }
    }

    fn get_latest(&self, key: &[u8]) -> Vec<Hash> {
        self.read_latest(key)
    }

    fn put_branch(&self, key: &[u8], branch: &[u8], ver: &Hash) {
        if let Err(err) =
            self.db.set(DBCol::BranchHead, &branch_key(key, branch), ver.as_bytes())
        {
            tracing::error!(target: "worker", %err, "branch-head write failed");
        }
    }

    fn put_latest(&self, key: &[u8], pre1: &Hash, pre2: &Hash, ver: &Hash) {
        let mut latest = self.read_latest(key);
        latest.retain(|v| v != pre1 && v != pre2);
        if !latest.contains(ver) {
            latest.push(*ver);
        }
        if let Err(err) =
            self.db.set(DBCol::LatestVersion, &key_prefix(key), &encode_latest(&latest))
        {
            tracing::error!(target: "worker", %err, "latest-version write failed");
        }
    }

    fn remove_branch(&self, key: &[u8], branch: &[u8]) {
        if let Err(err) = self.db.delete(DBCol::BranchHead, &branch_key(key, branch)) {
            tracing::error!(target: "worker", %err, "branch-head delete failed");
        }
    }

    fn rename_branch(&self, key: &[u8], old: &[u8], new: &[u8]) {
        if let Some(ver) = self.get_branch(key, old) {
            self.put_branch(key, new, &ver);
            self.remove_branch(key, old);
        }
    }

    fn exists(&self, key: &[u8]) -> bool {
        !self.read_latest(key).is_empty()
    }

    fn exists_branch(&self, key: &[u8], branch: &[u8]) -> bool {
        self.get_branch(key, branch).is_some()
    }

    fn is_latest(&self, key: &[u8], ver: &Hash) -> bool {
        self.read_latest(key).contains(ver)
    }

    fn is_branch_head(&self, key: &[u8], branch: &[u8], ver: &Hash) -> bool {
        self.get_branch(key, branch).is_some_and(|head| head == *ver)
    }

    fn list_keys(&self) -> Vec<Vec<u8>> {
        match self.db.iter_prefix(DBCol::LatestVersion, &[]) {
            Ok(rows) => rows
                .into_iter()
                .filter(|(_, blob)| !blob.is_empty())
                .map(|(raw, _)| raw[2..].to_vec())
                .collect(),
            Err(err) => {
                tracing::error!(target: "worker", %err, "latest-version scan failed");
                Vec::new()
            }
        }
    }

    fn list_branches(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let prefix = key_prefix(key);
        match self.db.iter_prefix(DBCol::BranchHead, &prefix) {
            Ok(rows) => rows.into_iter().map(|(raw, _)| raw[prefix.len()..].to_vec()).collect(),
            Err(err) => {
                tracing::error!(target: "worker", %err, "branch-head scan failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ustore_store::db::TestDB;

    #[test]
    fn satisfies_the_head_version_suite() {
        let head = KvHeadVersion::new(Arc::new(TestDB::new()));
        crate::head_version::tests::exercise(&head);
    }

    #[test]
    fn length_prefix_separates_overlapping_keys() {
        let head = KvHeadVersion::new(Arc::new(TestDB::new()));
        let v = Hash::compute(b"v");
        // "ab" + branch "c" must not collide with key "abc" listings.
        head.put_branch(b"ab", b"c", &v);
        head.put_branch(b"abc", b"master", &v);
        assert_eq!(head.list_branches(b"ab"), vec![b"c".to_vec()]);
        assert_eq!(head.list_branches(b"abc"), vec![b"master".to_vec()]);
    }
}
