//! Key-to-node mapping by sorted ranges of the key hash.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use ustore_primitives::Hash;

/// One partition range: keys hashing into this range belong to `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry {
    pub start: Hash,
    pub address: String,
}

/// Sorted range list routing keys to worker addresses.
///
/// For a key `k` the owner is the first range whose start hash is greater
/// than `Hash(k)`, wrapping around to range 0 when no such range exists.
/// The list is reloaded from its file on [`RangeRouter::refresh`], which
/// clients call after routing errors.
pub struct RangeRouter {
    ranges: RwLock<Vec<RangeEntry>>,
    path: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum RouteError {
    #[error("worker list file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("malformed worker list line: {0:?}")]
    BadLine(String),
    #[error("empty worker list")]
    Empty,
}

fn parse_worker_list(content: &str) -> Result<Vec<RangeEntry>, RouteError> {
    let mut ranges = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let entry = fields
            .next()
            .zip(fields.next())
            .and_then(|(start, address)| {
                Hash::from_base32(start)
                    .ok()
                    .map(|start| RangeEntry { start, address: address.to_string() })
            })
            .ok_or_else(|| RouteError::BadLine(line.to_string()))?;
        ranges.push(entry);
    }
    if ranges.is_empty() {
        return Err(RouteError::Empty);
    }
    ranges.sort_by(|a, b| a.start.cmp(&b.start));
    Ok(ranges)
}

impl RangeRouter {
    /// Loads ranges from a worker list file of `<start_hash_base32>
    /// <address>` lines.
    pub fn from_file(path: &Path) -> Result<RangeRouter, RouteError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| RouteError::Io(path.to_path_buf(), err))?;
        let ranges = parse_worker_list(&content)?;
        Ok(RangeRouter { ranges: RwLock::new(ranges), path: Some(path.to_path_buf()) })
    }

    pub fn from_entries(mut ranges: Vec<RangeEntry>) -> Result<RangeRouter, RouteError> {
        if ranges.is_empty() {
            return Err(RouteError::Empty);
        }
        ranges.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(RangeRouter { ranges: RwLock::new(ranges), path: None })
    }

    /// Worker address owning `key`.
    pub fn route(&self, key: &[u8]) -> String {
        let hash = Hash::compute(key);
        let ranges = self.ranges.read();
        let pos = ranges.partition_point(|entry| entry.start <= hash);
        let entry = ranges.get(pos).unwrap_or(&ranges[0]);
        entry.address.clone()
    }

    /// Re-reads the worker list file; called after routing errors.
    pub fn refresh(&self) -> Result<(), RouteError> {
        let Some(path) = &self.path else { return Ok(()) };
        let content = std::fs::read_to_string(path)
            .map_err(|err| RouteError::Io(path.clone(), err))?;
        *self.ranges.write() = parse_worker_list(&content)?;
        Ok(())
    }

    pub fn addresses(&self) -> Vec<String> {
        self.ranges.read().iter().map(|entry| entry.address.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hash_at(first_byte: u8) -> Hash {
        let mut raw = [0u8; 20];
        raw[0] = first_byte;
        Hash(raw)
    }

    fn router() -> RangeRouter {
        RangeRouter::from_entries(vec![
            RangeEntry { start: hash_at(0x40), address: "node-a".into() },
            RangeEntry { start: hash_at(0x80), address: "node-b".into() },
            RangeEntry { start: hash_at(0xc0), address: "node-c".into() },
        ])
        .unwrap()
    }

    #[test]
    fn routes_to_first_greater_range_with_wrap_around() {
        let router = router();
        // Find keys landing in distinct regions of the hash space.
        let mut seen = std::collections::HashSet::new();
        for i in 0..2000u32 {
            let key = format!("key-{i}");
            let hash = Hash::compute(key.as_bytes());
            let expect = if hash < hash_at(0x40) {
                "node-a"
            } else if hash < hash_at(0x80) {
                "node-b"
            } else if hash < hash_at(0xc0) {
                "node-c"
            } else {
                // Past the last start: wrap to range 0.
                "node-a"
            };
            assert_eq!(router.route(key.as_bytes()), expect, "key {key} hash {hash}");
            seen.insert(router.route(key.as_bytes()));
        }
        // With 2000 keys every region was exercised.
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn same_key_routes_stably() {
        let router = router();
        let first = router.route(b"stable-key");
        for _ in 0..10 {
            assert_eq!(router.route(b"stable-key"), first);
        }
    }

    #[test]
    fn file_round_trip_and_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.lst");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "# worker ranges").unwrap();
        writeln!(file, "{} node-1:9000", hash_at(0x80).to_base32()).unwrap();
        drop(file);

        let router = RangeRouter::from_file(&path).unwrap();
        assert_eq!(router.addresses(), vec!["node-1:9000".to_string()]);

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{} node-1:9000", hash_at(0x80).to_base32()).unwrap();
        writeln!(file, "{} node-2:9000", hash_at(0x40).to_base32()).unwrap();
        drop(file);
        router.refresh().unwrap();
        assert_eq!(router.addresses().len(), 2);

        assert!(RangeRouter::from_file(&dir.path().join("missing.lst")).is_err());
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert_matches::assert_matches!(
            parse_worker_list("not-a-hash node"),
            Err(RouteError::BadLine(_))
        );
        assert_matches::assert_matches!(parse_worker_list("\n\n"), Err(RouteError::Empty));
    }
}
