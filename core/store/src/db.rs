//! Minimal sorted key-value database interface used by the persistent
//! head-version index. The trait keeps the surface to what the index
//! needs: point reads/writes, deletes, and ordered prefix scans.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;

/// Columns of the database. The variant names double as RocksDB column
/// family names, so renaming one is a breaking change.
#[derive(PartialEq, Copy, Clone, Debug, Hash, Eq, strum::EnumIter, strum::IntoStaticStr)]
pub enum DBCol {
    /// Branch heads.
    /// - *Rows*: `[key_len u16 LE][key][branch]`
    /// - *Content type*: version hash (20 bytes)
    BranchHead,
    /// Latest-version sets.
    /// - *Rows*: `[key_len u16 LE][key]`
    /// - *Content type*: concatenated version hashes (n * 20 bytes)
    LatestVersion,
}

pub const NUM_COLS: usize = 2;

impl DBCol {
    fn idx(self) -> usize {
        match self {
            DBCol::BranchHead => 0,
            DBCol::LatestVersion => 1,
        }
    }
}

pub trait Database: Send + Sync {
    fn get(&self, col: DBCol, key: &[u8]) -> io::Result<Option<Vec<u8>>>;
    fn set(&self, col: DBCol, key: &[u8], value: &[u8]) -> io::Result<()>;
    fn delete(&self, col: DBCol, key: &[u8]) -> io::Result<()>;
    /// Entries whose key starts with `prefix`, in ascending key order.
    fn iter_prefix(&self, col: DBCol, prefix: &[u8]) -> io::Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory implementation over `BTreeMap`s, for tests and for
/// deployments that rely on the recovery log alone for persistence.
#[derive(Default)]
pub struct TestDB {
    cols: [RwLock<BTreeMap<Vec<u8>, Vec<u8>>>; NUM_COLS],
}

impl TestDB {
    pub fn new() -> TestDB {
        TestDB::default()
    }
}

impl Database for TestDB {
    fn get(&self, col: DBCol, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        Ok(self.cols[col.idx()].read().get(key).cloned())
    }

    fn set(&self, col: DBCol, key: &[u8], value: &[u8]) -> io::Result<()> {
        self.cols[col.idx()].write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, col: DBCol, key: &[u8]) -> io::Result<()> {
        self.cols[col.idx()].write().remove(key);
        Ok(())
    }

    fn iter_prefix(&self, col: DBCol, prefix: &[u8]) -> io::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.cols[col.idx()].read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(feature = "rocksdb")]
pub use self::rocksdb_impl::RocksDB;

#[cfg(feature = "rocksdb")]
mod rocksdb_impl {
    use super::{DBCol, Database};
    use rocksdb::{ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
    use std::io;
    use std::path::Path;
    use strum::IntoEnumIterator;

    /// RocksDB-backed database with one column family per [`DBCol`].
    pub struct RocksDB {
        db: DB,
    }

    fn io_err(err: rocksdb::Error) -> io::Error {
        io::Error::other(err)
    }

    impl RocksDB {
        pub fn open(path: &Path) -> io::Result<RocksDB> {
            let mut options = Options::default();
            options.create_if_missing(true);
            options.create_missing_column_families(true);
            let cfs = DBCol::iter()
                .map(|col| ColumnFamilyDescriptor::new(<&str>::from(col), Options::default()));
            let db = DB::open_cf_descriptors(&options, path, cfs).map_err(io_err)?;
            Ok(RocksDB { db })
        }

        fn cf(&self, col: DBCol) -> &rocksdb::ColumnFamily {
            // Column families are created in `open`.
            self.db.cf_handle(<&str>::from(col)).unwrap()
        }
    }

    impl Database for RocksDB {
        fn get(&self, col: DBCol, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
            self.db.get_cf(self.cf(col), key).map_err(io_err)
        }

        fn set(&self, col: DBCol, key: &[u8], value: &[u8]) -> io::Result<()> {
            self.db.put_cf(self.cf(col), key, value).map_err(io_err)
        }

        fn delete(&self, col: DBCol, key: &[u8]) -> io::Result<()> {
            self.db.delete_cf(self.cf(col), key).map_err(io_err)
        }

        fn iter_prefix(&self, col: DBCol, prefix: &[u8]) -> io::Result<Vec<(Vec<u8>, Vec<u8>)>> {
            let mode = IteratorMode::From(prefix, Direction::Forward);
            let mut out = Vec::new();
            for item in self.db.iterator_cf(self.cf(col), mode) {
                let (key, value) = item.map_err(io_err)?;
                if !key.starts_with(prefix) {
                    break;
                }
                out.push((key.into_vec(), value.into_vec()));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_point_ops() {
        let db = TestDB::new();
        db.set(DBCol::BranchHead, b"k1", b"v1").unwrap();
        assert_eq!(db.get(DBCol::BranchHead, b"k1").unwrap(), Some(b"v1".to_vec()));
        // Columns are independent.
        assert_eq!(db.get(DBCol::LatestVersion, b"k1").unwrap(), None);
        db.delete(DBCol::BranchHead, b"k1").unwrap();
        assert_eq!(db.get(DBCol::BranchHead, b"k1").unwrap(), None);
    }

    #[test]
    fn prefix_scan_is_ordered() {
        let db = TestDB::new();
        for key in [b"ab".as_slice(), b"aa", b"ac", b"b", b"a"] {
            db.set(DBCol::BranchHead, key, key).unwrap();
        }
        let hits = db.iter_prefix(DBCol::BranchHead, b"a").unwrap();
        let keys: Vec<&[u8]> = hits.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"aa", b"ab", b"ac"]);
    }
}
