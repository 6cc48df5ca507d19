use crate::loader::ChunkLoader;
use crate::prolly::builder::TreeBuilder;
use crate::prolly::cursor::NodeCursor;
use crate::prolly::node::{self, SeqNode};
use crate::prolly::rolling::TreeParams;
use crate::types::{TypeError, check_root};
use std::collections::BTreeMap;
use ustore_primitives::{ChunkType, Hash};

/// Key-ordered map of byte strings.
///
/// Entries are sorted by key bytes lexicographically; lookups descend by
/// the max-ordered-key summaries in O(log n).
pub struct SMap<'a> {
    loader: &'a ChunkLoader,
    root: Hash,
    size: u64,
}

impl<'a> SMap<'a> {
    /// Builds a fresh map. Duplicate keys are allowed in the input; the
    /// later entry wins, applied in input order.
    pub fn create(
        loader: &ChunkLoader,
        params: TreeParams,
        keys: &[Vec<u8>],
        vals: &[Vec<u8>],
    ) -> Result<Hash, TypeError> {
        if keys.len() != vals.len() {
            return Err(TypeError::KeyValueMismatch { keys: keys.len(), vals: vals.len() });
        }
        let mut sorted = BTreeMap::new();
        for (key, value) in keys.iter().zip(vals) {
            sorted.insert(key.clone(), value.clone());
        }
        let elements: Vec<Vec<u8>> = sorted
            .iter()
            .map(|(key, value)| {
                let mut out = Vec::new();
                node::encode_map_entry(key, value, &mut out);
                out
            })
            .collect();
        Ok(TreeBuilder::build(loader, params, ChunkType::Map, elements)?)
    }

    pub fn load(loader: &'a ChunkLoader, root: &Hash) -> Result<SMap<'a>, TypeError> {
        let chunk = loader.get(root)?;
        check_root(chunk.chunk_type(), ChunkType::Map)?;
        let node = SeqNode::parse(chunk)?;
        Ok(SMap { loader, root: *root, size: node.num_elements() })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TypeError> {
        let cursor = NodeCursor::at_key(self.loader, &self.root, key)?;
        match cursor.current_bytes() {
            Some(encoded) => {
                let (found, value) = node::decode_map_entry(encoded)?;
                Ok((found == key).then(|| value.to_vec()))
            }
            None => Ok(None),
        }
    }

    /// Inserts or updates one entry, returning the new root.
    pub fn set(&self, params: TreeParams, key: &[u8], value: &[u8]) -> Result<Hash, TypeError> {
        let (pos, exists) = self.locate(key)?;
        let mut encoded = Vec::new();
        node::encode_map_entry(key, value, &mut encoded);
        Ok(TreeBuilder::splice(
            self.loader,
            params,
            ChunkType::Map,
            &self.root,
            pos,
            u64::from(exists),
            vec![encoded],
        )?)
    }

    /// Removes one entry. Removing an absent key returns the unchanged
    /// root.
    pub fn remove(&self, params: TreeParams, key: &[u8]) -> Result<Hash, TypeError> {
        let (pos, exists) = self.locate(key)?;
        if !exists {
            return Ok(self.root);
        }
        Ok(TreeBuilder::splice(
            self.loader,
            params,
            ChunkType::Map,
            &self.root,
            pos,
            1,
            vec![],
        )?)
    }

    /// Applies updates pairwise in input order; the later value for a
    /// repeated key wins.
    pub fn set_many(
        &self,
        params: TreeParams,
        keys: &[Vec<u8>],
        vals: &[Vec<u8>],
    ) -> Result<Hash, TypeError> {
        if keys.len() != vals.len() {
            return Err(TypeError::KeyValueMismatch { keys: keys.len(), vals: vals.len() });
        }
        let mut root = self.root;
        for (key, value) in keys.iter().zip(vals) {
            let map = SMap::load(self.loader, &root)?;
            root = map.set(params, key, value)?;
        }
        Ok(root)
    }

    /// Ordered scan over all entries.
    pub fn scan(&self) -> MapIter<'a, '_> {
        MapIter { map: self, cursor: None }
    }

    /// Position of `key` in the entry order and whether it is present.
    fn locate(&self, key: &[u8]) -> Result<(u64, bool), TypeError> {
        let cursor = NodeCursor::at_key(self.loader, &self.root, key)?;
        let pos = cursor.global_index();
        let exists = match cursor.current_bytes() {
            Some(encoded) => node::decode_map_entry(encoded)?.0 == key,
            None => false,
        };
        Ok((pos, exists))
    }
}

pub struct MapIter<'a, 'b> {
    map: &'b SMap<'a>,
    cursor: Option<NodeCursor<'a>>,
}

impl Iterator for MapIter<'_, '_> {
    type Item = Result<(Vec<u8>, Vec<u8>), TypeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_none() {
            match NodeCursor::at_index(self.map.loader, &self.map.root, 0) {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(err) => return Some(Err(err.into())),
            }
        }
        let cursor = self.cursor.as_mut().unwrap();
        let encoded = cursor.current_bytes()?.to_vec();
        if let Err(err) = cursor.advance(true) {
            return Some(Err(err.into()));
        }
        Some(
            node::decode_map_entry(&encoded)
                .map(|(key, value)| (key.to_vec(), value.to_vec()))
                .map_err(Into::into),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prolly::rolling::test_params;
    use crate::store::MemoryChunkStore;
    use std::sync::Arc;

    const KEYS: [&str; 9] =
        ["The", "brown", "dog", "fox", "jumps", "lazy", "over", "quick", "the"];

    fn pairs() -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let keys: Vec<Vec<u8>> = KEYS.iter().map(|k| k.as_bytes().to_vec()).collect();
        let vals: Vec<Vec<u8>> =
            KEYS.iter().map(|k| format!("v_{k}").into_bytes()).collect();
        (keys, vals)
    }

    fn loader() -> ChunkLoader {
        ChunkLoader::new(Arc::new(MemoryChunkStore::new()))
    }

    #[test]
    fn create_get_scan() {
        let loader = loader();
        let (keys, vals) = pairs();
        let root = SMap::create(&loader, test_params(), &keys, &vals).unwrap();
        let map = SMap::load(&loader, &root).unwrap();
        assert_eq!(map.size(), 9);
        assert_eq!(map.get(b"fox").unwrap(), Some(b"v_fox".to_vec()));
        assert_eq!(map.get(b"cat").unwrap(), None);
        let scanned: Vec<(Vec<u8>, Vec<u8>)> = map.scan().map(Result::unwrap).collect();
        let scanned_keys: Vec<Vec<u8>> = scanned.iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(scanned_keys, sorted);
    }

    #[test]
    fn set_insert_scan_remove() {
        let loader = loader();
        let (keys, vals) = pairs();
        let root = SMap::create(&loader, test_params(), &keys, &vals).unwrap();
        let map = SMap::load(&loader, &root).unwrap();

        let root2 = map.set(test_params(), b"Z", b"v_z").unwrap();
        let map2 = SMap::load(&loader, &root2).unwrap();
        assert_eq!(map2.size(), 10);
        let scanned: Vec<Vec<u8>> = map2.scan().map(|e| e.unwrap().0).collect();
        // "Z" sorts after "The" and before the lowercase words.
        assert_eq!(scanned[0], b"The".to_vec());
        assert_eq!(scanned[1], b"Z".to_vec());
        assert_eq!(map2.get(b"Z").unwrap(), Some(b"v_z".to_vec()));

        let root3 = map2.remove(test_params(), b"Z").unwrap();
        let map3 = SMap::load(&loader, &root3).unwrap();
        assert_eq!(map3.size(), 9);
        assert_eq!(map3.get(b"Z").unwrap(), None);
        assert_eq!(root3, root);

        // Removing an absent key changes nothing.
        assert_eq!(map3.remove(test_params(), b"nope").unwrap(), root3);
    }

    #[test]
    fn set_updates_existing_key() {
        let loader = loader();
        let (keys, vals) = pairs();
        let root = SMap::create(&loader, test_params(), &keys, &vals).unwrap();
        let map = SMap::load(&loader, &root).unwrap();
        let root2 = map.set(test_params(), b"fox", b"renard").unwrap();
        let map2 = SMap::load(&loader, &root2).unwrap();
        assert_eq!(map2.size(), 9);
        assert_eq!(map2.get(b"fox").unwrap(), Some(b"renard".to_vec()));
    }

    #[test]
    fn later_duplicate_wins() {
        let loader = loader();
        let keys = vec![b"dup".to_vec(), b"other".to_vec(), b"dup".to_vec()];
        let vals = vec![b"first".to_vec(), b"x".to_vec(), b"second".to_vec()];
        let root = SMap::create(&loader, test_params(), &keys, &vals).unwrap();
        let map = SMap::load(&loader, &root).unwrap();
        assert_eq!(map.size(), 2);
        assert_eq!(map.get(b"dup").unwrap(), Some(b"second".to_vec()));

        // Same rule for set_many on an existing map.
        let root2 = map
            .set_many(
                test_params(),
                &[b"k".to_vec(), b"k".to_vec()],
                &[b"a".to_vec(), b"b".to_vec()],
            )
            .unwrap();
        let map2 = SMap::load(&loader, &root2).unwrap();
        assert_eq!(map2.get(b"k").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn large_map_lookups() {
        let loader = loader();
        let keys: Vec<Vec<u8>> = (0..2000).map(|i| format!("key-{i:05}").into_bytes()).collect();
        let vals: Vec<Vec<u8>> = (0..2000).map(|i| format!("val-{i}").into_bytes()).collect();
        let root = SMap::create(&loader, test_params(), &keys, &vals).unwrap();
        let map = SMap::load(&loader, &root).unwrap();
        assert_eq!(map.size(), 2000);
        assert_eq!(map.get(b"key-00000").unwrap(), Some(b"val-0".to_vec()));
        assert_eq!(map.get(b"key-01999").unwrap(), Some(b"val-1999".to_vec()));
        assert_eq!(map.get(b"key-01000").unwrap(), Some(b"val-1000".to_vec()));
        assert_eq!(map.get(b"key-99999").unwrap(), None);
    }
}
