use crate::chunk::Chunk;
use crate::metrics;
use crate::store::{ChunkStore, StoreError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use ustore_primitives::Hash;

/// Request-scoped cache mapping `Hash -> Chunk` in front of a [`ChunkStore`].
///
/// A loader is created per logical operation (Get, Put, Merge), populated
/// lazily and discarded with the operation. It amortizes repeated traversals
/// within one operation, e.g. a cursor walking back up its parent chain.
/// Deliberately `!Sync` (interior `RefCell`): loaders are never shared
/// across concurrent operations.
pub struct ChunkLoader {
    store: Arc<dyn ChunkStore>,
    cache: RefCell<HashMap<Hash, Arc<Chunk>>>,
}

impl ChunkLoader {
    pub fn new(store: Arc<dyn ChunkStore>) -> ChunkLoader {
        ChunkLoader { store, cache: RefCell::new(HashMap::new()) }
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Loads a chunk, hitting the cache first.
    pub fn get(&self, hash: &Hash) -> Result<Arc<Chunk>, StoreError> {
        if let Some(chunk) = self.cache.borrow().get(hash) {
            return Ok(chunk.clone());
        }
        let chunk = self.store.get(hash).ok_or(StoreError::ChunkNotFound(*hash))?;
        metrics::CHUNKS_LOADED.inc();
        self.cache.borrow_mut().insert(*hash, chunk.clone());
        Ok(chunk)
    }

    /// Writes a chunk through to the store and primes the cache, so freshly
    /// built nodes are readable without a store round-trip.
    pub fn write(&self, chunk: Chunk) -> Result<Hash, StoreError> {
        let hash = chunk.hash();
        self.store.put(&hash, chunk.clone())?;
        self.cache.borrow_mut().insert(hash, Arc::new(chunk));
        Ok(hash)
    }

    #[cfg(test)]
    pub(crate) fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;
    use assert_matches::assert_matches;
    use ustore_primitives::ChunkType;

    #[test]
    fn caches_loaded_chunks() {
        let store = Arc::new(MemoryChunkStore::new());
        let chunk = Chunk::new(ChunkType::Blob, b"cached");
        let hash = chunk.hash();
        store.put(&hash, chunk).unwrap();

        let loader = ChunkLoader::new(store);
        assert_eq!(loader.cached_len(), 0);
        let first = loader.get(&hash).unwrap();
        assert_eq!(loader.cached_len(), 1);
        let second = loader.get(&hash).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn write_primes_cache() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryChunkStore::new());
        let loader = ChunkLoader::new(store.clone());
        let hash = loader.write(Chunk::new(ChunkType::List, b"fresh")).unwrap();
        assert!(store.exists(&hash));
        assert_eq!(loader.get(&hash).unwrap().payload(), b"fresh");
    }

    #[test]
    fn missing_chunk_is_an_error() {
        let loader = ChunkLoader::new(Arc::new(MemoryChunkStore::new()));
        assert_matches!(loader.get(&Hash::NULL), Err(StoreError::ChunkNotFound(_)));
    }
}
