use crate::chunk::Chunk;
use crate::loader::ChunkLoader;
use crate::types::TypeError;
use ustore_primitives::{ChunkType, Hash};

/// Small inline string: the whole payload lives in one String chunk rather
/// than a tree. Strings are immutable; an update writes a new chunk.
pub struct SString {
    hash: Hash,
    data: Vec<u8>,
}

impl SString {
    pub fn create(loader: &ChunkLoader, data: &[u8]) -> Result<Hash, TypeError> {
        Ok(loader.write(Chunk::new(ChunkType::String, data))?)
    }

    pub fn load(loader: &ChunkLoader, hash: &Hash) -> Result<SString, TypeError> {
        let chunk = loader.get(hash)?;
        if chunk.chunk_type() != ChunkType::String {
            return Err(TypeError::TypeMismatch {
                expected: ChunkType::String,
                found: chunk.chunk_type(),
            });
        }
        Ok(SString { hash: *hash, data: chunk.payload().to_vec() })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }
}
