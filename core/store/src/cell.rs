//! UCell: the version-metadata chunk. Each UCell links a value's data root
//! to up to two parent UCells, forming the per-key history DAG. The version
//! of a UCell is the hash of its chunk.

use crate::chunk::Chunk;
use crate::loader::ChunkLoader;
use crate::store::StoreError;
use ustore_primitives::{ChunkType, Hash, UType};

/// `flags` bit marking a merge cell (two non-null parents).
const FLAG_MERGED: u8 = 1;

/// Payload layout:
/// `[type u8][flags u8][pre1 20][pre2 20][data 20][key_len u16 LE][key][ctx]`.
const PRE1_OFFSET: usize = 2;
const PRE2_OFFSET: usize = 22;
const DATA_OFFSET: usize = 42;
const KEY_LEN_OFFSET: usize = 62;
const KEY_OFFSET: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum CellError {
    #[error("chunk {0} is not a cell chunk")]
    NotACell(Hash),
    #[error("truncated cell payload")]
    Truncated,
    #[error("unknown value type byte {0}")]
    UnknownType(u8),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Immutable, lazily decoded view over a Cell chunk.
#[derive(Clone)]
pub struct UCell {
    chunk: std::sync::Arc<Chunk>,
    key_len: usize,
}

impl UCell {
    /// Serializes a new cell and writes its chunk; the returned cell's
    /// hash is the new version. `pre2` must be [`Hash::NULL`] for ordinary
    /// writes; a non-null `pre2` marks the cell as merged.
    pub fn create(
        loader: &ChunkLoader,
        utype: UType,
        data: &Hash,
        pre1: &Hash,
        pre2: &Hash,
        key: &[u8],
        ctx: &[u8],
    ) -> Result<UCell, CellError> {
        let mut payload = Vec::with_capacity(KEY_OFFSET + key.len() + ctx.len());
        payload.push(utype as u8);
        payload.push(if pre2.is_null() { 0 } else { FLAG_MERGED });
        payload.extend_from_slice(pre1.as_bytes());
        payload.extend_from_slice(pre2.as_bytes());
        payload.extend_from_slice(data.as_bytes());
        payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
        payload.extend_from_slice(key);
        payload.extend_from_slice(ctx);
        let chunk = Chunk::new(ChunkType::Cell, &payload);
        loader.write(chunk.clone())?;
        Ok(UCell { chunk: std::sync::Arc::new(chunk), key_len: key.len() })
    }

    /// Loads the cell whose chunk hash is `version`.
    pub fn load(loader: &ChunkLoader, version: &Hash) -> Result<UCell, CellError> {
        let chunk = loader.get(version)?;
        UCell::from_chunk(chunk)
    }

    pub fn from_chunk(chunk: std::sync::Arc<Chunk>) -> Result<UCell, CellError> {
        if chunk.chunk_type() != ChunkType::Cell {
            return Err(CellError::NotACell(chunk.hash()));
        }
        let payload = chunk.payload();
        if payload.len() < KEY_OFFSET {
            return Err(CellError::Truncated);
        }
        if UType::from_u8(payload[0]).is_none() {
            return Err(CellError::UnknownType(payload[0]));
        }
        let key_len =
            u16::from_le_bytes([payload[KEY_LEN_OFFSET], payload[KEY_LEN_OFFSET + 1]]) as usize;
        if payload.len() < KEY_OFFSET + key_len {
            return Err(CellError::Truncated);
        }
        Ok(UCell { chunk, key_len })
    }

    /// The version this cell denotes.
    pub fn hash(&self) -> Hash {
        self.chunk.hash()
    }

    pub fn utype(&self) -> UType {
        UType::from_u8(self.chunk.payload()[0]).expect("validated in from_chunk")
    }

    pub fn merged(&self) -> bool {
        self.chunk.payload()[1] & FLAG_MERGED != 0
    }

    /// First parent, or the second when `second` is set.
    pub fn pre_hash(&self, second: bool) -> Hash {
        let offset = if second { PRE2_OFFSET } else { PRE1_OFFSET };
        Hash::from_slice(&self.chunk.payload()[offset..offset + 20])
            .expect("fixed-width slice")
    }

    pub fn data_hash(&self) -> Hash {
        Hash::from_slice(&self.chunk.payload()[DATA_OFFSET..DATA_OFFSET + 20])
            .expect("fixed-width slice")
    }

    pub fn key(&self) -> &[u8] {
        &self.chunk.payload()[KEY_OFFSET..KEY_OFFSET + self.key_len]
    }

    pub fn ctx(&self) -> &[u8] {
        &self.chunk.payload()[KEY_OFFSET + self.key_len..]
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}

impl std::fmt::Debug for UCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UCell")
            .field("hash", &self.hash())
            .field("type", &self.utype())
            .field("merged", &self.merged())
            .field("data", &self.data_hash())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChunkStore;
    use std::sync::Arc;

    fn loader() -> ChunkLoader {
        ChunkLoader::new(Arc::new(MemoryChunkStore::new()))
    }

    #[test]
    fn create_and_load_round_trip() {
        let loader = loader();
        let data = Hash::compute(b"data root");
        let pre1 = Hash::compute(b"parent");
        let cell = UCell::create(
            &loader,
            UType::String,
            &data,
            &pre1,
            &Hash::NULL,
            b"k1",
            b"",
        )
        .unwrap();
        assert!(!cell.merged());
        let loaded = UCell::load(&loader, &cell.hash()).unwrap();
        assert_eq!(loaded.utype(), UType::String);
        assert_eq!(loaded.data_hash(), data);
        assert_eq!(loaded.pre_hash(false), pre1);
        assert_eq!(loaded.pre_hash(true), Hash::NULL);
        assert_eq!(loaded.key(), b"k1");
        assert_eq!(loaded.hash(), cell.hash());
    }

    #[test]
    fn merged_flag_follows_second_parent() {
        let loader = loader();
        let cell = UCell::create(
            &loader,
            UType::Map,
            &Hash::compute(b"d"),
            &Hash::compute(b"p1"),
            &Hash::compute(b"p2"),
            b"key",
            b"ctx",
        )
        .unwrap();
        assert!(cell.merged());
        assert_eq!(cell.ctx(), b"ctx");
    }

    #[test]
    fn versions_differ_with_any_field() {
        let loader = loader();
        let data = Hash::compute(b"d");
        let a = UCell::create(&loader, UType::Blob, &data, &Hash::NULL, &Hash::NULL, b"k", b"")
            .unwrap();
        let b = UCell::create(&loader, UType::Blob, &data, &a.hash(), &Hash::NULL, b"k", b"")
            .unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn non_cell_chunks_are_rejected() {
        let loader = loader();
        let hash = loader.write(Chunk::new(ChunkType::Blob, b"bytes")).unwrap();
        assert!(matches!(UCell::load(&loader, &hash), Err(CellError::NotACell(_))));
    }
}
