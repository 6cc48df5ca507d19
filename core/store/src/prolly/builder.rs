//! Incremental (re)chunker: turns an edit spec `{root, pos, dels, inserts}`
//! into a new root hash, rebuilding only the chunks along the edit path.
//!
//! One chunker runs per tree level. The leaf chunker consumes encoded
//! elements and seals a chunk whenever its rolling hash crosses a boundary;
//! each sealed chunk becomes a meta entry fed to the level-1 chunker, which
//! rolls its own hash over the serialized entries, and so on upward until a
//! level produces a single chunk — the new root.
//!
//! A splice opens a cursor at the edit position, primes every level with
//! the entries preceding the cursor within its node (chunks entirely left
//! of the edit are reused through their meta entries), streams the inserts,
//! then drains the suffix. While draining, as soon as a chunker is at a
//! chunk boundary exactly when the old tree is at a node boundary of the
//! same level, the remaining entries of the parent level are spliced
//! verbatim instead of being rechunked, which bounds an O(1) edit to
//! O(log n) chunk writes and preserves structural sharing.

use crate::loader::ChunkLoader;
use crate::chunk::Chunk;
use crate::prolly::cursor::{CursorError, NodeCursor};
use crate::prolly::node::{self, MetaEntry, NodeError, OrderedKey};
use crate::prolly::rolling::{RollingHasher, TreeParams};
use crate::store::StoreError;
use ustore_primitives::{ChunkType, Hash};

#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
    #[error("splice range [{pos}, {pos}+{dels}) out of range for {size} elements")]
    RangeOutOfBounds { pos: u64, dels: u64, size: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Cursor(#[from] CursorError),
}

struct LeafChunker {
    leaf_type: ChunkType,
    hasher: RollingHasher,
    buf: Vec<u8>,
    /// Number of encoded elements currently buffered.
    count: u64,
    /// Byte key of the last buffered element, for key-ordered trees.
    last_key: Vec<u8>,
    sealed: u64,
}

struct MetaChunker {
    hasher: RollingHasher,
    entries: Vec<MetaEntry>,
}

pub struct TreeBuilder<'a> {
    loader: &'a ChunkLoader,
    params: TreeParams,
    leaf: LeafChunker,
    /// `metas[i]` collects entries describing sealed chunks of level `i`
    /// (level 0 = leaves) and seals Meta chunks of level `i + 1`.
    metas: Vec<MetaChunker>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(loader: &'a ChunkLoader, params: TreeParams, leaf_type: ChunkType) -> TreeBuilder<'a> {
        TreeBuilder {
            loader,
            params,
            leaf: LeafChunker {
                leaf_type,
                hasher: RollingHasher::new(params),
                buf: Vec::new(),
                count: 0,
                last_key: Vec::new(),
                sealed: 0,
            },
            metas: Vec::new(),
        }
    }

    /// Builds a fresh tree from encoded elements.
    pub fn build(
        loader: &ChunkLoader,
        params: TreeParams,
        leaf_type: ChunkType,
        elements: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<Hash, BuilderError> {
        let mut builder = TreeBuilder::new(loader, params, leaf_type);
        for element in elements {
            builder.append_element(&element)?;
        }
        builder.finish()
    }

    /// Rewrites the tree rooted at `root`, replacing the element range
    /// `[pos, pos + dels)` with `inserts`. A null root builds from scratch
    /// (then `pos` and `dels` must be 0).
    pub fn splice(
        loader: &ChunkLoader,
        params: TreeParams,
        leaf_type: ChunkType,
        root: &Hash,
        pos: u64,
        dels: u64,
        inserts: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<Hash, BuilderError> {
        if root.is_null() {
            if pos != 0 || dels != 0 {
                return Err(BuilderError::RangeOutOfBounds { pos, dels, size: 0 });
            }
            return TreeBuilder::build(loader, params, leaf_type, inserts);
        }
        let left = NodeCursor::at_index(loader, root, pos).map_err(|err| match err {
            CursorError::IndexOutOfRange { size, .. } => {
                BuilderError::RangeOutOfBounds { pos, dels, size }
            }
            other => BuilderError::Cursor(other),
        })?;
        let size = left.total_elements();
        if pos + dels > size {
            return Err(BuilderError::RangeOutOfBounds { pos, dels, size });
        }

        let mut builder = TreeBuilder::new(loader, params, leaf_type);
        builder.prime(&left)?;
        for element in inserts {
            builder.append_element(&element)?;
        }
        let mut right = NodeCursor::at_index(loader, root, pos + dels)?;
        builder.drain_suffix(&mut right)?;
        builder.finish()
    }

    /// Blob-specific splice: the insert is a raw byte run rather than a
    /// sequence of encoded elements.
    pub fn splice_bytes(
        loader: &ChunkLoader,
        params: TreeParams,
        root: &Hash,
        pos: u64,
        dels: u64,
        insert: &[u8],
    ) -> Result<Hash, BuilderError> {
        if root.is_null() {
            if pos != 0 || dels != 0 {
                return Err(BuilderError::RangeOutOfBounds { pos, dels, size: 0 });
            }
            let mut builder = TreeBuilder::new(loader, params, ChunkType::Blob);
            builder.append_bytes(insert)?;
            return builder.finish();
        }
        let left = NodeCursor::at_index(loader, root, pos).map_err(|err| match err {
            CursorError::IndexOutOfRange { size, .. } => {
                BuilderError::RangeOutOfBounds { pos, dels, size }
            }
            other => BuilderError::Cursor(other),
        })?;
        let size = left.total_elements();
        if pos + dels > size {
            return Err(BuilderError::RangeOutOfBounds { pos, dels, size });
        }
        let mut builder = TreeBuilder::new(loader, params, ChunkType::Blob);
        builder.prime(&left)?;
        builder.append_bytes(insert)?;
        let mut right = NodeCursor::at_index(loader, root, pos + dels)?;
        builder.drain_suffix(&mut right)?;
        builder.finish()
    }

    /// Seeds every level with the entries preceding the cursor within its
    /// node. Processed top-down so that an (unexpected) seal at some level
    /// finds its parent already primed.
    fn prime(&mut self, cursor: &NodeCursor<'_>) -> Result<(), BuilderError> {
        let levels = cursor.num_levels();
        for level in (1..levels).rev() {
            for idx in 0..cursor.frame_idx_at(level) {
                self.push_meta(level - 1, cursor.meta_entry_at_index(level, idx))?;
            }
        }
        for idx in 0..cursor.index_in_leaf().max(0) as u64 {
            let element = cursor.leaf_element(idx);
            self.append_element(&element)?;
        }
        Ok(())
    }

    /// Appends one encoded element to the leaf level.
    pub fn append_element(&mut self, encoded: &[u8]) -> Result<(), BuilderError> {
        if matches!(self.leaf.leaf_type, ChunkType::Map | ChunkType::Set) {
            self.leaf.last_key = node::element_key(self.leaf.leaf_type, encoded)?.to_vec();
        }
        self.leaf.buf.extend_from_slice(encoded);
        self.leaf.count += 1;
        self.leaf.hasher.hash_bytes(encoded);
        if self.leaf.hasher.crossed_boundary() {
            self.seal_leaf()?;
        }
        Ok(())
    }

    /// Appends a run of raw bytes to a Blob tree (one element per byte).
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), BuilderError> {
        debug_assert_eq!(self.leaf.leaf_type, ChunkType::Blob);
        for &byte in bytes {
            self.leaf.buf.push(byte);
            self.leaf.count += 1;
            self.leaf.hasher.hash_byte(byte);
            if self.leaf.hasher.crossed_boundary() {
                self.seal_leaf()?;
            }
        }
        Ok(())
    }

    fn seal_leaf(&mut self) -> Result<(), BuilderError> {
        let payload = node::leaf_payload(self.leaf.leaf_type, self.leaf.count, &self.leaf.buf);
        let chunk = Chunk::new(self.leaf.leaf_type, &payload);
        let target = self.loader.write(chunk)?;
        let key = match self.leaf.leaf_type {
            ChunkType::Map | ChunkType::Set => {
                OrderedKey::Bytes(std::mem::take(&mut self.leaf.last_key))
            }
            _ => OrderedKey::Index(self.leaf.count),
        };
        let entry =
            MetaEntry { target, num_leaves: 1, num_elements: self.leaf.count, key };
        self.leaf.buf.clear();
        self.leaf.count = 0;
        self.leaf.hasher.reset();
        self.leaf.sealed += 1;
        self.push_meta(0, entry)
    }

    /// Feeds a meta entry describing a sealed chunk of `level` into the
    /// chunker assembling Meta nodes of `level + 1`.
    fn push_meta(&mut self, level: usize, entry: MetaEntry) -> Result<(), BuilderError> {
        while self.metas.len() <= level {
            self.metas.push(MetaChunker {
                hasher: RollingHasher::new(self.params),
                entries: Vec::new(),
            });
        }
        let chunker = &mut self.metas[level];
        chunker.hasher.hash_bytes(&entry.encoded());
        chunker.entries.push(entry);
        if chunker.hasher.crossed_boundary() {
            self.seal_meta(level)?;
        }
        Ok(())
    }

    fn seal_meta(&mut self, level: usize) -> Result<(), BuilderError> {
        let chunker = &mut self.metas[level];
        let entries = std::mem::take(&mut chunker.entries);
        chunker.hasher.reset();
        let payload = node::meta_payload(&entries);
        let chunk = Chunk::new(ChunkType::Meta, &payload);
        let target = self.loader.write(chunk)?;
        let num_leaves = entries.iter().map(|e| e.num_leaves).sum();
        let num_elements = entries.iter().map(|e| e.num_elements).sum::<u64>();
        let key = match entries.last().map(|e| &e.key) {
            Some(OrderedKey::Bytes(bytes)) => OrderedKey::Bytes(bytes.clone()),
            _ => OrderedKey::Index(num_elements),
        };
        let entry = MetaEntry { target, num_leaves, num_elements, key };
        self.push_meta(level + 1, entry)
    }

    /// Streams the remainder of the old tree, ascending a level whenever
    /// the chunker and the old tree hit a boundary together.
    fn drain_suffix(&mut self, right: &mut NodeCursor<'_>) -> Result<(), BuilderError> {
        // Leaf level: element by element until aligned on a node start. An
        // empty buffer means the rolling hasher is in its fresh-chunk state,
        // so from an old node start onward the remaining stream reproduces
        // the old chunking exactly.
        while right.valid_at(0) {
            if self.leaf.buf.is_empty() && right.at_node_start(0) && right.has_level(1) {
                break;
            }
            let element = right.current_bytes().expect("validated by valid_at").to_vec();
            self.append_element(&element)?;
            right.advance_at(0, true)?;
        }
        if !right.valid_at(0) {
            return Ok(());
        }
        // Meta levels: entries are spliced verbatim. Ascend further when
        // the receiving chunker is empty exactly on a node start.
        let mut level = 1;
        while right.has_level(level) && right.valid_at(level) {
            let aligned =
                self.metas.get(level - 1).is_none_or(|chunker| chunker.entries.is_empty());
            if aligned && right.at_node_start(level) && right.has_level(level + 1) {
                level += 1;
                continue;
            }
            let entry = right.meta_entry_at(level);
            self.push_meta(level - 1, entry)?;
            right.advance_at(level, true)?;
        }
        Ok(())
    }

    /// Seals everything still buffered and returns the new root hash.
    pub fn finish(mut self) -> Result<Hash, BuilderError> {
        // An empty leaf chunk is forced only for a genuinely empty tree;
        // a builder whose whole output was spliced in verbatim has nothing
        // buffered at the leaf level.
        let tree_is_empty =
            self.leaf.sealed == 0 && self.metas.iter().all(|chunker| chunker.entries.is_empty());
        if !self.leaf.buf.is_empty() || tree_is_empty {
            self.seal_leaf()?;
        }
        let mut level = 0;
        loop {
            let higher_pending =
                self.metas[level + 1..].iter().any(|chunker| !chunker.entries.is_empty());
            if !higher_pending && self.metas[level].entries.len() == 1 {
                return Ok(self.metas[level].entries[0].target);
            }
            if !self.metas[level].entries.is_empty() {
                self.seal_meta(level)?;
            }
            level += 1;
        }
    }
}

