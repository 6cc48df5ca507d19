//! Positional and keyed traversal into a tree.
//!
//! A cursor is a stack of `(node, index)` frames, one per tree level, with
//! the root at the bottom of the stack and the leaf frame on top. The leaf
//! index ranges over `[-1, n]`: `-1` is the begin sentinel, `n` the end
//! sentinel. A cursor borrows its loader; lifetimes are
//! cursor ⊆ loader ⊆ operation.

use crate::loader::ChunkLoader;
use crate::prolly::node::{MetaEntry, NodeError, OrderedKey, SeqNode};
use crate::store::StoreError;
use ustore_primitives::Hash;

#[derive(thiserror::Error, Debug)]
pub enum CursorError {
    #[error("index {idx} out of range for sequence of {size} elements")]
    IndexOutOfRange { idx: u64, size: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Node(#[from] NodeError),
}

struct Frame {
    node: SeqNode,
    idx: i64,
}

pub struct NodeCursor<'a> {
    loader: &'a ChunkLoader,
    /// Root first, leaf last. Frames below the level of the last structural
    /// move may be stale; only the leaf-level API keeps every frame fresh.
    frames: Vec<Frame>,
}

impl<'a> NodeCursor<'a> {
    /// Positions the cursor at element `idx`, descending by element-count
    /// summaries. `idx == num_elements` yields the end sentinel;
    /// `idx > num_elements` is an error.
    pub fn at_index(
        loader: &'a ChunkLoader,
        root: &Hash,
        idx: u64,
    ) -> Result<NodeCursor<'a>, CursorError> {
        let node = SeqNode::parse(loader.get(root)?)?;
        let size = node.num_elements();
        if idx > size {
            return Err(CursorError::IndexOutOfRange { idx, size });
        }
        let mut frames = Vec::new();
        let mut node = node;
        let mut remaining = idx;
        loop {
            match node {
                SeqNode::Meta(_) => {
                    let meta = node.as_meta();
                    let (child, rest) = if remaining == node.num_elements() {
                        let last = meta.entries().len() - 1;
                        (last, meta.entry(last).num_elements)
                    } else {
                        meta.child_by_index(remaining)
                    };
                    let target = meta.entry(child).target;
                    let child_node = SeqNode::parse(loader.get(&target)?)?;
                    frames.push(Frame { node, idx: child as i64 });
                    node = child_node;
                    remaining = rest;
                }
                SeqNode::Leaf(_) => {
                    frames.push(Frame { node, idx: remaining as i64 });
                    return Ok(NodeCursor { loader, frames });
                }
            }
        }
    }

    /// Positions the cursor at the first element whose key is `>=` the
    /// probe, descending by max-ordered-key summaries. Lands on the end
    /// sentinel when every key is smaller.
    pub fn at_key(
        loader: &'a ChunkLoader,
        root: &Hash,
        probe: &[u8],
    ) -> Result<NodeCursor<'a>, CursorError> {
        let ordered = OrderedKey::Bytes(probe.to_vec());
        let mut frames = Vec::new();
        let mut node = SeqNode::parse(loader.get(root)?)?;
        loop {
            match node {
                SeqNode::Meta(_) => {
                    let meta = node.as_meta();
                    let child = meta.child_by_key(&ordered);
                    let target = meta.entry(child).target;
                    let child_node = SeqNode::parse(loader.get(&target)?)?;
                    frames.push(Frame { node, idx: child as i64 });
                    node = child_node;
                }
                SeqNode::Leaf(_) => {
                    let idx = node.as_leaf().search_key(probe)?;
                    frames.push(Frame { node, idx: idx as i64 });
                    return Ok(NodeCursor { loader, frames });
                }
            }
        }
    }

    fn frame_pos(&self, level: usize) -> usize {
        self.frames.len() - 1 - level
    }

    fn leaf(&self) -> &Frame {
        self.frames.last().unwrap()
    }

    pub fn root_hash(&self) -> Hash {
        self.frames[0].node.hash()
    }

    pub fn total_elements(&self) -> u64 {
        self.frames[0].node.num_elements()
    }

    pub fn num_levels(&self) -> usize {
        self.frames.len()
    }

    pub fn is_end(&self) -> bool {
        let leaf = self.leaf();
        leaf.idx >= leaf.node.num_entries() as i64
    }

    pub fn is_begin(&self) -> bool {
        self.leaf().idx < 0
    }

    /// Encoded bytes of the pointed element, `None` on a sentinel.
    pub fn current_bytes(&self) -> Option<&[u8]> {
        let leaf = self.leaf();
        if leaf.idx < 0 || leaf.idx >= leaf.node.num_entries() as i64 {
            return None;
        }
        Some(leaf.node.as_leaf().element(leaf.idx as u64))
    }

    pub fn current_key(&self) -> Option<OrderedKey> {
        let leaf = self.leaf();
        if leaf.idx < 0 || leaf.idx >= leaf.node.num_entries() as i64 {
            return None;
        }
        leaf.node.as_leaf().key(leaf.idx as u64).ok()
    }

    pub fn index_in_leaf(&self) -> i64 {
        self.leaf().idx
    }

    pub fn leaf_num_entries(&self) -> u64 {
        self.leaf().node.num_entries()
    }

    pub fn leaf_hash(&self) -> Hash {
        self.leaf().node.hash()
    }

    /// Global element index of the cursor position; the begin sentinel maps
    /// to 0 and the end sentinel to `total_elements()`.
    pub fn global_index(&self) -> u64 {
        let mut total = 0u64;
        for frame in &self.frames[..self.frames.len() - 1] {
            total += frame.node.as_meta().elements_before(frame.idx as usize);
        }
        let leaf = self.leaf();
        if leaf.idx > 0 {
            total += leaf.idx as u64;
        }
        total
    }

    /// Single step forward. With `cross_boundary` the step continues into
    /// the next leaf node; without it the cursor parks on the end sentinel
    /// of the current node. Returns whether the cursor points at an element
    /// afterwards.
    pub fn advance(&mut self, cross_boundary: bool) -> Result<bool, CursorError> {
        self.advance_at(0, cross_boundary)
    }

    /// Single step backward, mirroring [`Self::advance`].
    pub fn retreat(&mut self, cross_boundary: bool) -> Result<bool, CursorError> {
        self.retreat_at(0, cross_boundary)
    }

    /// Advances up to `steps` elements using the per-level summaries,
    /// returning the number actually advanced.
    pub fn advance_steps(&mut self, steps: u64) -> Result<u64, CursorError> {
        let root = self.root_hash();
        let pos = self.global_index();
        let target = (pos + steps).min(self.total_elements());
        *self = NodeCursor::at_index(self.loader, &root, target)?;
        Ok(target - pos)
    }

    /// Retreats up to `steps` elements, returning the number actually
    /// retreated. Stops on element 0 rather than the begin sentinel.
    pub fn retreat_steps(&mut self, steps: u64) -> Result<u64, CursorError> {
        let root = self.root_hash();
        let pos = self.global_index();
        let target = pos.saturating_sub(steps);
        *self = NodeCursor::at_index(self.loader, &root, target)?;
        Ok(pos - target)
    }

    /// Whether the frame at `level` (0 = leaf) points at an entry.
    pub fn valid_at(&self, level: usize) -> bool {
        if level >= self.frames.len() {
            return false;
        }
        let frame = &self.frames[self.frame_pos(level)];
        frame.idx >= 0 && frame.idx < frame.node.num_entries() as i64
    }

    pub fn has_level(&self, level: usize) -> bool {
        level < self.frames.len()
    }

    pub fn at_node_start(&self, level: usize) -> bool {
        self.frames[self.frame_pos(level)].idx == 0
    }

    /// Meta entry the frame at `level >= 1` currently points at.
    pub fn meta_entry_at(&self, level: usize) -> MetaEntry {
        let frame = &self.frames[self.frame_pos(level)];
        frame.node.as_meta().entry(frame.idx as usize).clone()
    }

    /// Index of the entry the frame at `level` points at, clamped to 0.
    pub fn frame_idx_at(&self, level: usize) -> u64 {
        self.frames[self.frame_pos(level)].idx.max(0) as u64
    }

    /// Meta entry `idx` of the node at `level >= 1`.
    pub fn meta_entry_at_index(&self, level: usize, idx: u64) -> MetaEntry {
        let frame = &self.frames[self.frame_pos(level)];
        frame.node.as_meta().entry(idx as usize).clone()
    }

    /// Encoded element `idx` of the current leaf node.
    pub fn leaf_element(&self, idx: u64) -> Vec<u8> {
        self.leaf().node.as_leaf().element(idx).to_vec()
    }

    /// Raw payload of the current leaf node; for Blob leaves this is the
    /// byte run itself.
    pub fn leaf_payload(&self) -> &[u8] {
        self.leaf().node.as_leaf().payload()
    }

    /// Step the frame at `level` forward, crossing node boundaries through
    /// the parent chain. Frames *below* `level` are left stale; callers
    /// ascending through levels must not read them afterwards.
    pub fn advance_at(&mut self, level: usize, cross_boundary: bool) -> Result<bool, CursorError> {
        let pos = self.frame_pos(level);
        let entries = self.frames[pos].node.num_entries() as i64;
        if self.frames[pos].idx + 1 < entries {
            self.frames[pos].idx += 1;
            return Ok(true);
        }
        if !cross_boundary || level + 1 >= self.frames.len() {
            self.frames[pos].idx = entries;
            return Ok(false);
        }
        if !self.advance_at(level + 1, true)? {
            let pos = self.frame_pos(level);
            self.frames[pos].idx = entries;
            return Ok(false);
        }
        let parent = &self.frames[self.frame_pos(level + 1)];
        let target = parent.node.as_meta().entry(parent.idx as usize).target;
        let node = SeqNode::parse(self.loader.get(&target)?)?;
        let pos = self.frame_pos(level);
        self.frames[pos] = Frame { node, idx: 0 };
        Ok(true)
    }

    fn retreat_at(&mut self, level: usize, cross_boundary: bool) -> Result<bool, CursorError> {
        let pos = self.frame_pos(level);
        if self.frames[pos].idx > 0 {
            self.frames[pos].idx -= 1;
            return Ok(true);
        }
        if !cross_boundary || level + 1 >= self.frames.len() {
            self.frames[pos].idx = -1;
            return Ok(false);
        }
        if !self.retreat_at(level + 1, true)? {
            let pos = self.frame_pos(level);
            self.frames[pos].idx = -1;
            return Ok(false);
        }
        let parent = &self.frames[self.frame_pos(level + 1)];
        let target = parent.node.as_meta().entry(parent.idx as usize).target;
        let node = SeqNode::parse(self.loader.get(&target)?)?;
        let idx = node.num_entries() as i64 - 1;
        let pos = self.frame_pos(level);
        self.frames[pos] = Frame { node, idx };
        Ok(true)
    }
}
