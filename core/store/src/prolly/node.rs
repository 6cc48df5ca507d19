//! Parsed views over Meta and leaf chunks, and the byte encodings shared by
//! the builder and the cursor.
//!
//! Encodings (all little-endian):
//! - Meta payload: `[entry_count u32][entries...]`; each entry
//!   `[entry_bytes u32][num_leaves u64][num_elements u64][target 20]
//!   [key_kind u8][key]` where the key is a `u64` subtree element count for
//!   index-ordered trees and raw bytes for key-ordered trees.
//! - Blob leaf payload: raw bytes, one element per byte.
//! - List leaf payload: `[count u32]` then `[len u32][bytes]` per element.
//! - Map leaf payload: `[count u32]` then `[key_len u16][key][val_len u32]
//!   [val]` per entry.
//! - Set leaf payload: `[count u32]` then `[key_len u16][key]` per entry.

use crate::chunk::Chunk;
use std::cmp::Ordering;
use std::sync::Arc;
use ustore_primitives::{ChunkType, Hash};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("truncated node payload")]
    Truncated,
    #[error("entry count {count} does not match payload")]
    CountMismatch { count: u32 },
    #[error("unexpected chunk type {0:?}")]
    UnexpectedChunkType(ChunkType),
    #[error("invalid ordered-key kind {0}")]
    BadKeyKind(u8),
}

/// Position of an entry within the total order of a tree.
///
/// Index-ordered trees (Blob, List) use element counts; key-ordered trees
/// (Map, Set) use the entry's byte key. A tree never mixes the two kinds,
/// so the cross-kind ordering (Index first) exists only to keep `Ord` total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderedKey {
    Index(u64),
    Bytes(Vec<u8>),
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &OrderedKey) -> Ordering {
        match (self, other) {
            (OrderedKey::Index(a), OrderedKey::Index(b)) => a.cmp(b),
            (OrderedKey::Bytes(a), OrderedKey::Bytes(b)) => a.cmp(b),
            (OrderedKey::Index(_), OrderedKey::Bytes(_)) => Ordering::Less,
            (OrderedKey::Bytes(_), OrderedKey::Index(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &OrderedKey) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

const KEY_KIND_BYTES: u8 = 0;
const KEY_KIND_INDEX: u8 = 1;

/// Summary of one child subtree inside a Meta node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaEntry {
    pub target: Hash,
    pub num_leaves: u64,
    pub num_elements: u64,
    pub key: OrderedKey,
}

impl MetaEntry {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let key_len = match &self.key {
            OrderedKey::Index(_) => 8,
            OrderedKey::Bytes(bytes) => bytes.len(),
        };
        let entry_bytes = (4 + 8 + 8 + 20 + 1 + key_len) as u32;
        out.extend_from_slice(&entry_bytes.to_le_bytes());
        out.extend_from_slice(&self.num_leaves.to_le_bytes());
        out.extend_from_slice(&self.num_elements.to_le_bytes());
        out.extend_from_slice(self.target.as_bytes());
        match &self.key {
            OrderedKey::Index(value) => {
                out.push(KEY_KIND_INDEX);
                out.extend_from_slice(&value.to_le_bytes());
            }
            OrderedKey::Bytes(bytes) => {
                out.push(KEY_KIND_BYTES);
                out.extend_from_slice(bytes);
            }
        }
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decodes one entry, returning it and the bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(MetaEntry, usize), NodeError> {
        let mut r = Reader::new(buf);
        let entry_bytes = r.read_u32()? as usize;
        if entry_bytes < 41 || entry_bytes > buf.len() {
            return Err(NodeError::Truncated);
        }
        let num_leaves = r.read_u64()?;
        let num_elements = r.read_u64()?;
        let target = Hash::from_slice(r.read_bytes(20)?).map_err(|_| NodeError::Truncated)?;
        let key_kind = r.read_u8()?;
        let key_bytes = r.read_bytes(entry_bytes - 41)?;
        let key = match key_kind {
            KEY_KIND_INDEX => {
                if key_bytes.len() != 8 {
                    return Err(NodeError::Truncated);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(key_bytes);
                OrderedKey::Index(u64::from_le_bytes(raw))
            }
            KEY_KIND_BYTES => OrderedKey::Bytes(key_bytes.to_vec()),
            kind => return Err(NodeError::BadKeyKind(kind)),
        };
        Ok((MetaEntry { target, num_leaves, num_elements, key }, entry_bytes))
    }
}

pub fn encode_list_element(value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

/// Value bytes of an encoded list element.
pub fn decode_list_element(encoded: &[u8]) -> Result<&[u8], NodeError> {
    let mut r = Reader::new(encoded);
    let len = r.read_u32()? as usize;
    r.read_bytes(len)
}

pub fn encode_map_entry(key: &[u8], value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

/// `(key, value)` of an encoded map entry.
pub fn decode_map_entry(encoded: &[u8]) -> Result<(&[u8], &[u8]), NodeError> {
    let mut r = Reader::new(encoded);
    let key_len = r.read_u16()? as usize;
    let key = r.read_bytes(key_len)?;
    let val_len = r.read_u32()? as usize;
    let value = r.read_bytes(val_len)?;
    Ok((key, value))
}

pub fn encode_set_entry(key: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(key);
}

pub fn decode_set_entry(encoded: &[u8]) -> Result<&[u8], NodeError> {
    let mut r = Reader::new(encoded);
    let key_len = r.read_u16()? as usize;
    r.read_bytes(key_len)
}

/// Byte key of an encoded map or set element.
pub fn element_key(leaf_type: ChunkType, encoded: &[u8]) -> Result<&[u8], NodeError> {
    match leaf_type {
        ChunkType::Map => decode_map_entry(encoded).map(|(k, _)| k),
        ChunkType::Set => decode_set_entry(encoded),
        other => Err(NodeError::UnexpectedChunkType(other)),
    }
}

/// Parsed view over a Meta chunk.
pub struct MetaNode {
    chunk: Arc<Chunk>,
    entries: Vec<MetaEntry>,
    /// `cum_elements[i]` = total elements of entries `0..=i`.
    cum_elements: Vec<u64>,
}

impl MetaNode {
    fn parse(chunk: Arc<Chunk>) -> Result<MetaNode, NodeError> {
        let payload = chunk.payload();
        let mut r = Reader::new(payload);
        let count = r.read_u32()?;
        let mut entries = Vec::with_capacity(count as usize);
        let mut cum_elements = Vec::with_capacity(count as usize);
        let mut total = 0u64;
        let mut pos = 4;
        for _ in 0..count {
            let (entry, used) = MetaEntry::decode(&payload[pos..])?;
            pos += used;
            total += entry.num_elements;
            cum_elements.push(total);
            entries.push(entry);
        }
        if pos != payload.len() {
            return Err(NodeError::CountMismatch { count });
        }
        Ok(MetaNode { chunk, entries, cum_elements })
    }

    pub fn entries(&self) -> &[MetaEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> &MetaEntry {
        &self.entries[idx]
    }

    /// Total elements of children before entry `idx`.
    pub fn elements_before(&self, idx: usize) -> u64 {
        if idx == 0 { 0 } else { self.cum_elements[idx - 1] }
    }

    /// Child containing global element `idx` of this subtree, and the
    /// element's index within that child. `idx` must be `< num_elements`.
    pub fn child_by_index(&self, idx: u64) -> (usize, u64) {
        let child = self.cum_elements.partition_point(|&end| end <= idx);
        (child, idx - self.elements_before(child))
    }

    /// First child whose max key is `>=` the probe, or the last child if
    /// every key is smaller (the descent then runs off the right edge).
    pub fn child_by_key(&self, probe: &OrderedKey) -> usize {
        let pos = self.entries.partition_point(|e| e.key < *probe);
        pos.min(self.entries.len() - 1)
    }
}

/// Parsed view over a leaf chunk.
pub struct LeafNode {
    chunk: Arc<Chunk>,
    leaf_type: ChunkType,
    /// `(offset, len)` of each encoded element within the payload.
    /// Empty for Blob leaves, where elements are single bytes.
    offsets: Vec<(u32, u32)>,
}

impl LeafNode {
    fn parse(chunk: Arc<Chunk>) -> Result<LeafNode, NodeError> {
        let leaf_type = chunk.chunk_type();
        let payload = chunk.payload();
        let offsets = match leaf_type {
            ChunkType::Blob => Vec::new(),
            ChunkType::List | ChunkType::Map | ChunkType::Set => {
                let mut r = Reader::new(payload);
                let count = r.read_u32()?;
                let mut offsets = Vec::with_capacity(count as usize);
                let mut pos = 4usize;
                for _ in 0..count {
                    let len = match leaf_type {
                        ChunkType::List => {
                            let value_len = Reader::new(&payload[pos..]).read_u32()? as usize;
                            4 + value_len
                        }
                        ChunkType::Map => {
                            let mut er = Reader::new(&payload[pos..]);
                            let key_len = er.read_u16()? as usize;
                            er.read_bytes(key_len)?;
                            let val_len = er.read_u32()? as usize;
                            2 + key_len + 4 + val_len
                        }
                        ChunkType::Set => {
                            let key_len = Reader::new(&payload[pos..]).read_u16()? as usize;
                            2 + key_len
                        }
                        _ => unreachable!(),
                    };
                    if pos + len > payload.len() {
                        return Err(NodeError::Truncated);
                    }
                    offsets.push((pos as u32, len as u32));
                    pos += len;
                }
                if pos != payload.len() {
                    return Err(NodeError::CountMismatch { count });
                }
                offsets
            }
            other => return Err(NodeError::UnexpectedChunkType(other)),
        };
        Ok(LeafNode { chunk, leaf_type, offsets })
    }

    pub fn leaf_type(&self) -> ChunkType {
        self.leaf_type
    }

    pub fn num_entries(&self) -> u64 {
        match self.leaf_type {
            ChunkType::Blob => self.chunk.payload().len() as u64,
            _ => self.offsets.len() as u64,
        }
    }

    /// Encoded bytes of element `idx`.
    pub fn element(&self, idx: u64) -> &[u8] {
        match self.leaf_type {
            ChunkType::Blob => {
                let payload = self.chunk.payload();
                &payload[idx as usize..idx as usize + 1]
            }
            _ => {
                let (off, len) = self.offsets[idx as usize];
                &self.chunk.payload()[off as usize..(off + len) as usize]
            }
        }
    }

    /// Raw payload; for Blob leaves this is the byte run itself.
    pub fn payload(&self) -> &[u8] {
        self.chunk.payload()
    }

    pub fn key(&self, idx: u64) -> Result<OrderedKey, NodeError> {
        match self.leaf_type {
            ChunkType::Blob | ChunkType::List => Ok(OrderedKey::Index(idx + 1)),
            ChunkType::Map | ChunkType::Set => {
                Ok(OrderedKey::Bytes(element_key(self.leaf_type, self.element(idx))?.to_vec()))
            }
            other => Err(NodeError::UnexpectedChunkType(other)),
        }
    }

    /// First element whose key is `>=` the probe; `num_entries()` if none.
    pub fn search_key(&self, probe: &[u8]) -> Result<u64, NodeError> {
        let mut lo = 0u64;
        let mut hi = self.num_entries();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let key = element_key(self.leaf_type, self.element(mid))?;
            if key < probe { lo = mid + 1 } else { hi = mid }
        }
        Ok(lo)
    }
}

/// Parsed view over any tree chunk.
pub enum SeqNode {
    Meta(MetaNode),
    Leaf(LeafNode),
}

impl SeqNode {
    pub fn parse(chunk: Arc<Chunk>) -> Result<SeqNode, NodeError> {
        match chunk.chunk_type() {
            ChunkType::Meta => Ok(SeqNode::Meta(MetaNode::parse(chunk)?)),
            ty if ty.is_leaf() => Ok(SeqNode::Leaf(LeafNode::parse(chunk)?)),
            other => Err(NodeError::UnexpectedChunkType(other)),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SeqNode::Leaf(_))
    }

    pub fn hash(&self) -> Hash {
        match self {
            SeqNode::Meta(node) => node.chunk.hash(),
            SeqNode::Leaf(node) => node.chunk.hash(),
        }
    }

    /// Entries directly in this node (children for Meta, elements for leaf).
    pub fn num_entries(&self) -> u64 {
        match self {
            SeqNode::Meta(node) => node.entries.len() as u64,
            SeqNode::Leaf(node) => node.num_entries(),
        }
    }

    /// Elements in the whole subtree.
    pub fn num_elements(&self) -> u64 {
        match self {
            SeqNode::Meta(node) => node.cum_elements.last().copied().unwrap_or(0),
            SeqNode::Leaf(node) => node.num_entries(),
        }
    }

    pub fn num_leaves(&self) -> u64 {
        match self {
            SeqNode::Meta(node) => node.entries.iter().map(|e| e.num_leaves).sum(),
            SeqNode::Leaf(_) => 1,
        }
    }

    pub fn as_meta(&self) -> &MetaNode {
        match self {
            SeqNode::Meta(node) => node,
            SeqNode::Leaf(_) => panic!("leaf node treated as meta"),
        }
    }

    pub fn as_leaf(&self) -> &LeafNode {
        match self {
            SeqNode::Leaf(node) => node,
            SeqNode::Meta(_) => panic!("meta node treated as leaf"),
        }
    }
}

/// Builds a Meta chunk payload from encoded entries.
pub fn meta_payload(entries: &[MetaEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        entry.encode(&mut out);
    }
    out
}

/// Builds a leaf chunk payload from the concatenated encoded elements.
pub fn leaf_payload(leaf_type: ChunkType, count: u64, elements: &[u8]) -> Vec<u8> {
    match leaf_type {
        ChunkType::Blob => elements.to_vec(),
        _ => {
            let mut out = Vec::with_capacity(4 + elements.len());
            out.extend_from_slice(&(count as u32).to_le_bytes());
            out.extend_from_slice(elements);
            out
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        if self.pos + len > self.buf.len() {
            return Err(NodeError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, NodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, NodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, NodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }
}
