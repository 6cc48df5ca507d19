use crate::loader::ChunkLoader;
use crate::prolly::builder::TreeBuilder;
use crate::prolly::cursor::NodeCursor;
use crate::prolly::node::SeqNode;
use crate::prolly::rolling::TreeParams;
use crate::types::{TypeError, check_root};
use ustore_primitives::{ChunkType, Hash};

/// Byte sequence chunked into a tree.
pub struct SBlob<'a> {
    loader: &'a ChunkLoader,
    root: Hash,
    size: u64,
}

impl<'a> SBlob<'a> {
    /// Writes a fresh blob and returns its root hash.
    pub fn create(loader: &ChunkLoader, params: TreeParams, data: &[u8]) -> Result<Hash, TypeError> {
        let mut builder = TreeBuilder::new(loader, params, ChunkType::Blob);
        builder.append_bytes(data)?;
        Ok(builder.finish()?)
    }

    pub fn load(loader: &'a ChunkLoader, root: &Hash) -> Result<SBlob<'a>, TypeError> {
        let chunk = loader.get(root)?;
        check_root(chunk.chunk_type(), ChunkType::Blob)?;
        let node = SeqNode::parse(chunk)?;
        Ok(SBlob { loader, root: *root, size: node.num_elements() })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    /// Reads up to `len` bytes starting at `pos`; short reads happen only
    /// at the end of the blob.
    pub fn read(&self, pos: u64, len: u64) -> Result<Vec<u8>, TypeError> {
        if pos > self.size {
            return Err(TypeError::IndexOutOfRange { idx: pos, size: self.size });
        }
        let mut remaining = len.min(self.size - pos);
        let mut out = Vec::with_capacity(remaining as usize);
        let mut at = pos;
        while remaining > 0 {
            let cursor = NodeCursor::at_index(self.loader, &self.root, at)?;
            let payload = cursor.leaf_payload();
            let start = cursor.index_in_leaf().max(0) as usize;
            let take = ((payload.len() - start) as u64).min(remaining) as usize;
            out.extend_from_slice(&payload[start..start + take]);
            at += take as u64;
            remaining -= take as u64;
        }
        Ok(out)
    }

    pub fn read_all(&self) -> Result<Vec<u8>, TypeError> {
        self.read(0, self.size)
    }

    /// Replaces `dels` bytes at `pos` with `insert`, returning the new root.
    pub fn splice(
        &self,
        params: TreeParams,
        pos: u64,
        dels: u64,
        insert: &[u8],
    ) -> Result<Hash, TypeError> {
        Ok(TreeBuilder::splice_bytes(self.loader, params, &self.root, pos, dels, insert)?)
    }

    /// Sequential byte-stream reader over the blob.
    pub fn reader(&'a self) -> BlobReader<'a> {
        BlobReader { blob: self, pos: 0 }
    }
}

pub struct BlobReader<'a> {
    blob: &'a SBlob<'a>,
    pos: u64,
}

impl std::io::Read for BlobReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.blob.size() {
            return Ok(0);
        }
        let bytes = self
            .blob
            .read(self.pos, buf.len() as u64)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        self.pos += bytes.len() as u64;
        Ok(bytes.len())
    }
}
