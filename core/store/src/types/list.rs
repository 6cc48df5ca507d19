use crate::loader::ChunkLoader;
use crate::prolly::builder::TreeBuilder;
use crate::prolly::cursor::NodeCursor;
use crate::prolly::node::{self, SeqNode};
use crate::prolly::rolling::TreeParams;
use crate::types::{TypeError, check_root};
use ustore_primitives::{ChunkType, Hash};

/// Ordered sequence of byte-string elements.
pub struct SList<'a> {
    loader: &'a ChunkLoader,
    root: Hash,
    size: u64,
}

impl<'a> SList<'a> {
    pub fn create(
        loader: &ChunkLoader,
        params: TreeParams,
        values: &[Vec<u8>],
    ) -> Result<Hash, TypeError> {
        let elements = values.iter().map(|value| {
            let mut out = Vec::new();
            node::encode_list_element(value, &mut out);
            out
        });
        Ok(TreeBuilder::build(loader, params, ChunkType::List, elements.collect::<Vec<_>>())?)
    }

    pub fn load(loader: &'a ChunkLoader, root: &Hash) -> Result<SList<'a>, TypeError> {
        let chunk = loader.get(root)?;
        check_root(chunk.chunk_type(), ChunkType::List)?;
        let node = SeqNode::parse(chunk)?;
        Ok(SList { loader, root: *root, size: node.num_elements() })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn get(&self, idx: u64) -> Result<Vec<u8>, TypeError> {
        if idx >= self.size {
            return Err(TypeError::IndexOutOfRange { idx, size: self.size });
        }
        let cursor = NodeCursor::at_index(self.loader, &self.root, idx)?;
        let encoded = cursor.current_bytes().expect("index validated against size");
        Ok(node::decode_list_element(encoded)?.to_vec())
    }

    pub fn iter(&self) -> ListIter<'a, '_> {
        ListIter { list: self, cursor: None }
    }

    /// Replaces `dels` elements at `start` with `values`.
    pub fn splice(
        &self,
        params: TreeParams,
        start: u64,
        dels: u64,
        values: &[Vec<u8>],
    ) -> Result<Hash, TypeError> {
        let inserts: Vec<Vec<u8>> = values
            .iter()
            .map(|value| {
                let mut out = Vec::new();
                node::encode_list_element(value, &mut out);
                out
            })
            .collect();
        Ok(TreeBuilder::splice(
            self.loader,
            params,
            ChunkType::List,
            &self.root,
            start,
            dels,
            inserts,
        )?)
    }
}

pub struct ListIter<'a, 'b> {
    list: &'b SList<'a>,
    cursor: Option<NodeCursor<'a>>,
}

impl Iterator for ListIter<'_, '_> {
    type Item = Result<Vec<u8>, TypeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_none() {
            match NodeCursor::at_index(self.list.loader, &self.list.root, 0) {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(err) => return Some(Err(err.into())),
            }
        }
        let cursor = self.cursor.as_mut().unwrap();
        let encoded = cursor.current_bytes()?.to_vec();
        if let Err(err) = cursor.advance(true) {
            return Some(Err(err.into()));
        }
        Some(node::decode_list_element(&encoded).map(<[u8]>::to_vec).map_err(Into::into))
    }
}
