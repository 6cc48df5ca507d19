use crate::loader::ChunkLoader;
use crate::prolly::builder::TreeBuilder;
use crate::prolly::cursor::NodeCursor;
use crate::prolly::node::{self, SeqNode};
use crate::prolly::rolling::TreeParams;
use crate::types::{TypeError, check_root};
use std::collections::BTreeSet;
use ustore_primitives::{ChunkType, Hash};

/// Key-ordered set of byte strings.
pub struct SSet<'a> {
    loader: &'a ChunkLoader,
    root: Hash,
    size: u64,
}

impl<'a> SSet<'a> {
    pub fn create(
        loader: &ChunkLoader,
        params: TreeParams,
        keys: &[Vec<u8>],
    ) -> Result<Hash, TypeError> {
        let sorted: BTreeSet<Vec<u8>> = keys.iter().cloned().collect();
        let elements: Vec<Vec<u8>> = sorted
            .iter()
            .map(|key| {
                let mut out = Vec::new();
                node::encode_set_entry(key, &mut out);
                out
            })
            .collect();
        Ok(TreeBuilder::build(loader, params, ChunkType::Set, elements)?)
    }

    pub fn load(loader: &'a ChunkLoader, root: &Hash) -> Result<SSet<'a>, TypeError> {
        let chunk = loader.get(root)?;
        check_root(chunk.chunk_type(), ChunkType::Set)?;
        let node = SeqNode::parse(chunk)?;
        Ok(SSet { loader, root: *root, size: node.num_elements() })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, TypeError> {
        Ok(self.locate(key)?.1)
    }

    pub fn insert(&self, params: TreeParams, key: &[u8]) -> Result<Hash, TypeError> {
        let (pos, exists) = self.locate(key)?;
        if exists {
            return Ok(self.root);
        }
        let mut encoded = Vec::new();
        node::encode_set_entry(key, &mut encoded);
        Ok(TreeBuilder::splice(
            self.loader,
            params,
            ChunkType::Set,
            &self.root,
            pos,
            0,
            vec![encoded],
        )?)
    }

    pub fn remove(&self, params: TreeParams, key: &[u8]) -> Result<Hash, TypeError> {
        let (pos, exists) = self.locate(key)?;
        if !exists {
            return Ok(self.root);
        }
        Ok(TreeBuilder::splice(
            self.loader,
            params,
            ChunkType::Set,
            &self.root,
            pos,
            1,
            vec![],
        )?)
    }

    /// Ordered scan over all keys.
    pub fn scan(&self) -> SetIter<'a, '_> {
        SetIter { set: self, cursor: None }
    }

    fn locate(&self, key: &[u8]) -> Result<(u64, bool), TypeError> {
        let cursor = NodeCursor::at_key(self.loader, &self.root, key)?;
        let pos = cursor.global_index();
        let exists = match cursor.current_bytes() {
            Some(encoded) => node::decode_set_entry(encoded)? == key,
            None => false,
        };
        Ok((pos, exists))
    }
}

pub struct SetIter<'a, 'b> {
    set: &'b SSet<'a>,
    cursor: Option<NodeCursor<'a>>,
}

impl Iterator for SetIter<'_, '_> {
    type Item = Result<Vec<u8>, TypeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_none() {
            match NodeCursor::at_index(self.set.loader, &self.set.root, 0) {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(err) => return Some(Err(err.into())),
            }
        }
        let cursor = self.cursor.as_mut().unwrap();
        let encoded = cursor.current_bytes()?.to_vec();
        if let Err(err) = cursor.advance(true) {
            return Some(Err(err.into()));
        }
        Some(node::decode_set_entry(&encoded).map(<[u8]>::to_vec).map_err(Into::into))
    }
}
