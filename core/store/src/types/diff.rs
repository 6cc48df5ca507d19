//! Structural diffs between two tree versions. Equal subtrees are skipped
//! by chunk hash comparison, so diffing two versions that share most of
//! their content touches only the differing chunks.

use crate::loader::ChunkLoader;
use crate::prolly::cursor::NodeCursor;
use crate::prolly::node;
use crate::types::TypeError;
use ustore_primitives::Hash;

/// One positional difference between two lists: the element index and the
/// value on each side (`None` where the side has no element).
pub type ListDiffEntry = (u64, Option<Vec<u8>>, Option<Vec<u8>>);

/// One keyed difference between two maps.
pub type MapDiffEntry = (Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>);

/// Skips both cursors over the current leaf node when the two sides carry
/// the identical node at the same position.
fn skip_equal_leaves(
    left: &mut NodeCursor<'_>,
    right: &mut NodeCursor<'_>,
) -> Result<bool, TypeError> {
    if left.at_node_start(0)
        && right.at_node_start(0)
        && left.leaf_hash() == right.leaf_hash()
        && left.leaf_num_entries() > 0
    {
        let entries = left.leaf_num_entries();
        left.advance_steps(entries)?;
        right.advance_steps(entries)?;
        return Ok(true);
    }
    Ok(false)
}

/// Positional dual-iterator diff of two lists (or blobs, at byte
/// granularity): yields `(index, left?, right?)` where the sides differ.
pub fn list_diff(
    loader: &ChunkLoader,
    left_root: &Hash,
    right_root: &Hash,
) -> Result<Vec<ListDiffEntry>, TypeError> {
    let mut out = Vec::new();
    if left_root == right_root {
        return Ok(out);
    }
    let mut left = NodeCursor::at_index(loader, left_root, 0)?;
    let mut right = NodeCursor::at_index(loader, right_root, 0)?;
    let mut idx = 0u64;
    loop {
        let left_valid = !left.is_end();
        let right_valid = !right.is_end();
        if !left_valid && !right_valid {
            break;
        }
        if left_valid && right_valid {
            if left.global_index() == right.global_index() && skip_equal_leaves(&mut left, &mut right)? {
                idx = left.global_index();
                continue;
            }
            let l = left.current_bytes().expect("not at end");
            let r = right.current_bytes().expect("not at end");
            if l != r {
                out.push((
                    idx,
                    Some(node::decode_list_element(l)?.to_vec()),
                    Some(node::decode_list_element(r)?.to_vec()),
                ));
            }
            left.advance(true)?;
            right.advance(true)?;
        } else if left_valid {
            let l = left.current_bytes().expect("not at end");
            out.push((idx, Some(node::decode_list_element(l)?.to_vec()), None));
            left.advance(true)?;
        } else {
            let r = right.current_bytes().expect("not at end");
            out.push((idx, None, Some(node::decode_list_element(r)?.to_vec())));
            right.advance(true)?;
        }
        idx += 1;
    }
    Ok(out)
}

/// Key-merge diff of two maps: yields `(key, left?, right?)` for keys whose
/// values differ or that exist on one side only.
pub fn map_diff(
    loader: &ChunkLoader,
    left_root: &Hash,
    right_root: &Hash,
) -> Result<Vec<MapDiffEntry>, TypeError> {
    let mut out = Vec::new();
    if left_root == right_root {
        return Ok(out);
    }
    let mut left = NodeCursor::at_index(loader, left_root, 0)?;
    let mut right = NodeCursor::at_index(loader, right_root, 0)?;
    loop {
        if skip_equal_leaves(&mut left, &mut right)? {
            continue;
        }
        match (left.current_bytes(), right.current_bytes()) {
            (None, None) => break,
            (Some(l), None) => {
                let (key, value) = node::decode_map_entry(l)?;
                out.push((key.to_vec(), Some(value.to_vec()), None));
                left.advance(true)?;
            }
            (None, Some(r)) => {
                let (key, value) = node::decode_map_entry(r)?;
                out.push((key.to_vec(), None, Some(value.to_vec())));
                right.advance(true)?;
            }
            (Some(l), Some(r)) => {
                let (lk, lv) = node::decode_map_entry(l)?;
                let (rk, rv) = node::decode_map_entry(r)?;
                match lk.cmp(rk) {
                    std::cmp::Ordering::Less => {
                        out.push((lk.to_vec(), Some(lv.to_vec()), None));
                        left.advance(true)?;
                    }
                    std::cmp::Ordering::Greater => {
                        out.push((rk.to_vec(), None, Some(rv.to_vec())));
                        right.advance(true)?;
                    }
                    std::cmp::Ordering::Equal => {
                        if lv != rv {
                            out.push((lk.to_vec(), Some(lv.to_vec()), Some(rv.to_vec())));
                        }
                        left.advance(true)?;
                        right.advance(true)?;
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prolly::rolling::test_params;
    use crate::store::MemoryChunkStore;
    use crate::types::{SList, SMap};
    use std::sync::Arc;

    fn loader() -> ChunkLoader {
        ChunkLoader::new(Arc::new(MemoryChunkStore::new()))
    }

    #[test]
    fn identical_trees_diff_empty() {
        let loader = loader();
        let values: Vec<Vec<u8>> = (0..500).map(|i| format!("v{i}").into_bytes()).collect();
        let root = SList::create(&loader, test_params(), &values).unwrap();
        assert_eq!(list_diff(&loader, &root, &root).unwrap(), vec![]);
    }

    #[test]
    fn list_diff_reports_positions() {
        let loader = loader();
        let values: Vec<Vec<u8>> = (0..600).map(|i| format!("item-{i:04}").into_bytes()).collect();
        let left = SList::create(&loader, test_params(), &values).unwrap();
        let list = SList::load(&loader, &left).unwrap();
        let right = list.splice(test_params(), 300, 1, &[b"changed".to_vec()]).unwrap();

        let diff = list_diff(&loader, &left, &right).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, 300);
        assert_eq!(diff[0].1, Some(b"item-0300".to_vec()));
        assert_eq!(diff[0].2, Some(b"changed".to_vec()));
    }

    #[test]
    fn list_diff_length_mismatch() {
        let loader = loader();
        let short: Vec<Vec<u8>> = (0..5).map(|i| format!("v{i}").into_bytes()).collect();
        let left = SList::create(&loader, test_params(), &short).unwrap();
        let list = SList::load(&loader, &left).unwrap();
        let right = list.splice(test_params(), 5, 0, &[b"extra".to_vec()]).unwrap();
        let diff = list_diff(&loader, &left, &right).unwrap();
        assert_eq!(diff, vec![(5, None, Some(b"extra".to_vec()))]);
    }

    #[test]
    fn map_diff_reports_keys() {
        let loader = loader();
        let keys: Vec<Vec<u8>> = (0..400).map(|i| format!("key-{i:04}").into_bytes()).collect();
        let vals: Vec<Vec<u8>> = (0..400).map(|i| format!("val-{i}").into_bytes()).collect();
        let left = SMap::create(&loader, test_params(), &keys, &vals).unwrap();
        let map = SMap::load(&loader, &left).unwrap();
        let right = map.set(test_params(), b"key-0200", b"other").unwrap();
        let map = SMap::load(&loader, &right).unwrap();
        let right = map.remove(test_params(), b"key-0300").unwrap();
        let map = SMap::load(&loader, &right).unwrap();
        let right = map.set(test_params(), b"new-key", b"fresh").unwrap();

        let mut diff = map_diff(&loader, &left, &right).unwrap();
        diff.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(diff, vec![
            (b"key-0200".to_vec(), Some(b"val-200".to_vec()), Some(b"other".to_vec())),
            (b"key-0300".to_vec(), Some(b"val-300".to_vec()), None),
            (b"new-key".to_vec(), None, Some(b"fresh".to_vec())),
        ]);
    }
}
