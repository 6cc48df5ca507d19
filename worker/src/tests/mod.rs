//! End-to-end scenarios over the worker facade.

use crate::head_version::InMemoryHeadVersion;
use crate::{TypedValue, Value, Worker};
use assert_matches::assert_matches;
use std::collections::HashSet;
use std::sync::Arc;
use ustore_o11y::testonly::init_test_logger;
use ustore_primitives::{ErrorCode, Hash};
use ustore_store::prolly::TreeParams;
use ustore_store::{ChunkLoader, ChunkStore, MemoryChunkStore};


pub(crate) fn test_worker() -> Worker {
    Worker::new(
        1,
        Arc::new(MemoryChunkStore::new()),
        Box::new(InMemoryHeadVersion::new()),
        TreeParams::default(),
    )
}

const FOX: &[u8] = b"The quick brown fox jumps over the lazy dog";

#[test]
fn put_string_and_read_it_back() {
    init_test_logger();
    let worker = test_worker();
    let v_a = worker.put(b"k1", &Value::string(FOX), b"master").unwrap();

    let cell = worker.get(b"k1", b"master").unwrap();
    assert_eq!(cell.hash(), v_a);
    assert_eq!(cell.key(), b"k1");
    assert!(!cell.merged());
    assert_eq!(worker.read_value(&cell).unwrap(), TypedValue::String(FOX.to_vec()));

    assert_eq!(worker.get_latest_versions(b"k1"), vec![v_a]);
    assert!(worker.is_branch_head(b"k1", b"master", &v_a));
    assert!(worker.is_latest_version(b"k1", &v_a));
    assert!(worker.exists(b"k1"));
    assert!(worker.exists_branch(b"k1", b"master"));
}

#[test]
fn put_blob_and_diverge_from_a_version() {
    init_test_logger();
    let worker = test_worker();
    let v_b1 = worker.put(b"k2", &Value::blob(b"Edge of tomorrow"), b"master").unwrap();
    // Successor of an explicit version: no branch head moves.
    let v_b2 = worker.put_version(b"k2", &Value::blob(b"Pig can fly!"), &v_b1).unwrap();

    assert_eq!(worker.get_latest_versions(b"k2"), vec![v_b2]);
    assert!(worker.is_branch_head(b"k2", b"master", &v_b1));
    assert!(!worker.is_latest_version(b"k2", &v_b1));

    let cell = worker.get_version(b"k2", &v_b2).unwrap();
    assert_eq!(cell.pre_hash(false), v_b1);
    assert_eq!(worker.read_value(&cell).unwrap(), TypedValue::Blob(b"Pig can fly!".to_vec()));
}

#[test]
fn branch_put_merge() {
    init_test_logger();
    let worker = test_worker();
    let v_a = worker.put(b"k1", &Value::string(FOX), b"master").unwrap();
    worker.branch(b"k1", b"master", b"dev").unwrap();
    assert!(worker.is_branch_head(b"k1", b"dev", &v_a));

    let v_c = worker.put(b"k1", &Value::string(b"Once upon a time"), b"dev").unwrap();
    let v_d =
        worker.merge(b"k1", &Value::string(b"Good good study"), b"master", b"dev").unwrap();

    let cell = worker.get_version(b"k1", &v_d).unwrap();
    assert!(cell.merged());
    assert_eq!(cell.pre_hash(false), v_a);
    assert_eq!(cell.pre_hash(true), v_c);
    assert_eq!(worker.get_branch_head(b"k1", b"master"), v_d);
    assert_eq!(worker.get_latest_versions(b"k1"), vec![v_d]);
    assert_eq!(
        worker.read_value(&cell).unwrap(),
        TypedValue::String(b"Good good study".to_vec())
    );
}

#[test]
fn map_set_many_scan_and_remove() {
    init_test_logger();
    let worker = test_worker();
    let keys: Vec<Vec<u8>> =
        ["The", "brown", "dog", "fox", "jumps", "lazy", "over", "quick", "the"]
            .iter()
            .map(|k| k.as_bytes().to_vec())
            .collect();
    let vals: Vec<Vec<u8>> =
        keys.iter().map(|k| [b"v_".as_slice(), k].concat()).collect();
    let v1 = worker.put(b"km", &Value::map(&keys, &vals), b"master").unwrap();

    let cell = worker.get_version(b"km", &v1).unwrap();
    let mut update = Value::map(&[b"Z".to_vec()], &[b"v_z".to_vec()]);
    update.base = cell.data_hash();
    worker.put(b"km", &update, b"master").unwrap();

    let cell = worker.get(b"km", b"master").unwrap();
    let TypedValue::Map(entries) = worker.read_value(&cell).unwrap() else {
        panic!("expected a map");
    };
    assert_eq!(entries.len(), 10);
    // Lexicographic key order; "Z" sorts between "The" and the lowercase
    // words.
    assert_eq!(entries[0].0, b"The".to_vec());
    assert_eq!(entries[1], (b"Z".to_vec(), b"v_z".to_vec()));
    assert!(entries.windows(2).all(|pair| pair[0].0 < pair[1].0));

    // Keys with no values remove the entries.
    let mut removal = Value { utype: Some(ustore_primitives::UType::Map), ..Value::default() };
    removal.base = cell.data_hash();
    removal.keys = vec![b"Z".to_vec()];
    worker.put(b"km", &removal, b"master").unwrap();
    let cell = worker.get(b"km", b"master").unwrap();
    let TypedValue::Map(entries) = worker.read_value(&cell).unwrap() else {
        panic!("expected a map");
    };
    assert_eq!(entries.len(), 9);
    assert!(entries.iter().all(|(k, _)| k != b"Z"));
}

#[test]
fn list_splice_through_the_worker() {
    init_test_logger();
    let worker = test_worker();
    let words: Vec<Vec<u8>> =
        ["The", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog"]
            .iter()
            .map(|w| w.as_bytes().to_vec())
            .collect();
    let v1 = worker.put(b"kl", &Value::list(&words), b"master").unwrap();

    let cell = worker.get_version(b"kl", &v1).unwrap();
    let mut splice = Value::list(&[b"delta".to_vec()]);
    splice.base = cell.data_hash();
    splice.pos = 9;
    splice.dels = 0;
    worker.put(b"kl", &splice, b"master").unwrap();

    let cell = worker.get(b"kl", b"master").unwrap();
    let TypedValue::List(values) = worker.read_value(&cell).unwrap() else {
        panic!("expected a list");
    };
    assert_eq!(values.len(), 10);
    assert_eq!(values[9], b"delta".to_vec());
    assert_eq!(values[..9].to_vec(), words);
}

#[test]
fn set_insert_and_remove_through_the_worker() {
    init_test_logger();
    let worker = test_worker();
    let keys: Vec<Vec<u8>> = [b"fox".to_vec(), b"dog".to_vec()].to_vec();
    let v1 = worker.put(b"ks", &Value::set(&keys), b"master").unwrap();

    let cell = worker.get_version(b"ks", &v1).unwrap();
    let mut insert = Value::set(&[b"cat".to_vec()]);
    insert.base = cell.data_hash();
    worker.put(b"ks", &insert, b"master").unwrap();

    let cell = worker.get(b"ks", b"master").unwrap();
    assert_eq!(
        worker.read_value(&cell).unwrap(),
        TypedValue::Set(vec![b"cat".to_vec(), b"dog".to_vec(), b"fox".to_vec()])
    );

    let mut removal = Value::set(&[b"dog".to_vec()]);
    removal.base = cell.data_hash();
    removal.dels = 1;
    worker.put(b"ks", &removal, b"master").unwrap();
    let cell = worker.get(b"ks", b"master").unwrap();
    assert_eq!(
        worker.read_value(&cell).unwrap(),
        TypedValue::Set(vec![b"cat".to_vec(), b"fox".to_vec()])
    );
}

#[test]
fn history_dag_parents() {
    init_test_logger();
    let worker = test_worker();
    let v1 = worker.put(b"k", &Value::string(b"a"), b"br").unwrap();
    let v2 = worker.put(b"k", &Value::string(b"b"), b"br").unwrap();
    let v3 = worker.merge_version(b"k", &Value::string(b"c"), b"br", &v1).unwrap();

    let cell = worker.get_version(b"k", &v3).unwrap();
    assert_eq!(cell.pre_hash(false), v2);
    assert_eq!(cell.pre_hash(true), v1);
    assert!(cell.merged());
    let cell2 = worker.get_version(b"k", &v2).unwrap();
    assert_eq!(cell2.pre_hash(false), v1);
    assert!(!cell2.merged());
}

#[test]
fn latest_is_exactly_the_unreferenced_cells() {
    init_test_logger();
    let worker = test_worker();
    let mut cells: Vec<Hash> = Vec::new();
    let v1 = worker.put(b"k", &Value::string(b"1"), b"master").unwrap();
    cells.push(v1);
    let v2 = worker.put(b"k", &Value::string(b"2"), b"master").unwrap();
    cells.push(v2);
    let v3 = worker.put_version(b"k", &Value::string(b"3"), &v1).unwrap();
    cells.push(v3);
    let v4 = worker.merge_versions(b"k", &Value::string(b"4"), &v2, &v3).unwrap();
    cells.push(v4);
    let v5 = worker.put_version(b"k", &Value::string(b"5"), &v2).unwrap();
    cells.push(v5);

    // Reference computation straight from the DAG definition.
    let mut referenced: HashSet<Hash> = HashSet::new();
    for ver in &cells {
        let cell = worker.get_version(b"k", ver).unwrap();
        referenced.insert(cell.pre_hash(false));
        if cell.merged() {
            referenced.insert(cell.pre_hash(true));
        }
    }
    let expect: HashSet<Hash> =
        cells.iter().copied().filter(|v| !referenced.contains(v)).collect();
    let latest: HashSet<Hash> = worker.get_latest_versions(b"k").into_iter().collect();
    assert_eq!(latest, expect);
    assert_eq!(latest, HashSet::from([v4, v5]));
}

#[test]
fn rename_is_atomic_and_checked() {
    init_test_logger();
    let worker = test_worker();
    let v1 = worker.put(b"k", &Value::string(b"content"), b"old").unwrap();
    worker.rename(b"k", b"old", b"new").unwrap();
    assert!(!worker.exists_branch(b"k", b"old"));
    assert!(worker.exists_branch(b"k", b"new"));
    assert_eq!(worker.get_branch_head(b"k", b"new"), v1);

    worker.put(b"k", &Value::string(b"other"), b"other").unwrap();
    assert_matches!(worker.rename(b"k", b"new", b"other"), Err(ErrorCode::BranchExists));
    assert_matches!(worker.rename(b"k", b"gone", b"x"), Err(ErrorCode::BranchNotExists));
}

#[test]
fn delete_removes_only_the_branch_entry() {
    init_test_logger();
    let worker = test_worker();
    let v1 = worker.put(b"k", &Value::string(b"content"), b"master").unwrap();
    worker.branch(b"k", b"master", b"dev").unwrap();
    worker.delete(b"k", b"dev").unwrap();
    assert!(!worker.exists_branch(b"k", b"dev"));
    assert_matches!(worker.delete(b"k", b"dev"), Err(ErrorCode::BranchNotExists));
    // History stays reachable.
    assert_eq!(worker.get_version(b"k", &v1).unwrap().hash(), v1);
    assert!(worker.is_latest_version(b"k", &v1));
}

#[test]
fn error_taxonomy_at_the_boundary() {
    init_test_logger();
    let worker = test_worker();
    assert_matches!(worker.get(b"k", b"master"), Err(ErrorCode::BranchNotExists));
    assert_matches!(
        worker.branch(b"k", b"missing", b"new"),
        Err(ErrorCode::BranchNotExists)
    );

    let v1 = worker.put(b"k", &Value::string(b"content"), b"master").unwrap();
    assert_matches!(
        worker.branch(b"k", b"master", b"master"),
        Err(ErrorCode::BranchExists)
    );
    // Unknown predecessor version.
    let bogus = Hash::compute(b"no such cell");
    assert_matches!(
        worker.put_version(b"k", &Value::string(b"x"), &bogus),
        Err(ErrorCode::ReferringVersionNotExist)
    );
    // A version of another key is inconsistent.
    worker.put(b"other", &Value::string(b"y"), b"master").unwrap();
    let other = worker.get(b"other", b"master").unwrap().hash();
    assert_matches!(worker.get_version(b"k", &other), Err(ErrorCode::InconsistentKey));
    assert_matches!(worker.get_version(b"k", &bogus), Err(ErrorCode::UCellNotFound));

    // Updating a list root as if it were a blob.
    let list = worker.put(b"kl", &Value::list(&[b"a".to_vec()]), b"master").unwrap();
    let cell = worker.get_version(b"kl", &list).unwrap();
    let mut bad = Value::blob(b"zzz");
    bad.base = cell.data_hash();
    bad.pos = 0;
    assert_matches!(worker.put(b"kl", &bad, b"master"), Err(ErrorCode::TypeMismatch));

    // Primitive types are not tree-backed.
    let prim = Value { utype: Some(ustore_primitives::UType::Num), ..Value::default() };
    assert_matches!(worker.put(b"kn", &prim, b"master"), Err(ErrorCode::TypeUnsupported));
    let _ = v1;
}

#[test]
fn listings() {
    init_test_logger();
    let worker = test_worker();
    worker.put(b"b-key", &Value::string(b"1"), b"master").unwrap();
    worker.put(b"a-key", &Value::string(b"2"), b"master").unwrap();
    worker.branch(b"a-key", b"master", b"dev").unwrap();
    assert_eq!(worker.list_keys(), vec![b"a-key".to_vec(), b"b-key".to_vec()]);
    assert_eq!(
        worker.list_branches(b"a-key"),
        vec![b"dev".to_vec(), b"master".to_vec()]
    );
    assert_eq!(worker.list_branches(b"missing"), Vec::<Vec<u8>>::new());
}

#[test]
fn get_chunk_returns_the_cell_record() {
    init_test_logger();
    let worker = test_worker();
    let v1 = worker.put(b"k", &Value::string(b"content"), b"master").unwrap();
    let chunk = worker.get_chunk(b"k", &v1).unwrap();
    assert_eq!(chunk.hash(), v1);
    assert_eq!(chunk.chunk_type(), ustore_primitives::ChunkType::Cell);
}

#[test]
fn structural_sharing_across_worker_versions() {
    init_test_logger();
    // Small chunks so the value spans many nodes.
    let store = Arc::new(MemoryChunkStore::new());
    let worker = Worker::new(
        1,
        store.clone(),
        Box::new(InMemoryHeadVersion::new()),
        TreeParams { chunk_pattern: (1 << 8) - 1, window_size: 8 },
    );
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    let v1 = worker.put(b"big", &Value::blob(&data), b"master").unwrap();
    let before = store.info().chunks_total;
    assert!(before > 100);

    let cell = worker.get_version(b"big", &v1).unwrap();
    let mut edit = Value::blob(b"!");
    edit.base = cell.data_hash();
    edit.pos = 50_000;
    edit.dels = 1;
    worker.put(b"big", &edit, b"master").unwrap();
    let written = store.info().chunks_total - before;
    assert!(written <= 40, "one-byte edit rewrote {written} chunks of {before}");

    let cell = worker.get(b"big", b"master").unwrap();
    let TypedValue::Blob(read) = worker.read_value(&cell).unwrap() else {
        panic!("expected a blob");
    };
    assert_eq!(read.len(), 100_000);
    assert_eq!(read[50_000], b'!');
    assert_eq!(read[49_999], data[49_999]);
    assert_eq!(read[50_001], data[50_001]);
}

#[test]
fn reads_observe_every_chunk_reachable_from_a_version() {
    init_test_logger();
    let worker = test_worker();
    let values: Vec<Vec<u8>> = (0..500).map(|i| format!("value-{i}").into_bytes()).collect();
    let v1 = worker.put(b"k", &Value::list(&values), b"master").unwrap();
    let cell = worker.get_version(b"k", &v1).unwrap();
    // Walking the whole tree from the data root never misses a chunk.
    let loader = ChunkLoader::new(worker.store().clone());
    let list = ustore_store::types::SList::load(&loader, &cell.data_hash()).unwrap();
    let all: Vec<Vec<u8>> = list.iter().map(Result::unwrap).collect();
    assert_eq!(all, values);
}
