use crate::chunk::{Chunk, PAYLOAD_OFFSET};
use crate::metrics;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ustore_primitives::Hash;

/// Approximate storage counters reported by `info()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub chunks_total: u64,
    pub chunk_bytes_total: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("chunk hash mismatch: keyed {keyed}, content {content}")]
    HashMismatch { keyed: Hash, content: Hash },
    #[error("chunk {0} not found")]
    ChunkNotFound(Hash),
    #[error("corrupt chunk record: {0}")]
    Corrupt(#[from] crate::chunk::ChunkError),
    #[error("chunk store io: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only content-addressed chunk storage.
///
/// `put` is idempotent when the keyed hash matches the chunk content and
/// fails otherwise; `get` returns immutable bytes. Implementations are
/// internally synchronized: multi-reader, multi-writer.
pub trait ChunkStore: Send + Sync {
    fn put(&self, hash: &Hash, chunk: Chunk) -> Result<(), StoreError>;
    fn get(&self, hash: &Hash) -> Option<Arc<Chunk>>;
    fn exists(&self, hash: &Hash) -> bool;
    fn info(&self) -> StorageInfo;
}

/// In-memory chunk store for tests and single-process use.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<Hash, Arc<Chunk>>>,
}

impl MemoryChunkStore {
    pub fn new() -> MemoryChunkStore {
        MemoryChunkStore::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, hash: &Hash, chunk: Chunk) -> Result<(), StoreError> {
        if *hash != chunk.hash() {
            return Err(StoreError::HashMismatch { keyed: *hash, content: chunk.hash() });
        }
        let mut chunks = self.chunks.write();
        if !chunks.contains_key(hash) {
            metrics::CHUNKS_WRITTEN.inc();
            metrics::CHUNK_BYTES_WRITTEN.inc_by(chunk.num_bytes() as u64);
            chunks.insert(*hash, Arc::new(chunk));
        }
        Ok(())
    }

    fn get(&self, hash: &Hash) -> Option<Arc<Chunk>> {
        self.chunks.read().get(hash).cloned()
    }

    fn exists(&self, hash: &Hash) -> bool {
        self.chunks.read().contains_key(hash)
    }

    fn info(&self) -> StorageInfo {
        let chunks = self.chunks.read();
        StorageInfo {
            chunks_total: chunks.len() as u64,
            chunk_bytes_total: chunks.values().map(|c| c.num_bytes() as u64).sum(),
        }
    }
}

/// Chunk store backed by a single append-only data file.
///
/// Records are written back to back in the chunk record format, which is
/// self-delimiting, so the in-memory `hash -> (offset, len)` index can be
/// rebuilt by scanning the file on open. The scan stops at the first record
/// that fails to parse (a torn tail from a crash) and subsequent appends
/// overwrite the torn bytes.
pub struct FileChunkStore {
    path: PathBuf,
    /// Offset and record length per chunk.
    index: RwLock<HashMap<Hash, (u64, u32)>>,
    /// Writer positioned at the end of the last valid record.
    writer: Mutex<File>,
    reader: Mutex<File>,
    bytes_total: RwLock<u64>,
    sync_every_put: bool,
}

impl FileChunkStore {
    pub fn open(path: &Path, sync_every_put: bool) -> Result<FileChunkStore, StoreError> {
        let mut index = HashMap::new();
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let mut offset = 0u64;
        let mut bytes_total = 0u64;
        loop {
            let mut header = [0u8; PAYLOAD_OFFSET];
            match read_exact_at(&mut file, offset, &mut header) {
                Ok(()) => {}
                Err(_) => break,
            }
            let payload_len = match Chunk::payload_len_from_header(&header) {
                Ok(len) => len,
                Err(_) => break,
            };
            let record_len = PAYLOAD_OFFSET + payload_len;
            let mut record = vec![0u8; record_len];
            if read_exact_at(&mut file, offset, &mut record).is_err() {
                break;
            }
            let chunk = match Chunk::from_record(record) {
                Ok(chunk) => chunk,
                Err(_) => break,
            };
            index.insert(chunk.hash(), (offset, record_len as u32));
            offset += record_len as u64;
            bytes_total += record_len as u64;
        }
        if offset < file.metadata()?.len() {
            tracing::warn!(
                target: "store",
                path = %path.display(),
                valid_bytes = offset,
                "discarding torn tail of chunk data file"
            );
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        let reader = File::open(path)?;
        Ok(FileChunkStore {
            path: path.to_path_buf(),
            index: RwLock::new(index),
            writer: Mutex::new(file),
            reader: Mutex::new(reader),
            bytes_total: RwLock::new(bytes_total),
            sync_every_put,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_exact_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

impl ChunkStore for FileChunkStore {
    fn put(&self, hash: &Hash, chunk: Chunk) -> Result<(), StoreError> {
        if *hash != chunk.hash() {
            return Err(StoreError::HashMismatch { keyed: *hash, content: chunk.hash() });
        }
        if self.index.read().contains_key(hash) {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        // Re-check under the writer lock so concurrent puts of the same
        // chunk append it once.
        {
            let mut index = self.index.write();
            if index.contains_key(hash) {
                return Ok(());
            }
            let offset = writer.stream_position()?;
            writer.write_all(chunk.record())?;
            if self.sync_every_put {
                writer.sync_data()?;
            }
            index.insert(*hash, (offset, chunk.num_bytes() as u32));
        }
        *self.bytes_total.write() += chunk.num_bytes() as u64;
        metrics::CHUNKS_WRITTEN.inc();
        metrics::CHUNK_BYTES_WRITTEN.inc_by(chunk.num_bytes() as u64);
        Ok(())
    }

    fn get(&self, hash: &Hash) -> Option<Arc<Chunk>> {
        let (offset, len) = *self.index.read().get(hash)?;
        let mut record = vec![0u8; len as usize];
        {
            let mut reader = self.reader.lock();
            read_exact_at(&mut reader, offset, &mut record).ok()?;
        }
        Chunk::from_record(record).ok().map(Arc::new)
    }

    fn exists(&self, hash: &Hash) -> bool {
        self.index.read().contains_key(hash)
    }

    fn info(&self) -> StorageInfo {
        StorageInfo {
            chunks_total: self.index.read().len() as u64,
            chunk_bytes_total: *self.bytes_total.read(),
        }
    }
}
