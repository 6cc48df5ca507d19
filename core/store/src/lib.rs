//! Content-addressed chunk storage and the chunked value representation.
//!
//! The crate is layered bottom-up:
//! - [`chunk`]: the immutable byte record every other layer is built from;
//! - [`store`]: the append-only content-addressed [`ChunkStore`] interface
//!   with memory- and file-backed implementations;
//! - [`loader`]: the per-operation chunk cache;
//! - [`db`]: a minimal sorted key-value [`db::Database`] used by the
//!   persistent head-version index;
//! - [`prolly`]: the content-defined balanced tree (rolling hasher, node
//!   views, builder, cursor);
//! - [`types`]: user-facing typed objects (`SBlob`, `SString`, `SList`,
//!   `SMap`, `SSet`) layered on the tree;
//! - [`cell`]: the UCell version-metadata chunk.

pub mod cell;
pub mod chunk;
pub mod db;
pub mod loader;
mod metrics;
pub mod prolly;
pub mod store;
pub mod types;

pub use cell::UCell;
pub use chunk::{Chunk, ChunkError};
pub use loader::ChunkLoader;
pub use store::{ChunkStore, FileChunkStore, MemoryChunkStore, StorageInfo, StoreError};
