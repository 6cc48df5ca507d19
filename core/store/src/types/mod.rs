//! User-facing typed objects layered on the chunked tree: `SBlob`,
//! `SString`, `SList`, `SMap`, `SSet`, and the structural diffs.
//!
//! All objects are handles `(loader, root hash)`; mutating operations write
//! new chunks and return the new root, leaving every previous version
//! intact.

use crate::prolly::builder::BuilderError;
use crate::prolly::cursor::CursorError;
use crate::prolly::node::NodeError;
use crate::store::StoreError;
use ustore_primitives::ChunkType;

pub mod blob;
pub mod diff;
pub mod list;
pub mod map;
pub mod set;
pub mod string;

pub use blob::SBlob;
pub use list::SList;
pub use map::SMap;
pub use set::SSet;
pub use string::SString;

#[derive(thiserror::Error, Debug)]
pub enum TypeError {
    #[error("expected a {expected:?} tree, found {found:?}")]
    TypeMismatch { expected: ChunkType, found: ChunkType },
    #[error("position {idx} out of range for {size} elements")]
    IndexOutOfRange { idx: u64, size: u64 },
    #[error("keys and values differ in length: {keys} vs {vals}")]
    KeyValueMismatch { keys: usize, vals: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error(transparent)]
    Builder(BuilderError),
}

impl From<BuilderError> for TypeError {
    fn from(err: BuilderError) -> TypeError {
        match err {
            BuilderError::RangeOutOfBounds { pos, dels, size } => {
                TypeError::IndexOutOfRange { idx: pos + dels, size }
            }
            other => TypeError::Builder(other),
        }
    }
}

/// Verifies a root chunk belongs to a tree with the expected leaf type.
/// Internal nodes are accepted as-is; their children are checked lazily as
/// traversals reach them.
pub(crate) fn check_root(chunk_type: ChunkType, expected: ChunkType) -> Result<(), TypeError> {
    if chunk_type == ChunkType::Meta || chunk_type == expected {
        Ok(())
    } else {
        Err(TypeError::TypeMismatch { expected, found: chunk_type })
    }
}
