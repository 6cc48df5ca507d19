//! Content-defined balanced tree ("Prolly tree") over chunks.
//!
//! Node boundaries are chosen by a rolling hash over chunk content, so
//! equal subsequences share subtrees across versions: an edit rewrites the
//! chunks on its path and reuses everything else by hash.

pub mod builder;
pub mod cursor;
pub mod node;
pub mod rolling;

pub use builder::{BuilderError, TreeBuilder};
pub use cursor::{CursorError, NodeCursor};
pub use node::{MetaEntry, NodeError, OrderedKey, SeqNode};
pub use rolling::{RollingHasher, TreeParams};
