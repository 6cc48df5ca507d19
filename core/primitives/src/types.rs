use borsh::{BorshDeserialize, BorshSerialize};

/// Identifier of a worker node within the cluster.
pub type WorkerId = u32;

/// User-visible value types.
///
/// Primitive types (`Bool`, `Num`) exist in the taxonomy for wire
/// compatibility but are not backed by chunked trees; storing them returns
/// `ErrorCode::TypeUnsupported`.
#[derive(
    PartialEq,
    Eq,
    Copy,
    Clone,
    Debug,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum UType {
    Bool = 0,
    Num = 1,
    String = 2,
    Blob = 3,
    List = 4,
    Set = 5,
    Map = 6,
}

/// Chunk types in the chunk store.
///
/// The discriminant is the first byte of every chunk record, so it is *not*
/// safe to renumber a variant.
#[derive(
    PartialEq,
    Eq,
    Copy,
    Clone,
    Debug,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum ChunkType {
    Null = 0,
    /// UCell chunk: version metadata linking a data root to its parents.
    Cell = 1,
    /// Internal Prolly-tree node: a sequence of meta entries.
    Meta = 2,
    /// Blob leaf: raw bytes.
    Blob = 3,
    /// Inline string payload, a single chunk rather than a tree.
    String = 4,
    /// List leaf: length-prefixed elements.
    List = 5,
    /// Map leaf: key/value entries ordered by key bytes.
    Map = 6,
    /// Set leaf: key entries ordered by key bytes.
    Set = 7,
    Invalid = 8,
}

impl ChunkType {
    pub fn from_u8(byte: u8) -> ChunkType {
        match byte {
            0 => ChunkType::Null,
            1 => ChunkType::Cell,
            2 => ChunkType::Meta,
            3 => ChunkType::Blob,
            4 => ChunkType::String,
            5 => ChunkType::List,
            6 => ChunkType::Map,
            7 => ChunkType::Set,
            _ => ChunkType::Invalid,
        }
    }

    /// Whether chunks of this type hold leaf elements of a chunked tree.
    pub fn is_leaf(self) -> bool {
        matches!(self, ChunkType::Blob | ChunkType::List | ChunkType::Map | ChunkType::Set)
    }

    /// Whether trees of this leaf type are ordered by element position
    /// rather than by key bytes.
    pub fn is_index_ordered(self) -> bool {
        matches!(self, ChunkType::Blob | ChunkType::List)
    }
}

impl UType {
    pub fn from_u8(byte: u8) -> Option<UType> {
        match byte {
            0 => Some(UType::Bool),
            1 => Some(UType::Num),
            2 => Some(UType::String),
            3 => Some(UType::Blob),
            4 => Some(UType::List),
            5 => Some(UType::Set),
            6 => Some(UType::Map),
            _ => None,
        }
    }

    /// Leaf chunk type backing values of this type, if it is tree-backed.
    pub fn leaf_chunk_type(self) -> Option<ChunkType> {
        match self {
            UType::Blob => Some(ChunkType::Blob),
            UType::List => Some(ChunkType::List),
            UType::Map => Some(ChunkType::Map),
            UType::Set => Some(ChunkType::Set),
            UType::String => Some(ChunkType::String),
            UType::Bool | UType::Num => None,
        }
    }
}
