use ustore_primitives::{ChunkType, Hash};

/// Byte offset of the type tag within a chunk record.
const TYPE_OFFSET: usize = 0;
/// Byte offset of the little-endian length field.
const LENGTH_OFFSET: usize = 1;
/// Byte offset of the payload.
pub const PAYLOAD_OFFSET: usize = 5;
/// The stored length field equals `payload_len + LENGTH_BIAS`.
const LENGTH_BIAS: u32 = 9;

/// Immutable, content-addressed byte record.
///
/// Layout: `[type: 1][length: 4 LE][payload]` where the length field is the
/// payload length plus [`LENGTH_BIAS`]. The hash is the content digest of
/// the entire record, computed once on construction and cached. A chunk is
/// never mutated; identical payloads produce identical hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    data: Vec<u8>,
    hash: Hash,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk record too short: {0} bytes")]
    TooShort(usize),
    #[error("chunk length field {field} does not match record of {actual} bytes")]
    LengthMismatch { field: u32, actual: usize },
    #[error("invalid chunk type byte: {0}")]
    InvalidType(u8),
}

impl Chunk {
    /// Assembles a record of the given type around a payload.
    pub fn new(chunk_type: ChunkType, payload: &[u8]) -> Chunk {
        let mut data = Vec::with_capacity(PAYLOAD_OFFSET + payload.len());
        data.push(chunk_type as u8);
        data.extend_from_slice(&(payload.len() as u32 + LENGTH_BIAS).to_le_bytes());
        data.extend_from_slice(payload);
        let hash = Hash::compute(&data);
        Chunk { data, hash }
    }

    /// Parses an on-disk record, validating the header.
    pub fn from_record(data: Vec<u8>) -> Result<Chunk, ChunkError> {
        if data.len() < PAYLOAD_OFFSET {
            return Err(ChunkError::TooShort(data.len()));
        }
        if ChunkType::from_u8(data[TYPE_OFFSET]) == ChunkType::Invalid {
            return Err(ChunkError::InvalidType(data[TYPE_OFFSET]));
        }
        let field = Chunk::length_field(&data);
        let expect = (data.len() - PAYLOAD_OFFSET) as u32 + LENGTH_BIAS;
        if field != expect {
            return Err(ChunkError::LengthMismatch { field, actual: data.len() });
        }
        let hash = Hash::compute(&data);
        Ok(Chunk { data, hash })
    }

    /// Payload length encoded in a record header, without reading the body.
    /// Used by the file store to delimit records while scanning.
    pub fn payload_len_from_header(header: &[u8; PAYLOAD_OFFSET]) -> Result<usize, ChunkError> {
        if ChunkType::from_u8(header[TYPE_OFFSET]) == ChunkType::Invalid {
            return Err(ChunkError::InvalidType(header[TYPE_OFFSET]));
        }
        let field = Chunk::length_field(header);
        if field < LENGTH_BIAS {
            return Err(ChunkError::LengthMismatch { field, actual: 0 });
        }
        Ok((field - LENGTH_BIAS) as usize)
    }

    fn length_field(data: &[u8]) -> u32 {
        u32::from_le_bytes([
            data[LENGTH_OFFSET],
            data[LENGTH_OFFSET + 1],
            data[LENGTH_OFFSET + 2],
            data[LENGTH_OFFSET + 3],
        ])
    }

    pub fn chunk_type(&self) -> ChunkType {
        ChunkType::from_u8(self.data[TYPE_OFFSET])
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The entire record, header included.
    pub fn record(&self) -> &[u8] {
        &self.data
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[PAYLOAD_OFFSET..]
    }

    pub fn num_bytes(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn record_layout() {
        let chunk = Chunk::new(ChunkType::Blob, b"hello");
        assert_eq!(chunk.record()[0], ChunkType::Blob as u8);
        assert_eq!(chunk.record()[1..5], (5u32 + 9).to_le_bytes());
        assert_eq!(chunk.payload(), b"hello");
        assert_eq!(chunk.num_bytes(), 10);
    }

    #[test]
    fn hash_is_digest_of_record() {
        let chunk = Chunk::new(ChunkType::List, b"abc");
        assert_eq!(chunk.hash(), Hash::compute(chunk.record()));
        // Same payload, same type => same hash.
        assert_eq!(chunk.hash(), Chunk::new(ChunkType::List, b"abc").hash());
        // Same payload, different type => different record, different hash.
        assert_ne!(chunk.hash(), Chunk::new(ChunkType::Blob, b"abc").hash());
    }

    #[test]
    fn from_record_round_trip() {
        let chunk = Chunk::new(ChunkType::Map, b"payload bytes");
        let parsed = Chunk::from_record(chunk.record().to_vec()).unwrap();
        assert_eq!(parsed, chunk);
    }

    #[test]
    fn from_record_rejects_garbage() {
        assert_matches!(Chunk::from_record(vec![1, 2]), Err(ChunkError::TooShort(2)));
        let mut record = Chunk::new(ChunkType::Blob, b"x").record().to_vec();
        record[1] = 0xff;
        assert_matches!(Chunk::from_record(record), Err(ChunkError::LengthMismatch { .. }));
        let bad_type = vec![200, 9, 0, 0, 0];
        assert_matches!(Chunk::from_record(bad_type), Err(ChunkError::InvalidType(200)));
    }

    #[test]
    fn empty_payload() {
        let chunk = Chunk::new(ChunkType::Blob, b"");
        assert_eq!(chunk.payload(), b"");
        assert_eq!(Chunk::payload_len_from_header(&[3, 9, 0, 0, 0]).unwrap(), 0);
    }
}
