//! On-disk framing of recovery-log records.
//!
//! A record is `header || seq_id u64 || cmd_id u32 || payload`, all
//! little-endian. The header is
//! `{magic u16, header_len u16, version u16, header_checksum u16,
//!   payload_len u32, payload_compressed_len u32, payload_checksum u64}`.
//! The payload checksum is a digest over `seq_id || cmd_id || payload`, so
//! a torn or bit-flipped tail never replays.

use sha2::Digest;
use ustore_primitives::Hash;

pub const MAGIC: u16 = 0xFFFF;
pub const LOG_VERSION: u16 = 1;
/// Fixed header size in bytes.
pub const RECORD_HEADER_LEN: usize = 24;
/// seq_id + cmd_id.
const ENTRY_PREFIX_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LogCommand {
    Update = 111,
    Rename = 112,
    Remove = 113,
}

impl LogCommand {
    fn from_u32(raw: u32) -> Option<LogCommand> {
        match raw {
            111 => Some(LogCommand::Update),
            112 => Some(LogCommand::Rename),
            113 => Some(LogCommand::Remove),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record truncated")]
    Truncated,
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),
    #[error("unsupported log version {0}")]
    BadVersion(u16),
    #[error("header checksum mismatch")]
    HeaderChecksum,
    #[error("payload checksum mismatch")]
    PayloadChecksum,
    #[error("unknown log command {0}")]
    UnknownCommand(u32),
    #[error("malformed payload")]
    BadPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq_id: u64,
    pub cmd: LogCommand,
    pub payload: Vec<u8>,
}

/// Head-version mutation carried by a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    Update { key: Vec<u8>, branch: Vec<u8>, version: Hash },
    Rename { key: Vec<u8>, old: Vec<u8>, new: Vec<u8> },
    Remove { key: Vec<u8>, branch: Vec<u8> },
}

impl LogOp {
    pub fn command(&self) -> LogCommand {
        match self {
            LogOp::Update { .. } => LogCommand::Update,
            LogOp::Rename { .. } => LogCommand::Rename,
            LogOp::Remove { .. } => LogCommand::Remove,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            LogOp::Update { key, branch, version } => {
                put_slice(&mut out, key);
                put_slice(&mut out, branch);
                out.extend_from_slice(version.as_bytes());
            }
            LogOp::Rename { key, old, new } => {
                put_slice(&mut out, key);
                put_slice(&mut out, old);
                put_slice(&mut out, new);
            }
            LogOp::Remove { key, branch } => {
                put_slice(&mut out, key);
                put_slice(&mut out, branch);
            }
        }
        out
    }

    pub fn decode(cmd: LogCommand, payload: &[u8]) -> Result<LogOp, RecordError> {
        let mut pos = 0usize;
        let op = match cmd {
            LogCommand::Update => {
                let key = take_slice(payload, &mut pos)?;
                let branch = take_slice(payload, &mut pos)?;
                if payload.len() - pos != 20 {
                    return Err(RecordError::BadPayload);
                }
                let version =
                    Hash::from_slice(&payload[pos..]).map_err(|_| RecordError::BadPayload)?;
                pos = payload.len();
                LogOp::Update { key, branch, version }
            }
            LogCommand::Rename => {
                let key = take_slice(payload, &mut pos)?;
                let old = take_slice(payload, &mut pos)?;
                let new = take_slice(payload, &mut pos)?;
                LogOp::Rename { key, old, new }
            }
            LogCommand::Remove => {
                let key = take_slice(payload, &mut pos)?;
                let branch = take_slice(payload, &mut pos)?;
                LogOp::Remove { key, branch }
            }
        };
        if pos != payload.len() {
            return Err(RecordError::BadPayload);
        }
        Ok(op)
    }
}

fn put_slice(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
}

fn take_slice(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, RecordError> {
    if *pos + 2 > buf.len() {
        return Err(RecordError::BadPayload);
    }
    let len = u16::from_le_bytes([buf[*pos], buf[*pos + 1]]) as usize;
    *pos += 2;
    if *pos + len > buf.len() {
        return Err(RecordError::BadPayload);
    }
    let out = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

fn payload_checksum(seq_id: u64, cmd_id: u32, payload: &[u8]) -> u64 {
    let mut hasher = sha2::Sha256::new();
    hasher.update(seq_id.to_le_bytes());
    hasher.update(cmd_id.to_le_bytes());
    hasher.update(payload);
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("fixed-width slice"))
}

/// XOR fold of the header's 16-bit words, with the checksum field zeroed.
fn header_checksum(header: &[u8; RECORD_HEADER_LEN]) -> u16 {
    let mut acc = 0u16;
    for (i, pair) in header.chunks_exact(2).enumerate() {
        if i == 3 {
            continue;
        }
        acc ^= u16::from_le_bytes([pair[0], pair[1]]);
    }
    acc
}

/// Frames one record.
pub fn encode_entry(seq_id: u64, op: &LogOp) -> Vec<u8> {
    let payload = op.encode();
    let cmd_id = op.command() as u32;
    let mut header = [0u8; RECORD_HEADER_LEN];
    header[0..2].copy_from_slice(&MAGIC.to_le_bytes());
    header[2..4].copy_from_slice(&(RECORD_HEADER_LEN as u16).to_le_bytes());
    header[4..6].copy_from_slice(&LOG_VERSION.to_le_bytes());
    // header[6..8] = checksum, filled below.
    header[8..12].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    // No compression: the compressed length always equals the raw length.
    header[12..16].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[16..24].copy_from_slice(&payload_checksum(seq_id, cmd_id, &payload).to_le_bytes());
    let checksum = header_checksum(&header);
    header[6..8].copy_from_slice(&checksum.to_le_bytes());

    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + ENTRY_PREFIX_LEN + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&seq_id.to_le_bytes());
    out.extend_from_slice(&cmd_id.to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Verifies and decodes the record at the start of `buf`, returning the
/// entry and the bytes consumed.
pub fn decode_entry(buf: &[u8]) -> Result<(LogEntry, usize), RecordError> {
    if buf.len() < RECORD_HEADER_LEN + ENTRY_PREFIX_LEN {
        return Err(RecordError::Truncated);
    }
    let mut header = [0u8; RECORD_HEADER_LEN];
    header.copy_from_slice(&buf[..RECORD_HEADER_LEN]);
    let magic = u16::from_le_bytes([header[0], header[1]]);
    if magic != MAGIC {
        return Err(RecordError::BadMagic(magic));
    }
    let header_len = u16::from_le_bytes([header[2], header[3]]);
    if header_len as usize != RECORD_HEADER_LEN {
        return Err(RecordError::Truncated);
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != LOG_VERSION {
        return Err(RecordError::BadVersion(version));
    }
    let stored_checksum = u16::from_le_bytes([header[6], header[7]]);
    if stored_checksum != header_checksum(&header) {
        return Err(RecordError::HeaderChecksum);
    }
    let payload_len = u32::from_le_bytes(header[8..12].try_into().expect("fixed-width")) as usize;
    let compressed_len =
        u32::from_le_bytes(header[12..16].try_into().expect("fixed-width")) as usize;
    if compressed_len != payload_len {
        return Err(RecordError::BadPayload);
    }
    let stored_payload_checksum =
        u64::from_le_bytes(header[16..24].try_into().expect("fixed-width"));

    let total = RECORD_HEADER_LEN + ENTRY_PREFIX_LEN + payload_len;
    if buf.len() < total {
        return Err(RecordError::Truncated);
    }
    let seq_id = u64::from_le_bytes(
        buf[RECORD_HEADER_LEN..RECORD_HEADER_LEN + 8].try_into().expect("fixed-width"),
    );
    let cmd_id = u32::from_le_bytes(
        buf[RECORD_HEADER_LEN + 8..RECORD_HEADER_LEN + 12].try_into().expect("fixed-width"),
    );
    let payload = buf[RECORD_HEADER_LEN + ENTRY_PREFIX_LEN..total].to_vec();
    if payload_checksum(seq_id, cmd_id, &payload) != stored_payload_checksum {
        return Err(RecordError::PayloadChecksum);
    }
    let cmd = LogCommand::from_u32(cmd_id).ok_or(RecordError::UnknownCommand(cmd_id))?;
    Ok((LogEntry { seq_id, cmd, payload }, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample_op() -> LogOp {
        LogOp::Update {
            key: b"k1".to_vec(),
            branch: b"master".to_vec(),
            version: Hash::compute(b"v1"),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let record = encode_entry(7, &sample_op());
        let (entry, used) = decode_entry(&record).unwrap();
        assert_eq!(used, record.len());
        assert_eq!(entry.seq_id, 7);
        assert_eq!(entry.cmd, LogCommand::Update);
        assert_eq!(LogOp::decode(entry.cmd, &entry.payload).unwrap(), sample_op());
    }

    #[test]
    fn all_ops_round_trip() {
        let ops = [
            sample_op(),
            LogOp::Rename { key: b"k".to_vec(), old: b"a".to_vec(), new: b"b".to_vec() },
            LogOp::Remove { key: b"k".to_vec(), branch: b"a".to_vec() },
        ];
        for op in &ops {
            let decoded = LogOp::decode(op.command(), &op.encode()).unwrap();
            assert_eq!(decoded, *op);
        }
    }

    #[test]
    fn bad_magic_rejected() {
        let mut record = encode_entry(1, &sample_op());
        record[0] = 0;
        assert_matches!(decode_entry(&record), Err(RecordError::BadMagic(_)));
    }

    #[test]
    fn header_corruption_rejected() {
        let mut record = encode_entry(1, &sample_op());
        record[4] ^= 0x01; // version field
        // Either the version check or the header checksum trips.
        assert!(decode_entry(&record).is_err());
        let mut record = encode_entry(1, &sample_op());
        record[9] ^= 0x01; // payload length
        assert_matches!(decode_entry(&record), Err(RecordError::HeaderChecksum));
    }

    #[test]
    fn payload_corruption_rejected() {
        let mut record = encode_entry(1, &sample_op());
        let last = record.len() - 1;
        record[last] ^= 0x40;
        assert_matches!(decode_entry(&record), Err(RecordError::PayloadChecksum));
        // Tampered sequence ids fail the payload digest too.
        let mut record = encode_entry(1, &sample_op());
        record[RECORD_HEADER_LEN] ^= 0x01;
        assert_matches!(decode_entry(&record), Err(RecordError::PayloadChecksum));
    }

    #[test]
    fn truncation_rejected() {
        let record = encode_entry(1, &sample_op());
        assert_matches!(decode_entry(&record[..10]), Err(RecordError::Truncated));
        assert_matches!(
            decode_entry(&record[..record.len() - 1]),
            Err(RecordError::Truncated)
        );
    }
}
