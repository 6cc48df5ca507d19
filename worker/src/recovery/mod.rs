//! Append-only log of head-version mutations, replayed on restart.
//!
//! Only branch-head changes are logged; value chunks and UCells are
//! already durable in the chunk store and need no logging.

mod record;
mod writer;

pub use record::{
    LogCommand, LogEntry, LogOp, MAGIC, RECORD_HEADER_LEN, RecordError, decode_entry,
    encode_entry,
};
pub use writer::{LogCursor, LogSettings, LogWriter};

use std::io::Read;
use std::path::Path;

/// Outcome of scanning a log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub records: u64,
    /// Bytes up to the end of the last valid record; appends resume here.
    pub valid_bytes: u64,
}

/// Scans the log in order, verifying each record's magic and checksums, and
/// hands valid operations to `apply`. The scan stops at the first record
/// that fails verification; the partial tail is discarded.
pub fn replay(
    path: &Path,
    mut apply: impl FnMut(u64, LogOp),
) -> std::io::Result<ReplayStats> {
    let mut buf = Vec::new();
    match std::fs::File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut buf)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ReplayStats::default());
        }
        Err(err) => return Err(err),
    }
    let mut stats = ReplayStats::default();
    let mut pos = 0usize;
    while pos < buf.len() {
        match decode_entry(&buf[pos..]) {
            Ok((entry, used)) => {
                match LogOp::decode(entry.cmd, &entry.payload) {
                    Ok(op) => apply(entry.seq_id, op),
                    Err(err) => {
                        tracing::warn!(target: "recovery", %err, offset = pos, "undecodable log payload, stopping replay");
                        break;
                    }
                }
                pos += used;
                stats.records += 1;
            }
            Err(err) => {
                tracing::warn!(target: "recovery", %err, offset = pos, "log scan stopped at invalid record");
                break;
            }
        }
    }
    stats.valid_bytes = pos as u64;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use ustore_primitives::Hash;

    fn update(n: u32) -> LogOp {
        LogOp::Update {
            key: format!("key-{n}").into_bytes(),
            branch: b"master".to_vec(),
            version: Hash::compute(&n.to_le_bytes()),
        }
    }

    #[test]
    fn write_and_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ustore.log");
        {
            let writer =
                LogWriter::open(&path, LogSettings { strong_sync: true, ..Default::default() }, 0)
                    .unwrap();
            for n in 0..20 {
                writer.append(&update(n)).unwrap();
            }
            writer.append(&LogOp::Rename {
                key: b"key-0".to_vec(),
                old: b"master".to_vec(),
                new: b"main".to_vec(),
            })
            .unwrap();
            writer
                .append(&LogOp::Remove { key: b"key-1".to_vec(), branch: b"master".to_vec() })
                .unwrap();
        }
        let mut ops = Vec::new();
        let stats = replay(&path, |seq, op| ops.push((seq, op))).unwrap();
        assert_eq!(stats.records, 22);
        assert_eq!(ops.len(), 22);
        assert_eq!(ops[0].1, update(0));
        assert_eq!(ops[0].0, 1);
        assert_eq!(
            ops[20].1,
            LogOp::Rename {
                key: b"key-0".to_vec(),
                old: b"master".to_vec(),
                new: b"main".to_vec()
            }
        );
        // Sequence numbers are dense and ordered.
        for (i, (seq, _)) in ops.iter().enumerate() {
            assert_eq!(*seq, i as u64 + 1);
        }
    }

    #[test]
    fn corrupt_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ustore.log");
        {
            let writer =
                LogWriter::open(&path, LogSettings { strong_sync: true, ..Default::default() }, 0)
                    .unwrap();
            for n in 0..5 {
                writer.append(&update(n)).unwrap();
            }
        }
        let clean = replay(&path, |_, _| {}).unwrap();

        // A flipped byte inside the last record invalidates its checksum.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 3;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        let mut ops = Vec::new();
        let stats = replay(&path, |_, op| ops.push(op)).unwrap();
        assert_eq!(stats.records, 4);
        assert!(stats.valid_bytes < clean.valid_bytes);

        // Garbage appended after valid records is ignored too.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(stats.valid_bytes as usize);
        bytes.extend_from_slice(b"\x00\x17garbage tail");
        std::fs::write(&path, &bytes).unwrap();
        let stats2 = replay(&path, |_, _| {}).unwrap();
        assert_eq!(stats2.records, 4);
        assert_eq!(stats2.valid_bytes, stats.valid_bytes);
    }

    #[test]
    fn missing_file_is_an_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let stats = replay(&dir.path().join("absent.log"), |_, _| panic!()).unwrap();
        assert_eq!(stats, ReplayStats::default());
    }

    #[test]
    fn append_resumes_after_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ustore.log");
        {
            let writer =
                LogWriter::open(&path, LogSettings { strong_sync: true, ..Default::default() }, 0)
                    .unwrap();
            writer.append(&update(0)).unwrap();
            writer.append(&update(1)).unwrap();
        }
        // Simulate a crash mid-append.
        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&MAGIC.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }
        let stats = replay(&path, |_, _| {}).unwrap();
        assert_eq!(stats.records, 2);
        {
            let writer = LogWriter::open(
                &path,
                LogSettings { strong_sync: true, ..Default::default() },
                stats.valid_bytes,
            )
            .unwrap();
            writer.append(&update(2)).unwrap();
        }
        let mut ops = Vec::new();
        replay(&path, |_, op| ops.push(op)).unwrap();
        assert_eq!(ops, vec![update(0), update(1), update(2)]);
    }
}
