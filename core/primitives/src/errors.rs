use borsh::{BorshDeserialize, BorshSerialize};

/// Error kinds surfaced to callers of the storage engine.
///
/// Every public worker operation returns `Result<T, ErrorCode>`; lower-level
/// store/log/io failures are converted to the nearest kind at the worker
/// boundary. The discriminants are stable: they travel in the status field
/// of response frames.
#[derive(
    thiserror::Error,
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    strum::IntoStaticStr,
    strum::FromRepr,
)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum ErrorCode {
    #[error("ok")]
    Ok = 0,
    #[error("unknown operation")]
    UnknownOp = 1,
    #[error("unknown command")]
    UnknownCommand = 2,
    #[error("invalid command argument")]
    InvalidCommandArgument = 3,
    #[error("invalid parameters")]
    InvalidParameters = 4,
    #[error("invalid range")]
    InvalidRange = 5,
    #[error("invalid value")]
    InvalidValue = 6,
    #[error("branch already exists")]
    BranchExists = 7,
    #[error("branch does not exist")]
    BranchNotExists = 8,
    #[error("key already exists")]
    KeyExists = 9,
    #[error("key does not exist")]
    KeyNotExists = 10,
    #[error("ucell not found")]
    UCellNotFound = 11,
    #[error("chunk does not exist")]
    ChunkNotExists = 12,
    #[error("referring version does not exist")]
    ReferringVersionNotExist = 13,
    #[error("inconsistent key")]
    InconsistentKey = 14,
    #[error("type unsupported")]
    TypeUnsupported = 15,
    #[error("type mismatch")]
    TypeMismatch = 16,
    #[error("index out of range")]
    IndexOutOfRange = 17,
    #[error("failed to create ucell")]
    FailedCreateUCell = 18,
    #[error("failed to create blob")]
    FailedCreateSBlob = 19,
    #[error("failed to create string")]
    FailedCreateSString = 20,
    #[error("failed to create list")]
    FailedCreateSList = 21,
    #[error("failed to create map")]
    FailedCreateSMap = 22,
    #[error("failed to modify blob")]
    FailedModifySBlob = 23,
    #[error("failed to modify list")]
    FailedModifySList = 24,
    #[error("failed to modify map")]
    FailedModifySMap = 25,
    #[error("merge conflict")]
    MergeConflict = 26,
    #[error("read failed")]
    ReadFailed = 27,
    #[error("write failed")]
    WriteFailed = 28,
    #[error("failed to open file")]
    FailedOpenFile = 29,
    #[error("table is empty")]
    EmptyTable = 30,
    #[error("table is not empty")]
    NotEmptyTable = 31,
    #[error("column does not exist")]
    ColumnNotExists = 32,
    #[error("row does not exist")]
    RowNotExists = 33,
}

impl ErrorCode {
    pub fn from_u8(byte: u8) -> ErrorCode {
        ErrorCode::from_repr(byte).unwrap_or(ErrorCode::UnknownOp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_round_trip() {
        for byte in 0..=ErrorCode::RowNotExists as u8 {
            assert_eq!(ErrorCode::from_u8(byte) as u8, byte);
        }
        assert_eq!(ErrorCode::from_u8(250), ErrorCode::UnknownOp);
    }

    #[test]
    fn displays_are_lowercase_phrases() {
        assert_eq!(ErrorCode::MergeConflict.to_string(), "merge conflict");
        assert_eq!(ErrorCode::BranchNotExists.to_string(), "branch does not exist");
    }
}
