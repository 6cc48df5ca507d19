use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
use std::fmt;
use std::str::FromStr;

/// Number of bytes of a content digest.
pub const HASH_BYTE_LEN: usize = 20;

/// Number of characters of the Base32 rendering of a digest.
/// 20 bytes = 160 bits = 32 groups of 5 bits.
pub const HASH_STRING_LEN: usize = 32;

/// Base32 alphabet used for printable hashes. The index of a character is
/// its 5-bit value.
const BASE32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

/// 20-byte content digest identifying a chunk.
///
/// A `Hash` is a plain value object: cheap to copy, lexicographically
/// ordered, printable as 32 characters of Base32. The all-zero value
/// [`Hash::NULL`] is a sentinel meaning "no parent" / "empty data" and is
/// never the digest of actual content.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize, Default,
)]
pub struct Hash(pub [u8; HASH_BYTE_LEN]);

impl Hash {
    /// The distinguished all-zero hash.
    pub const NULL: Hash = Hash([0; HASH_BYTE_LEN]);

    /// Digest of a byte slice: SHA-256 truncated to 20 bytes.
    pub fn compute(bytes: &[u8]) -> Hash {
        let digest = sha2::Sha256::digest(bytes);
        let mut buf = [0; HASH_BYTE_LEN];
        buf.copy_from_slice(&digest[..HASH_BYTE_LEN]);
        Hash(buf)
    }

    pub fn is_null(&self) -> bool {
        *self == Hash::NULL
    }

    pub fn as_bytes(&self) -> &[u8; HASH_BYTE_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Hash, HashParseError> {
        if bytes.len() != HASH_BYTE_LEN {
            return Err(HashParseError::BadLength(bytes.len()));
        }
        let mut buf = [0; HASH_BYTE_LEN];
        buf.copy_from_slice(bytes);
        Ok(Hash(buf))
    }

    /// Renders the digest as 32 characters over the `0-9A-V` alphabet.
    pub fn to_base32(&self) -> String {
        let mut out = String::with_capacity(HASH_STRING_LEN);
        let mut acc: u32 = 0;
        let mut acc_bits = 0;
        for &byte in &self.0 {
            acc = (acc << 8) | u32::from(byte);
            acc_bits += 8;
            while acc_bits >= 5 {
                acc_bits -= 5;
                let idx = ((acc >> acc_bits) & 0x1f) as usize;
                out.push(BASE32_ALPHABET[idx] as char);
            }
        }
        debug_assert_eq!(acc_bits, 0);
        out
    }

    pub fn from_base32(s: &str) -> Result<Hash, HashParseError> {
        if s.len() != HASH_STRING_LEN {
            return Err(HashParseError::BadLength(s.len()));
        }
        let mut buf = [0; HASH_BYTE_LEN];
        let mut acc: u32 = 0;
        let mut acc_bits = 0;
        let mut pos = 0;
        for ch in s.bytes() {
            let val = match ch {
                b'0'..=b'9' => ch - b'0',
                b'A'..=b'V' => ch - b'A' + 10,
                _ => return Err(HashParseError::BadCharacter(ch as char)),
            };
            acc = (acc << 5) | u32::from(val);
            acc_bits += 5;
            if acc_bits >= 8 {
                acc_bits -= 8;
                buf[pos] = ((acc >> acc_bits) & 0xff) as u8;
                pos += 1;
            }
        }
        debug_assert_eq!(pos, HASH_BYTE_LEN);
        Ok(Hash(buf))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HashParseError {
    #[error("invalid hash length: {0}")]
    BadLength(usize),
    #[error("invalid base32 character: {0:?}")]
    BadCharacter(char),
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_base32(s)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
