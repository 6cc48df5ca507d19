//! Buz-hash rolling hasher providing the content-defined chunk boundaries
//! of the tree layer.

/// Chunking parameters, uniform across a tree.
///
/// A chunk boundary fires when the 32-bit rolling hash over the trailing
/// `window_size` bytes satisfies `hash & chunk_pattern == chunk_pattern`,
/// giving an expected chunk size of `chunk_pattern + 1` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    pub chunk_pattern: u32,
    pub window_size: usize,
}

impl TreeParams {
    /// Expected leaf size of roughly 4 KiB.
    pub const DEFAULT_CHUNK_PATTERN: u32 = (1 << 12) - 1;
    pub const DEFAULT_WINDOW_SIZE: usize = 64;
}

impl Default for TreeParams {
    fn default() -> TreeParams {
        TreeParams {
            chunk_pattern: TreeParams::DEFAULT_CHUNK_PATTERN,
            window_size: TreeParams::DEFAULT_WINDOW_SIZE,
        }
    }
}

/// 256-entry substitution table for the cyclic-polynomial hash, generated
/// deterministically so that boundaries are stable across processes.
const BUZ_TABLE: [u32; 256] = buz_table();

const fn buz_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut state: u64 = 0x9d8f_3cd2_75aa_41e3;
    let mut i = 0;
    while i < 256 {
        // splitmix64 step.
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        table[i] = (z >> 32) as u32;
        i += 1;
    }
    table
}

/// Rolling hasher over a byte stream.
///
/// State is reset at the start of every chunk: after a boundary is consumed
/// the window, the hash and the byte counter all start over, so boundary
/// positions depend only on the bytes since the previous boundary.
pub struct RollingHasher {
    params: TreeParams,
    window: Vec<u8>,
    window_pos: usize,
    hash: u32,
    bytes_hashed: usize,
    crossed_boundary: bool,
}

impl RollingHasher {
    pub fn new(params: TreeParams) -> RollingHasher {
        RollingHasher {
            params,
            window: vec![0; params.window_size],
            window_pos: 0,
            hash: 0,
            bytes_hashed: 0,
            crossed_boundary: false,
        }
    }

    pub fn params(&self) -> TreeParams {
        self.params
    }

    /// Feeds one byte. The boundary flag is sticky until [`Self::reset`].
    pub fn hash_byte(&mut self, byte: u8) {
        let rot = (self.params.window_size % 32) as u32;
        let outgoing = self.window[self.window_pos];
        self.window[self.window_pos] = byte;
        self.window_pos = (self.window_pos + 1) % self.params.window_size;
        self.hash = self.hash.rotate_left(1)
            ^ BUZ_TABLE[outgoing as usize].rotate_left(rot)
            ^ BUZ_TABLE[byte as usize];
        self.bytes_hashed += 1;
        if self.bytes_hashed >= self.params.window_size
            && self.hash & self.params.chunk_pattern == self.params.chunk_pattern
        {
            self.crossed_boundary = true;
        }
    }

    pub fn hash_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.hash_byte(byte);
        }
    }

    pub fn crossed_boundary(&self) -> bool {
        self.crossed_boundary
    }

    /// Clears all state for the next chunk.
    pub fn reset(&mut self) {
        self.window.fill(0);
        self.window_pos = 0;
        self.hash = 0;
        self.bytes_hashed = 0;
        self.crossed_boundary = false;
    }
}

/// Aggressive parameters so unit tests build multi-level trees on small
/// inputs: ~256-byte chunks, comfortably above one encoded meta entry.
#[cfg(test)]
pub(crate) fn test_params() -> TreeParams {
    TreeParams { chunk_pattern: (1 << 8) - 1, window_size: 8 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_deterministic() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let run = |params: TreeParams| {
            let mut hasher = RollingHasher::new(params);
            let mut boundaries = Vec::new();
            for (i, &b) in data.iter().enumerate() {
                hasher.hash_byte(b);
                if hasher.crossed_boundary() {
                    boundaries.push(i);
                    hasher.reset();
                }
            }
            boundaries
        };
        let a = run(test_params());
        let b = run(test_params());
        assert_eq!(a, b);
        assert!(!a.is_empty(), "pattern {:#x} produced no boundaries", test_params().chunk_pattern);
    }

    #[test]
    fn no_boundary_before_window_fills() {
        let mut hasher = RollingHasher::new(TreeParams { chunk_pattern: 0, window_size: 16 });
        // Pattern 0 matches every hash value, but only once the window has
        // seen window_size bytes.
        for _ in 0..15 {
            hasher.hash_byte(0xab);
            assert!(!hasher.crossed_boundary());
        }
        hasher.hash_byte(0xab);
        assert!(hasher.crossed_boundary());
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut hasher = RollingHasher::new(test_params());
        hasher.hash_bytes(b"some content that fills the window multiple times over");
        hasher.reset();
        assert!(!hasher.crossed_boundary());

        // After reset the same input yields the same hash trajectory.
        let mut fresh = RollingHasher::new(test_params());
        hasher.hash_bytes(b"replayed input");
        fresh.hash_bytes(b"replayed input");
        assert_eq!(hasher.hash, fresh.hash);
    }

    #[test]
    fn identical_content_same_boundaries_after_prefix_change() {
        // Content-defined chunking: a shared suffix re-synchronizes.
        let suffix: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        let boundaries_of = |prefix: &[u8]| {
            let mut hasher = RollingHasher::new(test_params());
            let mut data = prefix.to_vec();
            data.extend_from_slice(&suffix);
            let mut cuts = Vec::new();
            for (i, &b) in data.iter().enumerate() {
                hasher.hash_byte(b);
                if hasher.crossed_boundary() {
                    cuts.push(i as i64 - prefix.len() as i64);
                    hasher.reset();
                }
            }
            cuts
        };
        let a = boundaries_of(b"short");
        let b = boundaries_of(b"a considerably longer prefix string");
        // Once both runs re-align on the suffix, cuts coincide.
        let tail_a: Vec<_> = a.iter().rev().take(3).collect();
        let tail_b: Vec<_> = b.iter().rev().take(3).collect();
        assert_eq!(tail_a, tail_b);
    }
}
