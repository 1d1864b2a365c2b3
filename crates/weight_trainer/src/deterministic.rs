//! Deterministic utilities for reproducible training
//!
//! Provides hash-based row ordering and tie-breaking logic so that the same
//! data and seed always produce the same split and the same trees.

/// Deterministic xxhash64-like hash over raw 64-bit words
pub fn xxhash64(data: &[u64], seed: u64) -> u64 {
    const PRIME1: u64 = 0x9E3779B185EBCA87;
    const PRIME2: u64 = 0xC2B2AE3D27D4EB4F;
    const PRIME3: u64 = 0x165667B19E3779F9;
    const PRIME5: u64 = 0x85EBCA77C2B2AE63;

    let mut h = seed.wrapping_add(PRIME5);

    for &val in data {
        h = h.wrapping_add(val.wrapping_mul(PRIME3));
        h = h.rotate_left(17).wrapping_mul(PRIME2);
    }

    h ^= h >> 33;
    h = h.wrapping_mul(PRIME1);
    h ^= h >> 29;
    h = h.wrapping_mul(PRIME2);
    h ^= h >> 32;

    h
}

/// Hash a feature row and its target by their exact bit patterns
pub fn row_hash(features: &[f64], target: f64, seed: u64) -> u64 {
    let words: Vec<u64> = features
        .iter()
        .chain(std::iter::once(&target))
        .map(|v| v.to_bits())
        .collect();
    xxhash64(&words, seed)
}

/// Deterministic tie-breaker for split selection
/// Lower values win when two candidates have identical gain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    /// Position of the threshold among the feature's sorted distinct values
    pub threshold_rank: usize,
    pub node_id: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, threshold_rank: usize, node_id: usize) -> Self {
        Self {
            feature_idx,
            threshold_rank,
            node_id,
        }
    }
}
