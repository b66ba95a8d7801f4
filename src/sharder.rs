//! Sharder implementation.
use std::io::Cursor;

pub trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// Seed shared by every SDK that needs to agree on bucket placement.
pub const HASH_SEED: u32 = 1;

/// The default (and only) sharder: 32-bit MurmurHash3 (x86 variant), scaled into
/// `[0, total_shards)`.
pub struct Murmur3Sharder;

impl Sharder for Murmur3Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        // Reading from an in-memory cursor cannot fail. Should it ever, everything lands in the
        // first shard.
        let hash = murmur3::murmur3_32(&mut Cursor::new(input.as_ref()), HASH_SEED)
            .unwrap_or_else(|err| {
                log::warn!(target: "decision_core", "failed to hash bucketing key: {err}");
                0
            });
        // Scaling (rather than modulo) keeps placements identical to other implementations.
        (u64::from(hash) * total_shards) >> 32
    }
}
