//! Stream Descriptor and Partition Routing
//!
//! A stream is a named, partitioned, ordered, append-only sequence of
//! records. The stream itself owns no storage - the only state it carries is
//! its name and partition count, plus the pure routing function from record
//! key to partition.
//!
//! ## Why SipHash?
//! - Deterministic: the same key always produces the same hash, so the same
//!   key always lands on the same partition for a given partition count -
//!   this is what per-key ordering is built on
//! - Stable: independent of process, restart and `HashMap` seed randomization
//! - Fast: no cryptographic overhead

use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher;

/// Descriptor of a named, partitioned stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    name: String,
    partitions: u32,
}

impl Stream {
    /// Create a stream descriptor. `partitions` is clamped to at least 1.
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions: partitions.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Partition this stream routes `key` to.
    pub fn partition_of(&self, key: &str) -> u32 {
        partition_for_key(key, self.partitions)
    }
}

/// Deterministic key -> partition routing.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let mut hasher = SipHasher::new();
    hasher.write(key.as_bytes());
    (hasher.finish() % u64::from(partitions.max(1))) as u32
}
