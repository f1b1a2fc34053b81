//! Record Data Structure
//!
//! This module defines the core `Record` type - the atomic unit of data that
//! flows through every logflow stream.
//!
//! ## What is a Record?
//! A record is a single message in a partitioned stream, similar to:
//! - A Kafka message
//! - A log entry
//! - A work item pushed to a bulk action
//!
//! ## Structure
//! Each record carries:
//! - **key**: Required, non-empty. Drives partition routing; records sharing a
//!   key always land on the same partition and keep their relative order.
//! - **value**: Optional payload (arbitrary bytes). Control records carry no
//!   meaningful payload and consumers ignore it.
//! - **control flag**: At most one of two in-band signals:
//!   - *poison*: orderly shutdown of the consuming (computation, partition)
//!   - *force batch*: an immediate batch boundary at the consumer, regardless
//!     of its count/time thresholds
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` for zero-copy payload handling
//! - Fields are private: the constructors are the only way to build a record,
//!   which is what enforces the key and flag invariants
//! - An empty payload is normalized to "no payload" so that the wire frame
//!   (which encodes absence as a zero length) round-trips exactly
//! - The two control flags are mutually exclusive; asking for both fails with
//!   `Error::InvalidRecord`

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Flag bit marking a poison (shutdown) record. Matches wire bit 0.
pub const FLAG_POISON: u8 = 0b0000_0001;

/// Flag bit marking a forced batch boundary. Matches wire bit 1.
pub const FLAG_FORCE_BATCH: u8 = 0b0000_0010;

const FLAG_MASK: u8 = FLAG_POISON | FLAG_FORCE_BATCH;

/// A single record in a stream.
///
/// Immutable once constructed. Equality and hashing cover the key, the
/// payload and both control flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    key: String,
    value: Option<Bytes>,
    flags: u8,
}

impl Record {
    /// Create a record, validating every invariant.
    ///
    /// # Errors
    ///
    /// - `InvalidRecord` if `key` is empty
    /// - `InvalidRecord` if both `poison` and `force_batch` are requested
    pub fn new(
        key: impl Into<String>,
        value: Option<Bytes>,
        poison: bool,
        force_batch: bool,
    ) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidRecord("key must not be empty".into()));
        }
        if poison && force_batch {
            return Err(Error::InvalidRecord(
                "poison and force-batch flags are mutually exclusive".into(),
            ));
        }
        let mut flags = 0;
        if poison {
            flags |= FLAG_POISON;
        }
        if force_batch {
            flags |= FLAG_FORCE_BATCH;
        }
        Ok(Self {
            key,
            // An empty payload and an absent payload share a wire encoding;
            // normalize here so encode/decode round-trips exactly.
            value: value.filter(|v| !v.is_empty()),
            flags,
        })
    }

    /// Create a plain data record.
    pub fn of(key: impl Into<String>, value: impl Into<Bytes>) -> Result<Self> {
        Self::new(key, Some(value.into()), false, false)
    }

    /// Create a data record without a payload.
    pub fn of_key(key: impl Into<String>) -> Result<Self> {
        Self::new(key, None, false, false)
    }

    /// Create a poison record: the consuming partition drains and stops.
    pub fn poison(key: impl Into<String>) -> Result<Self> {
        Self::new(key, None, true, false)
    }

    /// Create a force-batch record: the consumer checkpoints right after it.
    pub fn force_batch(key: impl Into<String>) -> Result<Self> {
        Self::new(key, None, false, true)
    }

    /// Rebuild a record from raw wire parts. Used by the frame decoder.
    pub(crate) fn from_wire(key: String, value: Option<Bytes>, flags: u8) -> Result<Self> {
        if flags & !FLAG_MASK != 0 {
            return Err(Error::InvalidFrame(format!(
                "unknown flag bits 0b{flags:08b}"
            )));
        }
        Self::new(
            key,
            value,
            flags & FLAG_POISON != 0,
            flags & FLAG_FORCE_BATCH != 0,
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn is_poison(&self) -> bool {
        self.flags & FLAG_POISON != 0
    }

    pub fn is_force_batch(&self) -> bool {
        self.flags & FLAG_FORCE_BATCH != 0
    }

    /// True for either in-band control signal.
    pub fn is_control(&self) -> bool {
        self.flags != 0
    }

    /// Raw flag byte as written on the wire.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Estimate the in-memory size of this record in bytes.
    pub fn estimated_size(&self) -> usize {
        self.key.len() + self.value.as_ref().map(|v| v.len()).unwrap_or(0) + 1
    }
}
