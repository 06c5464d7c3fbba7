//! Counter value kinds and the merge/encode capability they share.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::persist::traits::{ReadError, ReadType, WriteError, WriteType};
use crate::persist::VecBuilder;

/// Wire tag distinguishing the two counter value kinds.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    HitCount,
    Histogram,
}

impl DataKind {
    pub(crate) fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::HitCount),
            1 => Some(Self::Histogram),
            _ => None,
        }
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            Self::HitCount => 0,
            Self::Histogram => 1,
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HitCount => write!(f, "hitcount"),
            Self::Histogram => write!(f, "histogram"),
        }
    }
}

/// Capability shared by every counter value kind: commutative-associative
/// merge plus the persisted wire encoding.
pub trait DataValue: Sized + Clone + std::fmt::Debug + Send {
    const KIND: DataKind;

    /// Folds `other` into `self`. Must be commutative and associative so
    /// that neither fan-out arrival order nor store merge order matters.
    fn merge(&mut self, other: &Self);

    fn write_value<W: Write>(&self, writer: &mut W) -> Result<(), WriteError>;

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, ReadError>;
}

/// A simple event counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct HitCount {
    pub hits: u64,
}

impl HitCount {
    pub fn new(hits: u64) -> Self {
        Self { hits }
    }

    /// Saturating increment.
    pub fn add(&mut self, hits: u64) {
        self.hits = self.hits.saturating_add(hits);
    }
}

impl DataValue for HitCount {
    const KIND: DataKind = DataKind::HitCount;

    fn merge(&mut self, other: &Self) {
        self.add(other.hits);
    }

    fn write_value<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.hits.write(writer)
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            hits: u64::read(reader)?,
        })
    }
}

/// A bucketed distribution; merge sums counts per bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Histogram {
    pub buckets: BTreeMap<i64, u64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, bucket: i64, count: u64) {
        let slot = self.buckets.entry(bucket).or_insert(0);
        *slot = slot.saturating_add(count);
    }

    /// Total count across all buckets.
    pub fn sample_count(&self) -> u64 {
        self.buckets
            .values()
            .fold(0u64, |acc, c| acc.saturating_add(*c))
    }
}

impl DataValue for Histogram {
    const KIND: DataKind = DataKind::Histogram;

    fn merge(&mut self, other: &Self) {
        for (bucket, count) in &other.buckets {
            self.observe(*bucket, *count);
        }
    }

    fn write_value<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        let len = u32::try_from(self.buckets.len()).map_err(WriteError::Overflow)?;
        len.write(writer)?;
        for (bucket, count) in &self.buckets {
            bucket.write(writer)?;
            count.write(writer)?;
        }
        Ok(())
    }

    fn read_value<R: Read>(reader: &mut R) -> Result<Self, ReadError> {
        let len = u32::read(reader)?;
        // 16 bytes per entry on the wire; let VecBuilder bound the read so a
        // hostile count fails on a short stream instead of allocating.
        let byte_len = usize::try_from(u64::from(len) * 16)?;
        let raw: Vec<u8> = VecBuilder::new(byte_len).read_exact(reader)?.into();
        let mut cursor = std::io::Cursor::new(raw);

        let mut buckets = BTreeMap::new();
        for _ in 0..len {
            let bucket = i64::read(&mut cursor)?;
            let count = u64::read(&mut cursor)?;
            let slot = buckets.entry(bucket).or_insert(0u64);
            *slot = slot.saturating_add(count);
        }
        Ok(Self { buckets })
    }
}
