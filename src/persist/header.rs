//! Persisted record headers.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};

use crate::data::{DataKind, DimensionSet};

use super::traits::{ReadError, ReadType, WriteError, WriteType};
use super::version::ProtocolVersion;

/// Availability of a contributing source at write time.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum SourceStatus {
    Available,
    Unavailable,
    Unknown,
}

impl SourceStatus {
    fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Available),
            1 => Some(Self::Unavailable),
            2 => Some(Self::Unknown),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Unavailable => 1,
            Self::Unknown => 2,
        }
    }
}

/// One source that contributed to a persisted record.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct PersistedDataSource {
    pub name: String,
    pub status: SourceStatus,
}

impl PersistedDataSource {
    pub fn new(name: impl Into<String>, status: SourceStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

impl<R: Read> ReadType<R> for PersistedDataSource {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let name = String::read(reader)?;
        let tag = u8::read(reader)?;
        let status = SourceStatus::from_wire(tag).ok_or_else(|| {
            ReadError::Malformed(format!("Invalid source status: {}", tag).into())
        })?;
        Ok(Self { name, status })
    }
}

impl<W: Write> WriteType<W> for PersistedDataSource {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.name.write(writer)?;
        self.status.to_wire().write(writer)?;
        Ok(())
    }
}

/// The self-describing header of one persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedHeader {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub data_type: DataKind,
    pub data_count: u32,
    pub dimensions: DimensionSet,
    pub sources: Vec<PersistedDataSource>,
    pub protocol_version: u16,
}

fn read_ticks<R: Read>(reader: &mut R) -> Result<DateTime<Utc>, ReadError> {
    let ticks = i64::read(reader)?;
    DateTime::from_timestamp_millis(ticks)
        .ok_or_else(|| ReadError::Malformed(format!("Timestamp out of range: {}", ticks).into()))
}

impl PersistedHeader {
    pub(crate) fn read_versioned<R>(
        reader: &mut R,
        version: ProtocolVersion,
    ) -> Result<Self, ReadError>
    where
        R: Read,
    {
        assert!(version.is_supported());

        let name = String::read(reader)?;
        let start = read_ticks(reader)?;
        let end = read_ticks(reader)?;

        let tag = u8::read(reader)?;
        let data_type = DataKind::from_wire(tag).ok_or_else(|| {
            ReadError::Malformed(format!("Invalid data type tag: {}", tag).into())
        })?;
        let data_count = u32::read(reader)?;

        let dimension_count = u16::read(reader)?;
        let mut names = Vec::with_capacity(usize::from(dimension_count).min(1024));
        for _ in 0..dimension_count {
            names.push(String::read(reader)?);
        }
        let dimensions = DimensionSet::from_names(names);

        // Legacy records predate source accounting; map to an empty list.
        let sources = if version.has_sources() {
            let source_count = u32::read(reader)?;
            let mut sources = Vec::with_capacity(usize::try_from(source_count)?.min(1024));
            for _ in 0..source_count {
                sources.push(PersistedDataSource::read(reader)?);
            }
            sources
        } else {
            Vec::new()
        };

        Ok(Self {
            name,
            start,
            end,
            data_type,
            data_count,
            dimensions,
            sources,
            protocol_version: version.0,
        })
    }

    pub(crate) fn write_versioned<W>(
        &self,
        writer: &mut W,
        version: ProtocolVersion,
    ) -> Result<(), WriteError>
    where
        W: Write,
    {
        assert!(version.is_supported());

        self.name.write(writer)?;
        self.start.timestamp_millis().write(writer)?;
        self.end.timestamp_millis().write(writer)?;
        self.data_type.to_wire().write(writer)?;
        self.data_count.write(writer)?;

        let dimension_count = u16::try_from(self.dimensions.len()).map_err(WriteError::Overflow)?;
        dimension_count.write(writer)?;
        for dimension in self.dimensions.iter() {
            dimension.name().write(writer)?;
        }

        if version.has_sources() {
            let source_count = u32::try_from(self.sources.len()).map_err(WriteError::Overflow)?;
            source_count.write(writer)?;
            for source in &self.sources {
                source.write(writer)?;
            }
        }

        Ok(())
    }
}
