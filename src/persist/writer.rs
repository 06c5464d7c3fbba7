//! Writer for persisted data records.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::data::{DataValue, KeyedDataStore};

use super::header::{PersistedDataSource, PersistedHeader};
use super::pool::BufferPool;
use super::traits::WriteType;
use super::version::PROTOCOL_V3;
use super::{PersistedDataError, MAGIC};

/// Serialises keyed counter data into the latest-protocol record framing.
///
/// Each [`write_data`] call emits exactly one record; a file is a plain
/// concatenation of records.
///
/// [`write_data`]: PersistedDataWriter::write_data
#[derive(Debug)]
pub struct PersistedDataWriter<W: Write> {
    inner: W,
    pool: Arc<BufferPool>,
}

impl<W: Write> PersistedDataWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_pool(inner, BufferPool::new())
    }

    pub fn with_pool(inner: W, pool: Arc<BufferPool>) -> Self {
        Self { inner, pool }
    }

    /// Emits one record for the live contents of `store`.
    ///
    /// The caller declares the record's data count; a mismatch with the
    /// store's post-merge count aborts before anything is written.
    pub fn write_data<V: DataValue>(
        &mut self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        declared_count: u32,
        sources: &[PersistedDataSource],
        store: &KeyedDataStore<V>,
    ) -> Result<(), PersistedDataError> {
        let actual = store.count();
        if u64::from(declared_count) != actual as u64 {
            return Err(PersistedDataError::CountMismatch {
                declared: declared_count,
                actual,
            });
        }

        let header = PersistedHeader {
            name: name.to_owned(),
            start,
            end,
            data_type: V::KIND,
            data_count: declared_count,
            dimensions: store.dimension_set().clone(),
            sources: sources.to_vec(),
            protocol_version: PROTOCOL_V3.0,
        };

        let mut header_buf = self.pool.acquire();
        header.write_versioned(&mut *header_buf, PROTOCOL_V3)?;

        let mut body_buf = self.pool.acquire();
        for (key, value) in store.iter() {
            for part in key {
                part.as_str().write(&mut *body_buf)?;
            }
            value.write_value(&mut *body_buf)?;
        }

        let crc = crc32c::crc32c_append(crc32c::crc32c(&header_buf), &body_buf);

        let header_len =
            u32::try_from(header_buf.len()).map_err(|e| PersistedDataError::Malformed(Box::new(e)))?;

        MAGIC.write(&mut self.inner)?;
        PROTOCOL_V3.0.write(&mut self.inner)?;
        header_len.write(&mut self.inner)?;
        self.inner.write_all(&header_buf).map_err(PersistedDataError::Io)?;
        self.inner.write_all(&body_buf).map_err(PersistedDataError::Io)?;
        crc.write(&mut self.inner)?;

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
