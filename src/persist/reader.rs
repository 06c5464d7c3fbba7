//! Reader for persisted data records.

use std::io::Read;
use std::sync::Arc;

use tracing::debug;

use crate::data::{DataKind, DataValue, DimensionKey, Histogram, HitCount, KeyedDataStore};

use super::header::PersistedHeader;
use super::pool::BufferPool;
use super::traits::ReadType;
use super::version::ProtocolVersion;
use super::{PersistedDataError, MAGIC};

const READ_CHUNK: usize = 4 * 1024;
const MAX_PREALLOC: usize = 1024 * 1024;

/// Streaming reader over a concatenation of persisted records.
///
/// Call [`read_data_header`] to advance to the next record, then either
/// [`read_data`] to stream its entries or [`load_data`] to materialise
/// them. Calling [`read_data_header`] again with an unread body skips the
/// body, so header-only scans of a file are cheap.
///
/// [`read_data_header`]: PersistedDataReader::read_data_header
/// [`read_data`]: PersistedDataReader::read_data
/// [`load_data`]: PersistedDataReader::load_data
#[derive(Debug)]
pub struct PersistedDataReader<R: Read> {
    inner: R,
    pool: Arc<BufferPool>,
    current: Option<RecordState>,
}

#[derive(Debug)]
struct RecordState {
    header: PersistedHeader,
    version: ProtocolVersion,
    /// Running CRC, seeded with the header bytes.
    crc: u32,
    body_consumed: bool,
}

impl<R: Read> PersistedDataReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_pool(inner, BufferPool::new())
    }

    pub fn with_pool(inner: R, pool: Arc<BufferPool>) -> Self {
        Self {
            inner,
            pool,
            current: None,
        }
    }

    /// Advances to the next record. Returns `false` iff the stream ends
    /// cleanly at a record boundary.
    pub fn read_data_header(&mut self) -> Result<bool, PersistedDataError> {
        let unread_body = self.current.as_ref().is_some_and(|s| !s.body_consumed);
        if unread_body {
            self.skip_body()?;
        }
        self.current = None;

        let magic = match self.read_magic()? {
            Some(magic) => magic,
            None => return Ok(false),
        };
        if magic != MAGIC {
            return Err(PersistedDataError::BadMagic(magic));
        }

        let version = ProtocolVersion(u16::read(&mut self.inner)?);
        if !version.is_supported() {
            return Err(PersistedDataError::UnsupportedVersion(version.0));
        }

        let header_len = u32::read(&mut self.inner)?;
        let mut scratch = self.pool.acquire();
        read_exact_capped(&mut self.inner, &mut scratch, header_len as usize)?;

        // Trailing header bytes inside the declared length are tolerated;
        // they belong to newer minor extensions of the same revision.
        let mut cursor = std::io::Cursor::new(&scratch[..]);
        let header = PersistedHeader::read_versioned(&mut cursor, version)?;

        let crc = if version.has_crc() {
            crc32c::crc32c(&scratch)
        } else {
            0
        };

        if !version.is_latest() {
            debug!(
                name = header.name.as_str(),
                version = version.0,
                "read legacy protocol record",
            );
        }

        self.current = Some(RecordState {
            header,
            version,
            crc,
            body_consumed: false,
        });
        Ok(true)
    }

    /// The header of the current record, if one has been read.
    pub fn header(&self) -> Option<&PersistedHeader> {
        self.current.as_ref().map(|s| &s.header)
    }

    /// Whether the current record uses the latest protocol revision.
    /// Callers can use this to detect legacy files worth rewriting.
    pub fn is_latest_protocol(&self) -> bool {
        self.current
            .as_ref()
            .map(|s| s.version.is_latest())
            .unwrap_or(false)
    }

    /// Streams every `(key, value)` of the current record's body to the
    /// visitor without materialising the whole table.
    pub fn read_data<V, F>(&mut self, visitor: F) -> Result<(), PersistedDataError>
    where
        V: DataValue,
        F: FnMut(DimensionKey, V),
    {
        let data_type = match &self.current {
            Some(state) if !state.body_consumed => state.header.data_type,
            _ => return Err(PersistedDataError::NoRecord),
        };
        if data_type != V::KIND {
            return Err(PersistedDataError::TypeMismatch {
                found: data_type,
                requested: V::KIND,
            });
        }
        self.consume_body(visitor)
    }

    /// Materialises the current record's body into a fresh store.
    pub fn load_data<V>(&mut self) -> Result<KeyedDataStore<V>, PersistedDataError>
    where
        V: DataValue,
    {
        let dimensions = match &self.current {
            Some(state) if !state.body_consumed => state.header.dimensions.clone(),
            _ => return Err(PersistedDataError::NoRecord),
        };
        let mut store = KeyedDataStore::new(dimensions);
        self.read_data(|key, value: V| store.insert_live(key, value))?;
        Ok(store)
    }

    /// Reads the magic marker, distinguishing clean end-of-stream (`None`)
    /// from truncation inside the marker.
    fn read_magic(&mut self) -> Result<Option<u32>, PersistedDataError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return if filled == 0 {
                        Ok(None)
                    } else {
                        Err(PersistedDataError::Truncated)
                    };
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(u32::from_le_bytes(buf)))
    }

    fn skip_body(&mut self) -> Result<(), PersistedDataError> {
        let data_type = match &self.current {
            Some(state) => state.header.data_type,
            None => return Ok(()),
        };
        debug!("skipping unread record body");
        match data_type {
            DataKind::HitCount => self.consume_body(|_, _: HitCount| {}),
            DataKind::Histogram => self.consume_body(|_, _: Histogram| {}),
        }
    }

    fn consume_body<V, F>(&mut self, mut visitor: F) -> Result<(), PersistedDataError>
    where
        V: DataValue,
        F: FnMut(DimensionKey, V),
    {
        let state = match self.current.as_mut() {
            Some(state) => state,
            None => return Err(PersistedDataError::NoRecord),
        };
        let dimension_count = state.header.dimensions.len();
        let data_count = state.header.data_count;

        let mut crc = state.crc;
        {
            let mut tee = CrcReader {
                inner: &mut self.inner,
                crc: &mut crc,
            };
            for _ in 0..data_count {
                let mut key = Vec::with_capacity(dimension_count);
                for _ in 0..dimension_count {
                    key.push(String::read(&mut tee)?);
                }
                let value = V::read_value(&mut tee)?;
                visitor(key, value);
            }
        }

        if state.version.has_crc() {
            let stored = u32::read(&mut self.inner)?;
            if stored != crc {
                return Err(PersistedDataError::Corrupt {
                    stored,
                    computed: crc,
                });
            }
        }

        state.body_consumed = true;
        Ok(())
    }
}

/// Tees reads through a running CRC32 so body bytes are checksummed while
/// they stream past.
struct CrcReader<'a, R> {
    inner: &'a mut R,
    crc: &'a mut u32,
}

impl<R: Read> Read for CrcReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        *self.crc = crc32c::crc32c_append(*self.crc, &buf[..n]);
        Ok(n)
    }
}

/// Reads `len` bytes into a scratch buffer in bounded chunks, so hostile
/// header lengths fail on a short stream rather than preallocating.
fn read_exact_capped<R: Read>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    len: usize,
) -> Result<(), PersistedDataError> {
    buf.clear();
    buf.reserve(len.min(MAX_PREALLOC));
    let mut remaining = len;
    while remaining > 0 {
        let step = remaining.min(READ_CHUNK);
        let start = buf.len();
        buf.resize(start + step, 0);
        reader.read_exact(&mut buf[start..])?;
        remaining -= step;
    }
    Ok(())
}
