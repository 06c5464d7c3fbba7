use std::io::Read;

use super::traits::ReadError;

/// Initial allocation cap for length-prefixed data.
///
/// Lengths come from untrusted input; allocating them up front would let a
/// short, hostile prefix claim gigabytes. Reads above the cap grow the
/// buffer chunk by chunk, so a truncated stream fails before the allocation
/// finishes.
const MAX_PREALLOC: usize = 1024 * 1024;

const CHUNK: usize = 4 * 1024;

/// Builds a `Vec<u8>` of a declared length from a reader without trusting
/// the length for the initial allocation.
#[derive(Debug)]
pub(crate) struct VecBuilder {
    inner: Vec<u8>,
    remaining: usize,
}

impl VecBuilder {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            inner: Vec::with_capacity(len.min(MAX_PREALLOC)),
            remaining: len,
        }
    }

    /// Reads exactly the declared number of bytes.
    pub(crate) fn read_exact<R>(mut self, reader: &mut R) -> Result<Self, ReadError>
    where
        R: Read,
    {
        while self.remaining > 0 {
            let step = self.remaining.min(CHUNK);
            let start = self.inner.len();
            self.inner.resize(start + step, 0);
            reader.read_exact(&mut self.inner[start..])?;
            self.remaining -= step;
        }
        Ok(self)
    }
}

impl From<VecBuilder> for Vec<u8> {
    fn from(builder: VecBuilder) -> Self {
        builder.inner
    }
}
