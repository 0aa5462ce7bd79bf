//! Chunked copying between plaintext sources/sinks and encrypted handles.

use std::io::{Read, Write};

use zeroize::Zeroizing;

use crate::channel::FileHandle;
use crate::error::Error;
use crate::token::Token;

/// Size of one transfer unit.
pub const CHUNK_CAPACITY: usize = 512 * 1024;

/// Fixed-capacity transfer buffer. Only one chunk is ever in flight.
pub struct StreamBuffer {
    buf: Zeroizing<Vec<u8>>,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self {
            buf: Zeroizing::new(vec![0u8; CHUNK_CAPACITY]),
        }
    }

    /// A zero capacity could never make progress and is rejected.
    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::InvalidArgs("stream buffer capacity must be non-zero"));
        }
        Ok(Self {
            buf: Zeroizing::new(vec![0u8; capacity]),
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encrypt `total_len` bytes from `source` into `handle`.
///
/// Every chunk but the last is exactly one buffer long; the last is sized to
/// the remainder, and an empty source issues no writes. `source` is consumed
/// so that, on failure, it is released before the handle.
pub fn write_from_source<T, R>(
    handle: &mut FileHandle<'_, '_, T>,
    mut source: R,
    total_len: u64,
    buffer: &mut StreamBuffer,
) -> Result<u64, Error>
where
    T: Token,
    R: Read,
{
    let mut remaining = total_len;
    let mut chunks = 0u64;
    while remaining > 0 {
        let len = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(buffer.capacity());
        let chunk = &mut buffer.buf[..len];
        source.read_exact(chunk)?;
        handle.write(chunk)?;
        remaining -= len as u64;
        chunks += 1;
    }
    tracing::debug!(path = handle.path(), bytes = total_len, chunks, "cipher file written");
    Ok(total_len)
}

/// Encrypt an in-memory buffer with a single write.
pub fn write_from_memory<T: Token>(handle: &mut FileHandle<'_, '_, T>, data: &[u8]) -> Result<(), Error> {
    handle.write(data)?;
    tracing::debug!(path = handle.path(), bytes = data.len(), "cipher file written");
    Ok(())
}

/// Decrypt `handle` into `sink` one chunk at a time until the token reports
/// end of file. Returns the number of plaintext bytes written.
pub fn read_to_sink<T, W>(handle: &mut FileHandle<'_, '_, T>, mut sink: W, buffer: &mut StreamBuffer) -> Result<u64, Error>
where
    T: Token,
    W: Write,
{
    let mut total = 0u64;
    loop {
        let n = handle.read(&mut buffer.buf[..])?;
        if n == 0 {
            break;
        }
        sink.write_all(&buffer.buf[..n])?;
        total += n as u64;
    }
    sink.flush()?;
    tracing::debug!(path = handle.path(), bytes = total, "cipher file read");
    Ok(total)
}

/// Single read into a caller buffer; the result is truncated at `buf.len()`.
pub fn read_into<T: Token>(handle: &mut FileHandle<'_, '_, T>, buf: &mut [u8]) -> Result<usize, Error> {
    let n = handle.read(buf)?;
    tracing::debug!(path = handle.path(), bytes = n, capacity = buf.len(), "cipher file read");
    Ok(n)
}
