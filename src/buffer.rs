//! Positional and streaming views over the bytes of a dump.
//!
//! [`DumpStore`] abstracts over a plain dump file and a blocked-gzip
//! compressed one, exposing both through [`ReadAt`]. [`ReadBuffer`] adds the
//! typed big-endian accessors record payloads are encoded with, and
//! [`StreamReader`] is the buffered forward cursor used to walk records.

use std::{
    fmt, fs,
    io::{self, Read},
    sync::Arc,
};

use positioned_io::{ReadAt, Size};

use crate::{Id, IdSize, gzip::BlockedGzipReader};

/// Refill granularity of [`StreamReader`].
const BUF_SIZE: usize = 64 * 1024;

/// The byte store a dump is read from, addressed in decompressed offsets.
#[derive(Debug)]
pub enum DumpStore {
    /// An uncompressed dump file.
    Plain(fs::File),
    /// A compressed dump, decompressed on demand.
    BlockedGzip(BlockedGzipReader),
}

impl DumpStore {
    /// Whether reads go through the decompression cache.
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::BlockedGzip(_))
    }

    /// Maps a dump offset to an approximate offset in the backing file, for
    /// progress reporting against the file's real size.
    pub fn approx_file_offset(&self, pos: u64) -> u64 {
        match self {
            Self::Plain(_) => pos,
            Self::BlockedGzip(gz) => gz.approx_file_offset(pos),
        }
    }

    /// Drops cached decompressed data, if any.
    pub fn clear_cache(&self) {
        match self {
            Self::Plain(_) => {}
            Self::BlockedGzip(gz) => gz.clear_cache(),
        }
    }
}

impl ReadAt for DumpStore {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(file) => file.read_at(pos, buf),
            Self::BlockedGzip(gz) => gz.read_at(pos, buf),
        }
    }
}

impl Size for DumpStore {
    fn size(&self) -> io::Result<Option<u64>> {
        match self {
            Self::Plain(file) => file.size(),
            Self::BlockedGzip(gz) => gz.size(),
        }
    }
}

/// Random access to dump bytes in the format's big-endian encoding.
///
/// Cloning is cheap; clones share the store and its cache.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    store: Arc<DumpStore>,
    id_size: IdSize,
}

impl ReadBuffer {
    pub fn new(store: Arc<DumpStore>, id_size: IdSize) -> Self {
        Self { store, id_size }
    }

    /// The identifier width declared by the dump header.
    pub fn id_size(&self) -> IdSize {
        self.id_size
    }

    pub fn store(&self) -> &Arc<DumpStore> {
        &self.store
    }

    /// Fills `buf` from `pos`, failing with `UnexpectedEof` on a short read.
    pub fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        self.store.read_exact_at(pos, buf)
    }

    pub fn get_u8(&self, pos: u64) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact_at(pos, &mut b)?;
        Ok(b[0])
    }

    pub fn get_u16(&self, pos: u64) -> io::Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact_at(pos, &mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn get_u32(&self, pos: u64) -> io::Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_at(pos, &mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn get_u64(&self, pos: u64) -> io::Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact_at(pos, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Reads an object identifier of the dump's declared width.
    pub fn get_id(&self, pos: u64) -> io::Result<Id> {
        let raw = match self.id_size {
            IdSize::U32 => u64::from(self.get_u32(pos)?),
            IdSize::U64 => self.get_u64(pos)?,
        };
        Ok(Id::new(raw))
    }

    /// A forward cursor over the same store, starting at `pos`.
    pub fn stream_at(&self, pos: u64) -> StreamReader {
        StreamReader::new(self.store.clone(), pos)
    }
}

/// A buffered forward cursor over a [`DumpStore`].
///
/// Skipping is lazy: it only moves the logical position, so skipping past
/// the end of the store does not fail until something is read there.
pub struct StreamReader {
    store: Arc<DumpStore>,
    /// Window contents are `buf[off..]`; `end_pos` is the store offset just
    /// past the window.
    buf: Vec<u8>,
    off: usize,
    end_pos: u64,
}

impl StreamReader {
    pub fn new(store: Arc<DumpStore>, pos: u64) -> Self {
        Self {
            store,
            buf: Vec::new(),
            off: 0,
            end_pos: pos,
        }
    }

    /// Store offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.end_pos - (self.buf.len() - self.off) as u64
    }

    /// Moves the cursor, reusing the buffered window when possible.
    pub fn seek(&mut self, pos: u64) {
        let start = self.end_pos - self.buf.len() as u64;
        if (start..self.end_pos).contains(&pos) {
            self.off = (pos - start) as usize;
        } else {
            self.buf.clear();
            self.off = 0;
            self.end_pos = pos;
        }
    }

    /// Advances the cursor without touching the store.
    pub fn skip(&mut self, n: u64) {
        let pos = self.position();
        self.seek(pos.saturating_add(n));
    }

    /// Refills the empty window. `Ok(false)` at end of data.
    fn refill(&mut self) -> io::Result<bool> {
        debug_assert_eq!(self.off, self.buf.len());
        self.buf.resize(BUF_SIZE, 0);
        let n = self.store.read_at(self.end_pos, &mut self.buf)?;
        self.buf.truncate(n);
        self.off = 0;
        self.end_pos += n as u64;
        Ok(n != 0)
    }

    /// Reads one byte, or `None` at a clean end of data.
    pub fn try_read_u8(&mut self) -> io::Result<Option<u8>> {
        if self.off == self.buf.len() && !self.refill()? {
            return Ok(None);
        }
        let b = self.buf[self.off];
        self.off += 1;
        Ok(Some(b))
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_id(&mut self, id_size: IdSize) -> io::Result<Id> {
        let raw = match id_size {
            IdSize::U32 => u64::from(self.read_u32()?),
            IdSize::U64 => self.read_u64()?,
        };
        Ok(Id::new(raw))
    }
}

impl Read for StreamReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.off == self.buf.len() && !self.refill()? {
            return Ok(0);
        }
        let window = &self.buf[self.off..];
        let n = out.len().min(window.len());
        out[..n].copy_from_slice(&window[..n]);
        self.off += n;
        Ok(n)
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}
