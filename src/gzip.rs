//! Random access into blocked-gzip heap dumps.
//!
//! A dump compressed on the fly is written as many small gzip members
//! concatenated into one file, each member holding a fixed-size span of
//! decompressed data. The writer records that span size in the first
//! member's comment field as `HPROF BLOCKSIZE=<n>`. Member boundaries are
//! not listed anywhere in the file; they are discovered by inflating members
//! in order and noting the file position where each deflate stream ends
//! (the next member starts 8 trailer bytes later).
//!
//! [`BlockedGzipReader`] walks members on demand, keeps an LRU-bounded cache
//! of decompressed chunks, and exposes the whole file as a randomly
//! addressable byte range through [`positioned_io::ReadAt`]. Files without
//! the block-size comment are declined at construction: arbitrary gzip is
//! not seekable and this is not a general random-access gzip library.

use std::{
    fmt, fs,
    io::{self},
    num::NonZero,
    sync::{Mutex, MutexGuard, PoisonError},
};

use flate2::{Decompress, FlushDecompress, Status};
use lru::LruCache;
use positioned_io::{ReadAt, Size};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, little_endian as le};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised from reading or decompressing a blocked-gzip file.
pub struct Error(Box<ErrorInner>);

#[derive(Debug)]
#[non_exhaustive]
enum ErrorInner {
    InvalidMagic([u8; 2]),
    UnsupportedMethod(u8),
    TruncatedHeader,
    Inflate(flate2::DecompressError),
    Io(std::io::Error),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ErrorInner::InvalidMagic(magic) => {
                write!(f, "invalid gzip member magic: {:02x} {:02x}", magic[0], magic[1])
            }
            ErrorInner::UnsupportedMethod(method) => {
                write!(f, "unsupported gzip compression method {method}")
            }
            ErrorInner::TruncatedHeader => f.pad("gzip member header is truncated"),
            ErrorInner::Inflate(err) => write!(f, "failed to inflate gzip member: {err}"),
            ErrorInner::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.0 {
            ErrorInner::Inflate(err) => Some(err),
            ErrorInner::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Self(Box::new(ErrorInner::Io(err)))
    }
}

impl From<flate2::DecompressError> for Error {
    #[cold]
    fn from(err: flate2::DecompressError) -> Self {
        Self(Box::new(ErrorInner::Inflate(err)))
    }
}

impl From<ErrorInner> for Error {
    #[cold]
    fn from(err: ErrorInner) -> Self {
        Self(Box::new(err))
    }
}

// Needed for the `ReadAt` impl.
impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match *err.0 {
            ErrorInner::Io(err) => err,
            inner => std::io::Error::new(std::io::ErrorKind::InvalidData, Error(Box::new(inner))),
        }
    }
}

/// Compressed bytes are fetched from the file in reads of this size.
const READ_SIZE: usize = 64 * 1024;

pub(crate) const MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 8;
/// CRC32 + ISIZE at the end of every member.
const TRAILER_LEN: u64 = 8;

const FLAG_HEADER_CRC: u8 = 1 << 1;
const FLAG_EXTRA: u8 = 1 << 2;
const FLAG_NAME: u8 = 1 << 3;
const FLAG_COMMENT: u8 = 1 << 4;

/// The comment prefix a cooperating writer leaves in the first member.
const COMMENT_MARKER: &[u8] = b"HPROF BLOCKSIZE=";

/// Floor for the buffer cap derived from [`Config::cache_size_limit`].
const MIN_CACHED_BUFFERS: usize = 1000;

/// Cache tuning for [`BlockedGzipReader`].
#[derive(Debug, Clone)]
pub struct Config {
    cache_size_limit: usize,
    max_cached_buffers: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // An arbitrarily chosen number.
            cache_size_limit: 512 << 20,
            max_cached_buffers: None,
        }
    }
}

impl Config {
    /// Byte budget for cached decompressed chunks. The buffer count derived
    /// from it never goes below a floor of 1000 buffers.
    #[must_use]
    pub fn cache_size_limit(mut self, limit: usize) -> Self {
        self.cache_size_limit = limit;
        self
    }

    /// Overrides the derived buffer-count cap. Clamped to at least 1.
    #[must_use]
    pub fn max_cached_buffers(mut self, n: usize) -> Self {
        self.max_cached_buffers = Some(n);
        self
    }

    fn buffer_cap(&self, chunk_size: usize) -> NonZero<usize> {
        let n = match self.max_cached_buffers {
            Some(n) => n,
            None => (self.cache_size_limit / chunk_size).max(MIN_CACHED_BUFFERS),
        };
        NonZero::new(n).unwrap_or(NonZero::<usize>::MIN)
    }
}

/// The fixed leading part of a gzip member header.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct MemberHeader {
    magic: [u8; 2],
    method: u8,
    flags: u8,
    _mtime: le::U32,
    _extra_flags: u8,
    _os: u8,
}

/// One gzip-member-aligned span of decompressed data.
///
/// `len` is only meaningful once `loaded` is set; it survives eviction, so a
/// chunk whose bytes were dropped still knows its boundaries.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    /// Byte offset in the compressed file where this member begins.
    file_offset: u64,
    /// Byte offset of this span in the decompressed address space.
    offset: u64,
    /// Decompressed length of this member.
    len: usize,
    loaded: bool,
}

struct State {
    file: fs::File,
    file_len: u64,
    chunk_size: usize,
    /// Known chunks sorted by decompressed offset; never removed.
    chunks: Vec<Chunk>,
    /// Decompressed bytes keyed by chunk decompressed offset.
    cache: LruCache<u64, Vec<u8>>,
    /// Index into `chunks` of the chunk that served the last read.
    last_used: Option<usize>,
    inflate: Decompress,
    /// Scratch buffer for compressed bytes, `READ_SIZE` long.
    in_buf: Vec<u8>,
}

/// Random access over a blocked-gzip compressed heap dump.
///
/// All interior state (chunk list, LRU cache, inflate engine, file handle)
/// sits behind one mutex, so a sequential stream view and a positional view
/// can share a single instance. The file handle and all cached buffers are
/// released on drop.
pub struct BlockedGzipReader {
    shared: Mutex<State>,
}

impl fmt::Debug for BlockedGzipReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockedGzipReader").finish_non_exhaustive()
    }
}

impl BlockedGzipReader {
    /// Opens a blocked-gzip file with the default [`Config`].
    ///
    /// Returns `Ok(None)` when `file` is gzip but was not written in blocked
    /// form (its first member carries no `HPROF BLOCKSIZE=<n>` comment, or
    /// `<n>` is not a positive integer), so random access is impossible.
    /// Malformed gzip headers are errors, not `None`.
    pub fn new(file: fs::File) -> Result<Option<Self>> {
        Self::new_with_config(file, &Config::default())
    }

    /// Same as [`BlockedGzipReader::new`] but with a non-default [`Config`].
    pub fn new_with_config(file: fs::File, config: &Config) -> Result<Option<Self>> {
        let file_len = file.metadata().map_err(Error::from)?.len();
        let mut cur = RawCursor {
            file: &file,
            pos: 0,
            len: file_len,
        };
        let comment = parse_member_header(&mut cur, true)?;
        let Some(chunk_size) = comment.as_deref().and_then(parse_block_size) else {
            return Ok(None);
        };
        trace!("blocked gzip: {chunk_size}B blocks, {file_len}B compressed");

        let cap = config.buffer_cap(chunk_size);
        Ok(Some(Self {
            shared: Mutex::new(State {
                file,
                file_len,
                chunk_size,
                chunks: vec![Chunk {
                    file_offset: 0,
                    offset: 0,
                    len: 0,
                    loaded: false,
                }],
                cache: LruCache::new(cap),
                last_used: None,
                inflate: Decompress::new(false),
                in_buf: vec![0u8; READ_SIZE],
            }),
        }))
    }

    /// The declared decompressed size of each gzip member.
    pub fn block_size(&self) -> usize {
        self.lock().chunk_size
    }

    /// Total length of the underlying compressed file.
    pub fn compressed_len(&self) -> u64 {
        self.lock().file_len
    }

    /// End of the decompressed address space explored so far. Grows as reads
    /// walk into new members; only final once a read has hit end-of-data.
    pub fn decompressed_frontier(&self) -> u64 {
        let st = self.lock();
        match st.chunks.last() {
            Some(c) => c.offset + c.len as u64,
            None => 0,
        }
    }

    /// Drops all cached decompressed bytes. Chunk boundary metadata is kept,
    /// so later reads pay decompression again but not boundary rediscovery.
    pub fn clear_cache(&self) {
        self.lock().cache.clear();
    }

    /// Best-effort mapping of a decompressed offset back to a compressed
    /// file offset, for progress reporting. Linearly interpolated within the
    /// containing chunk; do not use it for seeking.
    pub fn approx_file_offset(&self, offset: u64) -> u64 {
        self.lock().approx_file_offset(offset)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Loads never leave chunk state half updated, so a poisoned lock is
        // still usable.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReadAt for BlockedGzipReader {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.lock().read_at(pos, buf).map_err(Into::into)
    }
}

impl Size for BlockedGzipReader {
    // The decompressed size is unknown until every member has been walked.
    fn size(&self) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

impl State {
    /// Read decompressed bytes at `pos`. Returns the (possibly short) count
    /// copied, or `Ok(0)` only at end of data.
    fn read_at(&mut self, pos: u64, out: &mut [u8]) -> Result<usize> {
        loop {
            let idx = self.find_chunk(pos);
            self.cache_chunk(idx)?;

            let chunk = self.chunks[idx];
            if pos < chunk.offset + chunk.len as u64 {
                self.last_used = Some(idx);
                let in_chunk = (pos - chunk.offset) as usize;
                let n = out.len().min(chunk.len - in_chunk);
                let (_, bytes) = self.cache.peek_mru().expect("chunk was just cached");
                out[..n].copy_from_slice(&bytes[in_chunk..in_chunk + n]);
                return Ok(n);
            }
            // `pos` is past this chunk. Loading it discovered the next
            // member's boundary unless the file ended here.
            if idx + 1 == self.chunks.len() {
                return Ok(0);
            }
        }
    }

    /// Chunk containing `pos`: the last-used fast path, else a binary search
    /// for the greatest chunk offset <= `pos`.
    fn find_chunk(&self, pos: u64) -> usize {
        if let Some(idx) = self.last_used {
            let c = &self.chunks[idx];
            if c.loaded && c.offset <= pos && pos < c.offset + c.len as u64 {
                return idx;
            }
        }
        // The first chunk starts at offset 0, so the partition point is >= 1.
        self.chunks.partition_point(|c| c.offset <= pos) - 1
    }

    /// Makes the chunk's buffer resident and most recently used, inflating
    /// its member on a cache miss.
    fn cache_chunk(&mut self, idx: usize) -> Result<()> {
        let Chunk {
            offset, file_offset, ..
        } = self.chunks[idx];
        // NB. Use `get` instead of `contains` to promote it to MRU.
        if self.cache.get(&offset).is_some() {
            trace!("chunk at {offset:#x}: cache hit");
            return Ok(());
        }

        trace_time!("chunk at {offset:#x}: inflating member at {file_offset:#x}");

        // Reuse the evicted buffer when at capacity.
        let mut buf = if self.cache.len() == self.cache.cap().get() {
            let (_, mut buf) = self.cache.pop_lru().expect("not empty");
            buf.resize(self.chunk_size, 0);
            buf
        } else {
            vec![0u8; self.chunk_size]
        };

        let (produced, next_file_offset) = self.inflate_member(file_offset, &mut buf)?;
        buf.truncate(produced);

        let chunk = &mut self.chunks[idx];
        chunk.len = produced;
        chunk.loaded = true;
        let chunk_end = offset + produced as u64;

        if let Some(next) = next_file_offset {
            self.insert_boundary(next, chunk_end);
        }
        self.cache.push(offset, buf);
        Ok(())
    }

    /// Inflates one whole gzip member starting at `file_offset` into `out`.
    /// Returns the byte count produced and, if the member's deflate stream
    /// ended cleanly with more file following the trailer, the next member's
    /// file offset.
    fn inflate_member(&mut self, file_offset: u64, out: &mut [u8]) -> Result<(usize, Option<u64>)> {
        let mut cur = RawCursor {
            file: &self.file,
            pos: file_offset,
            len: self.file_len,
        };
        parse_member_header(&mut cur, false)?;
        let deflate_start = cur.pos;

        self.inflate.reset(false);
        let mut in_pos = deflate_start;
        let mut in_off = 0usize;
        let mut in_len = 0usize;
        let mut produced = 0usize;
        let mut finished = false;

        loop {
            if in_off == in_len {
                let want = (self.file_len - in_pos).min(READ_SIZE as u64) as usize;
                if want == 0 {
                    trace!("file ended inside member at {file_offset:#x}");
                    break;
                }
                let n = self.file.read_at(in_pos, &mut self.in_buf[..want])?;
                if n == 0 {
                    break;
                }
                in_pos += n as u64;
                in_off = 0;
                in_len = n;
            }

            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            let status = self.inflate.decompress(
                &self.in_buf[in_off..in_len],
                &mut out[produced..],
                FlushDecompress::None,
            )?;
            let consumed = (self.inflate.total_in() - before_in) as usize;
            let emitted = (self.inflate.total_out() - before_out) as usize;
            in_off += consumed;
            produced += emitted;

            match status {
                Status::StreamEnd => {
                    finished = true;
                    break;
                }
                // A full output buffer is not terminal: the stream-end marker
                // needs no output space, and well-formed members end exactly
                // at the block boundary.
                Status::Ok | Status::BufError => {
                    if consumed == 0 && emitted == 0 && in_off < in_len {
                        trace!("member at {file_offset:#x} exceeds the declared block size");
                        break;
                    }
                }
            }
        }

        if !finished {
            return Ok((produced, None));
        }
        let next = deflate_start + self.inflate.total_in() + TRAILER_LEN;
        Ok((produced, (next < self.file_len).then_some(next)))
    }

    /// Records the next member's boundary as a placeholder chunk, keeping
    /// the list sorted and duplicate free.
    fn insert_boundary(&mut self, file_offset: u64, offset: u64) {
        let i = self.chunks.partition_point(|c| c.offset < offset);
        if self.chunks.get(i).is_some_and(|c| c.offset == offset) {
            return;
        }
        self.chunks.insert(
            i,
            Chunk {
                file_offset,
                offset,
                len: 0,
                loaded: false,
            },
        );
        if let Some(last) = &mut self.last_used {
            if *last >= i {
                *last += 1;
            }
        }
    }

    fn approx_file_offset(&self, offset: u64) -> u64 {
        let i = self.chunks.partition_point(|c| c.offset <= offset);
        let chunk = &self.chunks[i - 1];
        if !chunk.loaded || chunk.len == 0 {
            return chunk.file_offset;
        }
        let next_file_offset = match self.chunks.get(i) {
            Some(next) => next.file_offset,
            None => self.file_len,
        };
        let compressed = next_file_offset - chunk.file_offset;
        let within = (offset - chunk.offset).min(chunk.len as u64);
        let interpolated = u128::from(compressed) * u128::from(within) / chunk.len as u128;
        chunk.file_offset + interpolated as u64
    }
}

/// Sequential reads over the compressed file, bounds checked against the
/// file length so a header cut short by end-of-file is reported as such.
struct RawCursor<'a> {
    file: &'a fs::File,
    pos: u64,
    len: u64,
}

impl RawCursor<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.len.saturating_sub(self.pos) < buf.len() as u64 {
            bail!(ErrorInner::TruncatedHeader);
        }
        self.file.read_exact_at(self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        if self.len.saturating_sub(self.pos) < n {
            bail!(ErrorInner::TruncatedHeader);
        }
        self.pos += n;
        Ok(())
    }
}

/// Parses one gzip member header starting at the cursor, leaving the cursor
/// at the first byte of deflate data. The comment field is collected only
/// when `want_comment` is set; other optional fields are skipped.
fn parse_member_header(cur: &mut RawCursor<'_>, want_comment: bool) -> Result<Option<Vec<u8>>> {
    let mut fixed = MemberHeader::new_zeroed();
    cur.read_exact(fixed.as_mut_bytes())?;
    if fixed.magic != MAGIC {
        bail!(ErrorInner::InvalidMagic(fixed.magic));
    }
    if fixed.method != METHOD_DEFLATE {
        bail!(ErrorInner::UnsupportedMethod(fixed.method));
    }

    if fixed.flags & FLAG_EXTRA != 0 {
        let mut xlen = [0u8; 2];
        cur.read_exact(&mut xlen)?;
        cur.skip(u64::from(u16::from_le_bytes(xlen)))?;
    }
    if fixed.flags & FLAG_NAME != 0 {
        while cur.read_u8()? != 0 {}
    }
    let comment = if fixed.flags & FLAG_COMMENT != 0 {
        if want_comment {
            let mut bytes = Vec::new();
            loop {
                match cur.read_u8()? {
                    0 => break,
                    b => bytes.push(b),
                }
            }
            Some(bytes)
        } else {
            while cur.read_u8()? != 0 {}
            None
        }
    } else {
        None
    };
    if fixed.flags & FLAG_HEADER_CRC != 0 {
        cur.skip(2)?;
    }
    Ok(comment)
}

/// `HPROF BLOCKSIZE=<positive integer>`, optionally followed by a space and
/// arbitrary trailing text.
fn parse_block_size(comment: &[u8]) -> Option<usize> {
    let rest = comment.strip_prefix(COMMENT_MARKER)?;
    let digits = match rest.iter().position(|&b| b == b' ') {
        Some(i) => &rest[..i],
        None => rest,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let n = std::str::from_utf8(digits).ok()?.parse::<usize>().ok()?;
    (n > 0).then_some(n)
}

#[cfg(test)]
mod tests;
