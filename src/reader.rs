//! The record reader: walks the stream of versioned records in a dump and
//! feeds the classes, heap objects and GC roots it finds to a [`Sink`].
//!
//! A dump starts with a NUL-terminated version banner, an identifier size
//! and a timestamp, followed by tagged records. Everything outside the heap
//! dump records (name tables, loaded classes, stack frames and traces) is
//! kept in side tables of the pass and used to resolve the objects inside
//! them. A file may contain several heap dumps; one pass parses exactly one,
//! chosen with [`ReadOptions::dump_number`].
//!
//! Recoverable oddities (unknown tags, unresolved names, byte-count
//! mismatches) are logged and counted in [`Summary::warnings`]; an end of
//! data inside a heap dump sets [`Summary::truncated`] and everything parsed
//! up to that point is kept.

use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use bstr::BString;
use positioned_io::ReadAt;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, big_endian as be};

use crate::{
    Id, IdSize, Serial,
    buffer::{DumpStore, ReadBuffer, StreamReader},
    gzip::{self, BlockedGzipReader},
    model::{JavaType, LineNumber, Sink, Snapshot, StackFrame, StackTrace},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised from opening or reading a dump.
pub struct Error(Box<ErrorInner>);

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
#[non_exhaustive]
enum ErrorInner {
    // Header.
    UnknownVersion,
    UnsupportedIdSize(u32),
    GzipNotBlocked,

    // Dump selection.
    InvalidDumpSelector(String),
    DumpNotFound { wanted: u32, found: u32 },

    // Records.
    BadRecordLength { tag: RecordTag, len: u32 },
    MissingThread { serial: Serial },
    MissingFrame { id: Id },
    MissingClass { serial: Serial },
    UnknownClassId(Id),
    InvalidTypeCode(u8),

    // Other.
    Gzip(gzip::Error),
    Io(io::Error),
    IoAt { pos: u64, source: io::Error },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ErrorInner::UnknownVersion => f.pad("unrecognized version banner"),
            ErrorInner::UnsupportedIdSize(n) => {
                write!(f, "invalid identifier size {n}: only 4 and 8 are supported")
            }
            ErrorInner::GzipNotBlocked => {
                f.pad("gzip compressed dump lacks the blocked layout required for random access")
            }

            ErrorInner::InvalidDumpSelector(s) => {
                write!(f, "expected a dump number after '#', but found {s:?}")
            }
            ErrorInner::DumpNotFound { wanted, found } => {
                write!(f, "heap dump #{wanted} not found, the file contains {found}")
            }

            ErrorInner::BadRecordLength { tag, len } => {
                write!(f, "record {tag:?} has impossible length {len}")
            }
            ErrorInner::MissingThread { serial } => {
                write!(f, "thread object for serial {serial} not found")
            }
            ErrorInner::MissingFrame { id } => write!(f, "stack frame {id} not found"),
            ErrorInner::MissingClass { serial } => {
                write!(f, "class with serial {serial} not found for a stack frame")
            }
            ErrorInner::UnknownClassId(id) => {
                write!(f, "instance references unknown class {id}")
            }
            ErrorInner::InvalidTypeCode(code) => {
                write!(f, "invalid value type code {code:#04x}")
            }

            ErrorInner::Gzip(err) => err.fmt(f),
            ErrorInner::Io(err) => err.fmt(f),
            ErrorInner::IoAt { pos, source } => {
                write!(f, "I/O error at dump offset {pos:#x}: {source}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.0 {
            ErrorInner::Gzip(err) => Some(err),
            ErrorInner::Io(err) | ErrorInner::IoAt { source: err, .. } => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    #[cold]
    fn from(err: io::Error) -> Self {
        Self(Box::new(ErrorInner::Io(err)))
    }
}

impl From<gzip::Error> for Error {
    #[cold]
    fn from(err: gzip::Error) -> Self {
        Self(Box::new(ErrorInner::Gzip(err)))
    }
}

impl From<ErrorInner> for Error {
    #[cold]
    fn from(err: ErrorInner) -> Self {
        Self(Box::new(err))
    }
}

impl Error {
    /// Attaches the failing record's offset to plain I/O errors.
    #[cold]
    fn at_offset(self, pos: u64) -> Self {
        match *self.0 {
            ErrorInner::Io(source) => ErrorInner::IoAt { pos, source }.into(),
            inner => Self(Box::new(inner)),
        }
    }

    /// Whether this is a premature end of data, which is recoverable inside
    /// a heap dump.
    fn is_unexpected_eof(&self) -> bool {
        matches!(&*self.0, ErrorInner::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// The format version declared by the dump banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1_0,
    V1_0_1,
    V1_0_2,
}

const VERSION_BANNERS: [(&[u8], Version); 3] = [
    (b"JAVA PROFILE 1.0", Version::V1_0),
    (b"JAVA PROFILE 1.0.1", Version::V1_0_1),
    (b"JAVA PROFILE 1.0.2", Version::V1_0_2),
];

/// Longest recognized banner, with slack for diagnosis.
const MAX_BANNER_LEN: usize = 64;

impl Version {
    /// Whether value type codes are numeric rather than JVM signature
    /// characters.
    fn numeric_type_codes(self) -> bool {
        !matches!(self, Self::V1_0)
    }

    /// Whether segmented heap dump records are part of the format.
    fn has_segments(self) -> bool {
        matches!(self, Self::V1_0_2)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::V1_0 => "1.0",
            Self::V1_0_1 => "1.0.1",
            Self::V1_0_2 => "1.0.2",
        })
    }
}

macro_rules! impl_open_enum {
    ($name:ident; $($(#[$meta:meta])* $variant:ident = $value:expr,)*) => {
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(match *self {
                    $(Self::$variant => stringify!($variant),)*
                    _ => return f
                        .debug_tuple(stringify!($name))
                        .field(&self.0)
                        .finish(),
                })
            }
        }

        impl $name {
            $(
                $(#[$meta])*
                pub const $variant: Self = Self($value);
            )*
        }
    };
}

/// The tag of a top-level record.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordTag(pub u8);

impl_open_enum! {
    RecordTag;

    /// A name table entry.
    UTF8 = 0x01,
    LOAD_CLASS = 0x02,
    UNLOAD_CLASS = 0x03,
    STACK_FRAME = 0x04,
    STACK_TRACE = 0x05,
    ALLOC_SITES = 0x06,
    HEAP_SUMMARY = 0x07,
    START_THREAD = 0x0a,
    END_THREAD = 0x0b,
    /// A whole heap dump in one record.
    HEAP_DUMP = 0x0c,
    CPU_SAMPLES = 0x0d,
    CONTROL_SETTINGS = 0x0e,
    LOCKSTATS_WAIT_TIME = 0x10,
    LOCKSTATS_HOLD_TIME = 0x11,
    /// One segment of a heap dump split across records.
    HEAP_DUMP_SEGMENT = 0x1c,
    /// Terminates a segmented heap dump.
    HEAP_DUMP_END = 0x2c,
}

/// The tag of a sub-record inside a heap dump.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubRecordTag(pub u8);

impl_open_enum! {
    SubRecordTag;

    ROOT_UNKNOWN = 0xff,
    ROOT_JNI_GLOBAL = 0x01,
    ROOT_JNI_LOCAL = 0x02,
    ROOT_JAVA_FRAME = 0x03,
    ROOT_NATIVE_STACK = 0x04,
    ROOT_STICKY_CLASS = 0x05,
    ROOT_THREAD_BLOCK = 0x06,
    ROOT_MONITOR_USED = 0x07,
    ROOT_THREAD_OBJ = 0x08,
    CLASS_DUMP = 0x20,
    INSTANCE_DUMP = 0x21,
    OBJECT_ARRAY_DUMP = 0x22,
    PRIMITIVE_ARRAY_DUMP = 0x23,
}

mod heap;


/// The fixed part of the dump header after the version banner.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct HeaderTail {
    id_size: be::U32,
    timestamp_ms: be::U64,
}

/// Options for opening and parsing a dump.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    dump_number: Option<u32>,
    track_stacks: bool,
    gzip: gzip::Config,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            dump_number: None,
            track_stacks: true,
            gzip: gzip::Config::default(),
        }
    }
}

impl ReadOptions {
    /// Selects the 1-based heap dump to parse when the file contains more
    /// than one. Defaults to the first.
    #[must_use]
    pub fn dump_number(mut self, n: u32) -> Self {
        self.dump_number = Some(n);
        self
    }

    /// Whether to parse stack frame and trace records. On by default;
    /// turning it off skips them and emits every root, class and object
    /// without a trace.
    #[must_use]
    pub fn track_stacks(mut self, on: bool) -> Self {
        self.track_stacks = on;
        self
    }

    /// Tuning for the decompression cache of compressed dumps.
    #[must_use]
    pub fn gzip_config(mut self, config: gzip::Config) -> Self {
        self.gzip = config;
        self
    }
}

/// An open heap dump.
///
/// Opening only parses the header. The records are walked by
/// [`Dump::read_into`], which can run several times over the same dump;
/// random access to object payloads goes through [`Dump::buffer`].
#[derive(Debug)]
pub struct Dump {
    buf: ReadBuffer,
    version: Version,
    timestamp_ms: u64,
    /// Store offset of the first record.
    records_start: u64,
    options: ReadOptions,
}

impl Dump {
    /// Opens a dump file, plain or blocked-gzip compressed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, ReadOptions::default())
    }

    /// Opens `path#N` as the N-th (1-based) heap dump within the file. A
    /// selector without `#` is a plain path selecting the first dump.
    pub fn open_selector(selector: &str) -> Result<Self> {
        let (path, options) = parse_selector(selector)?;
        Self::open_with_options(path, options)
    }

    /// Opens a dump file selecting the N-th (1-based) heap dump in it.
    pub fn open_indexed(path: impl AsRef<Path>, n: u32) -> Result<Self> {
        Self::open_with_options(path, ReadOptions::default().dump_number(n))
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        let file = fs::File::open(path.as_ref())?;
        let store = open_store(file, &options.gzip)?;
        Self::with_store(Arc::new(store), options)
    }

    /// Opens a dump over an already constructed store.
    pub fn with_store(store: Arc<DumpStore>, options: ReadOptions) -> Result<Self> {
        let mut stream = StreamReader::new(Arc::clone(&store), 0);
        let version = read_banner(&mut stream)?;

        let mut tail = HeaderTail::new_zeroed();
        stream.read_exact(tail.as_mut_bytes())?;
        let raw = tail.id_size.get();
        let Some(id_size) = IdSize::from_header(raw) else {
            bail!(ErrorInner::UnsupportedIdSize(raw));
        };
        trace!("dump version {version}, {} byte ids", id_size.in_bytes());

        Ok(Self {
            buf: ReadBuffer::new(store, id_size),
            version,
            timestamp_ms: tail.timestamp_ms.get(),
            records_start: stream.position(),
            options,
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn id_size(&self) -> IdSize {
        self.buf.id_size()
    }

    /// Milliseconds since the epoch at which the dump was written.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Random access to the dump's bytes, e.g. for object payloads.
    pub fn buffer(&self) -> &ReadBuffer {
        &self.buf
    }

    pub fn store(&self) -> &Arc<DumpStore> {
        self.buf.store()
    }

    pub fn is_compressed(&self) -> bool {
        self.buf.store().is_compressed()
    }

    /// Approximate backing-file offset for a dump offset, for progress
    /// reporting.
    pub fn approx_file_offset(&self, pos: u64) -> u64 {
        self.buf.store().approx_file_offset(pos)
    }

    /// Drops cached decompressed data, if any.
    pub fn clear_cache(&self) {
        self.buf.store().clear_cache();
    }

    /// Walks the records and feeds the selected heap dump to `sink`.
    pub fn read_into<S: Sink>(&self, sink: &mut S) -> Result<Summary> {
        let wanted = self.options.dump_number.unwrap_or(1).max(1);
        let rdr = DumpReader {
            stream: self.buf.stream_at(self.records_start),
            version: self.version,
            id_size: self.buf.id_size(),
            dumps_to_skip: wanted - 1,
            wanted_dump: wanted,
            found_dump: false,
            track_stacks: self.options.track_stacks,
            sink,
            names: HashMap::new(),
            class_name_by_serial: HashMap::new(),
            class_name_by_id: HashMap::new(),
            frames: HashMap::new(),
            traces: HashMap::new(),
            threads: HashMap::new(),
            summary: Summary::default(),
        };
        rdr.run()
    }

    /// Parses the selected heap dump into an in-memory [`Snapshot`].
    pub fn snapshot(&self) -> Result<(Snapshot, Summary)> {
        let mut snap = Snapshot::new();
        let summary = self.read_into(&mut snap)?;
        Ok((snap, summary))
    }
}

/// Statistics and diagnostics of one parsing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Top-level records walked, including skipped ones.
    pub records: u64,
    /// Sub-records parsed from the selected heap dump.
    pub heap_sub_records: u64,
    /// Recoverable oddities that were logged and skipped.
    pub warnings: u64,
    /// The stream ended inside the heap dump; the parse kept everything up
    /// to that point.
    pub truncated: bool,
}

/// Sniffs the compression of `file` and wraps it accordingly.
fn open_store(file: fs::File, gzip_config: &gzip::Config) -> Result<DumpStore> {
    let mut magic = [0u8; 2];
    let is_gzip = file.read_exact_at(0, &mut magic).is_ok() && magic == gzip::MAGIC;
    if !is_gzip {
        return Ok(DumpStore::Plain(file));
    }
    match BlockedGzipReader::new_with_config(file, gzip_config)? {
        Some(gz) => Ok(DumpStore::BlockedGzip(gz)),
        None => bail!(ErrorInner::GzipNotBlocked),
    }
}

/// Splits `path#N` at the last `#`. When a `#` is present its suffix must be
/// a positive dump number.
fn parse_selector(selector: &str) -> Result<(PathBuf, ReadOptions)> {
    let Some((path, suffix)) = selector.rsplit_once('#') else {
        return Ok((PathBuf::from(selector), ReadOptions::default()));
    };
    match suffix.parse::<u32>() {
        Ok(n) if n > 0 => Ok((PathBuf::from(path), ReadOptions::default().dump_number(n))),
        _ => bail!(ErrorInner::InvalidDumpSelector(suffix.to_owned())),
    }
}

fn read_banner(stream: &mut StreamReader) -> Result<Version> {
    let mut banner = Vec::new();
    loop {
        match stream.try_read_u8() {
            Ok(Some(0)) => break,
            Ok(Some(b)) => {
                banner.push(b);
                if banner.len() > MAX_BANNER_LEN {
                    bail!(ErrorInner::UnknownVersion);
                }
            }
            Ok(None) => bail!(ErrorInner::UnknownVersion),
            Err(err) => return Err(err.into()),
        }
    }
    match VERSION_BANNERS.iter().find(|(s, _)| s == &banner.as_slice()) {
        Some(&(_, version)) => Ok(version),
        None => bail!(ErrorInner::UnknownVersion),
    }
}

/// A thread object announced in the heap dump, keyed by thread serial.
#[derive(Debug, Clone, Copy)]
struct ThreadObject {
    id: Id,
    trace_serial: Serial,
}

/// What the record loop should do after a record.
enum Flow {
    Continue,
    Done,
}

/// Stream state and side tables of one parsing pass.
struct DumpReader<'a, S> {
    stream: StreamReader,
    version: Version,
    id_size: IdSize,
    /// Heap dumps left to pass over before the wanted one.
    dumps_to_skip: u32,
    wanted_dump: u32,
    found_dump: bool,
    track_stacks: bool,
    sink: &'a mut S,

    // Side tables, filled by non-heap records.
    names: HashMap<Id, BString>,
    class_name_by_serial: HashMap<Serial, BString>,
    class_name_by_id: HashMap<Id, BString>,
    frames: HashMap<Id, Arc<StackFrame>>,
    traces: HashMap<Serial, Arc<StackTrace>>,
    threads: HashMap<Serial, ThreadObject>,

    summary: Summary,
}

impl<S: Sink> DumpReader<'_, S> {
    fn run(mut self) -> Result<Summary> {
        loop {
            let pos = self.stream.position();
            // A clean end of data at a record boundary ends the walk.
            let tag = match self.stream.try_read_u8() {
                Ok(Some(tag)) => RecordTag(tag),
                Ok(None) => break,
                Err(err) => return Err(Error::from(err).at_offset(pos)),
            };
            match self.read_record(tag, pos) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done) => break,
                Err(err) => return Err(err.at_offset(pos)),
            }
        }
        if !self.found_dump {
            bail!(ErrorInner::DumpNotFound {
                wanted: self.wanted_dump,
                found: self.wanted_dump - 1 - self.dumps_to_skip,
            });
        }
        Ok(self.summary)
    }

    fn read_record(&mut self, tag: RecordTag, pos: u64) -> Result<Flow> {
        let _timestamp = self.stream.read_u32()?;
        let len = self.stream.read_u32()?;
        self.summary.records += 1;
        trace!("record {tag:?} at {pos:#x}, {len} bytes");

        match tag {
            RecordTag::UTF8 => self.read_utf8(len)?,
            RecordTag::LOAD_CLASS => self.read_load_class()?,
            RecordTag::STACK_FRAME | RecordTag::STACK_TRACE if !self.track_stacks => {
                self.stream.skip(len.into());
            }
            RecordTag::STACK_FRAME => self.read_frame()?,
            RecordTag::STACK_TRACE => self.read_trace()?,

            RecordTag::HEAP_DUMP => {
                if self.dumps_to_skip == 0 {
                    self.found_dump = true;
                    self.read_heap_dump(len, pos)?;
                    return Ok(Flow::Done);
                }
                self.dumps_to_skip -= 1;
                self.stream.skip(len.into());
            }
            RecordTag::HEAP_DUMP_SEGMENT if self.version.has_segments() => {
                if self.dumps_to_skip == 0 {
                    self.found_dump = true;
                    self.read_heap_dump(len, pos)?;
                    if self.summary.truncated {
                        return Ok(Flow::Done);
                    }
                } else {
                    self.stream.skip(len.into());
                }
            }
            RecordTag::HEAP_DUMP_END if self.version.has_segments() => {
                self.stream.skip(len.into());
                if self.dumps_to_skip == 0 {
                    // The end of the dump we parsed, even if it had no
                    // segments at all.
                    self.found_dump = true;
                    return Ok(Flow::Done);
                }
                self.dumps_to_skip -= 1;
            }

            RecordTag::UNLOAD_CLASS
            | RecordTag::ALLOC_SITES
            | RecordTag::HEAP_SUMMARY
            | RecordTag::START_THREAD
            | RecordTag::END_THREAD
            | RecordTag::CPU_SAMPLES
            | RecordTag::CONTROL_SETTINGS
            | RecordTag::LOCKSTATS_WAIT_TIME
            | RecordTag::LOCKSTATS_HOLD_TIME => self.stream.skip(len.into()),

            _ => {
                warn!("ignoring unrecognized record tag {:#04x} at {pos:#x}", tag.0);
                self.summary.warnings += 1;
                self.stream.skip(len.into());
            }
        }
        Ok(Flow::Continue)
    }

    /// A name table entry: an id followed by the string bytes.
    fn read_utf8(&mut self, len: u32) -> Result<()> {
        let Some(body_len) = u64::from(len).checked_sub(self.id_size.in_bytes()) else {
            bail!(ErrorInner::BadRecordLength {
                tag: RecordTag::UTF8,
                len,
            });
        };
        let id = self.stream.read_id(self.id_size)?;
        let mut body = vec![0u8; body_len as usize];
        self.stream.read_exact(&mut body)?;
        self.names.insert(id, body.into());
        Ok(())
    }

    fn read_load_class(&mut self) -> Result<()> {
        let serial = self.stream.read_u32()?;
        let class_id = self.stream.read_id(self.id_size)?;
        let _stack_serial = self.stream.read_u32()?;
        let name_id = self.stream.read_id(self.id_size)?;

        let name = self.lookup_name(name_id);
        let dotted: BString = name
            .iter()
            .map(|&b| if b == b'/' { b'.' } else { b })
            .collect::<Vec<u8>>()
            .into();
        // The serial table only serves stack frame resolution.
        if self.track_stacks {
            self.class_name_by_serial.insert(serial, dotted.clone());
        }
        self.class_name_by_id.insert(class_id, dotted);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<()> {
        let id = self.stream.read_id(self.id_size)?;
        let method_name = {
            let name_id = self.stream.read_id(self.id_size)?;
            self.lookup_name(name_id)
        };
        let method_signature = {
            let sig_id = self.stream.read_id(self.id_size)?;
            self.lookup_name(sig_id)
        };
        let source_file = {
            let file_id = self.stream.read_id(self.id_size)?;
            self.lookup_name(file_id)
        };
        let class_serial = self.stream.read_u32()?;
        let raw_line = self.stream.read_i32()?;

        let Some(class_name) = self.class_name_by_serial.get(&class_serial).cloned() else {
            bail!(ErrorInner::MissingClass {
                serial: class_serial,
            });
        };
        let line = match LineNumber::from_raw(raw_line) {
            Some(line) => line,
            None => {
                warn!("weird stack frame line number: {raw_line}");
                self.summary.warnings += 1;
                LineNumber::Unknown
            }
        };

        self.frames.insert(
            id,
            Arc::new(StackFrame {
                method_name,
                method_signature,
                source_file,
                class_name,
                line,
            }),
        );
        Ok(())
    }

    fn read_trace(&mut self) -> Result<()> {
        let serial = self.stream.read_u32()?;
        let thread_serial = self.stream.read_u32()?;
        let frame_count = self.stream.read_u32()?;
        let mut frames = Vec::new();
        for _ in 0..frame_count {
            let frame_id = self.stream.read_id(self.id_size)?;
            let Some(frame) = self.frames.get(&frame_id) else {
                bail!(ErrorInner::MissingFrame { id: frame_id });
            };
            frames.push(Arc::clone(frame));
        }
        self.traces.insert(
            serial,
            Arc::new(StackTrace {
                thread_serial,
                frames,
            }),
        );
        Ok(())
    }

    /// Resolves a name table id. Null ids are empty; an unregistered id
    /// warns and yields a placeholder.
    fn lookup_name(&mut self, id: Id) -> BString {
        if id.is_null() {
            return BString::default();
        }
        match self.names.get(&id) {
            Some(name) => name.clone(),
            None => {
                warn!("name not found at {id}");
                self.summary.warnings += 1;
                format!("unresolved name {id:#x}").into_bytes().into()
            }
        }
    }

    /// Trace for a serial; `None` for serial zero or when tracking is off.
    /// A nonzero serial that was never announced warns and also yields
    /// `None`.
    fn trace_for_serial(&mut self, serial: Serial) -> Option<Arc<StackTrace>> {
        if serial == 0 || !self.track_stacks {
            return None;
        }
        match self.traces.get(&serial) {
            Some(trace) => Some(Arc::clone(trace)),
            None => {
                warn!("stack trace not found for serial {serial}");
                self.summary.warnings += 1;
                None
            }
        }
    }

    fn read_value_type(&mut self) -> Result<JavaType> {
        let code = self.stream.read_u8()?;
        let ty = if self.version.numeric_type_codes() {
            JavaType::from_numeric(code)
        } else {
            JavaType::from_signature(code)
        };
        match ty {
            Some(ty) => Ok(ty),
            None => bail!(ErrorInner::InvalidTypeCode(code)),
        }
    }
}
