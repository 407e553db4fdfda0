#[cfg(feature = "log")]
#[macro_use(trace_time)]
extern crate measure_time;

#[cfg(feature = "log")]
#[macro_use(trace, warn)]
extern crate log;

#[cfg(not(feature = "log"))]
#[macro_use]
mod macros {
    macro_rules! trace {
        ($($tt:tt)*) => {
            let _ = if false {
                let _ = ::std::format_args!($($tt)*);
            };
        };
    }

    macro_rules! warn {
        ($($tt:tt)*) => {
            let _ = if false {
                let _ = ::std::format_args!($($tt)*);
            };
        };
    }

    macro_rules! trace_time {
        ($($tt:tt)*) => {
            trace!($($tt)*)
        };
    }
}

macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err(Into::into($err))
    };
}

pub mod buffer;
pub mod gzip;
pub mod model;
pub mod reader;

pub use positioned_io;

use std::fmt;

pub use buffer::{DumpStore, ReadBuffer};
pub use gzip::BlockedGzipReader;
pub use model::{
    FieldDecl, HeapObject, JavaClass, JavaType, JavaValue, LineNumber, Root, RootKind, Sink,
    Snapshot, StackFrame, StackTrace, StaticField,
};
pub use reader::{Dump, Error, ReadOptions, Result, Summary, Version};

/// A parse-pass-local serial number (class serial, thread serial, stack-trace
/// serial), distinct from the stable object [`Id`].
pub type Serial = u32;

/// A stable object identifier.
///
/// On the wire an identifier is 4 or 8 bytes wide depending on the
/// [`IdSize`] declared in the dump header; 4-byte identifiers are
/// zero-extended so they stay comparable as 64-bit keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    /// The null identifier, used by the format for "no object".
    pub const NULL: Self = Self(0);

    #[must_use]
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:#x})", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// The identifier width declared in the dump header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IdSize {
    U32,
    U64,
}

impl IdSize {
    /// Maps the header's raw identifier-size field. Only 4 and 8 are legal.
    pub(crate) fn from_header(raw: u32) -> Option<Self> {
        match raw {
            4 => Some(Self::U32),
            8 => Some(Self::U64),
            _ => None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn in_bytes(self) -> u64 {
        match self {
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}
