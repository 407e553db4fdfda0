//! The object model produced by a parse: classes, heap objects, GC roots
//! and stack traces.
//!
//! Parsed objects are deliberately shallow. Field and element payloads stay
//! in the store and are described by position and length, so a multi-gigabyte
//! dump can be walked without materializing its data; [`ReadBuffer`] reads
//! them back on demand. Strings are [`BString`]s because names in a dump are
//! only nominally UTF-8.

use std::{collections::HashMap, io, sync::Arc};

use bstr::BString;

use crate::{
    Id, IdSize, Serial,
    buffer::{ReadBuffer, StreamReader},
};

/// The type of a field or array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JavaType {
    Object,
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl JavaType {
    /// Maps the numeric type codes used by version 1.0.1 and later.
    pub fn from_numeric(code: u8) -> Option<Self> {
        Some(match code {
            2 => Self::Object,
            4 => Self::Boolean,
            5 => Self::Char,
            6 => Self::Float,
            7 => Self::Double,
            8 => Self::Byte,
            9 => Self::Short,
            10 => Self::Int,
            11 => Self::Long,
            _ => return None,
        })
    }

    /// Maps the JVM signature characters used by version 1.0.
    pub fn from_signature(sig: u8) -> Option<Self> {
        Some(match sig {
            b'L' | b'[' => Self::Object,
            b'Z' => Self::Boolean,
            b'C' => Self::Char,
            b'F' => Self::Float,
            b'D' => Self::Double,
            b'B' => Self::Byte,
            b'S' => Self::Short,
            b'I' => Self::Int,
            b'J' => Self::Long,
            _ => return None,
        })
    }

    /// The JVM signature character for this type.
    #[must_use]
    pub const fn signature(self) -> u8 {
        match self {
            Self::Object => b'L',
            Self::Boolean => b'Z',
            Self::Char => b'C',
            Self::Float => b'F',
            Self::Double => b'D',
            Self::Byte => b'B',
            Self::Short => b'S',
            Self::Int => b'I',
            Self::Long => b'J',
        }
    }

    /// Encoded size of one value of this type.
    #[must_use]
    pub const fn size(self, id_size: IdSize) -> u64 {
        match self {
            Self::Object => id_size.in_bytes(),
            Self::Boolean | Self::Byte => 1,
            Self::Char | Self::Short => 2,
            Self::Float | Self::Int => 4,
            Self::Double | Self::Long => 8,
        }
    }

    /// Reads one value of this type from a forward cursor.
    pub fn read(self, r: &mut StreamReader, id_size: IdSize) -> io::Result<JavaValue> {
        Ok(match self {
            Self::Object => JavaValue::Object(r.read_id(id_size)?),
            Self::Boolean => JavaValue::Boolean(r.read_u8()? != 0),
            Self::Char => JavaValue::Char(r.read_u16()?),
            Self::Float => JavaValue::Float(f32::from_bits(r.read_u32()?)),
            Self::Double => JavaValue::Double(f64::from_bits(r.read_u64()?)),
            Self::Byte => JavaValue::Byte(r.read_u8()? as i8),
            Self::Short => JavaValue::Short(r.read_u16()? as i16),
            Self::Int => JavaValue::Int(r.read_i32()?),
            Self::Long => JavaValue::Long(r.read_u64()? as i64),
        })
    }

    /// Reads one value of this type at a store position.
    pub fn read_at(self, buf: &ReadBuffer, pos: u64) -> io::Result<JavaValue> {
        Ok(match self {
            Self::Object => JavaValue::Object(buf.get_id(pos)?),
            Self::Boolean => JavaValue::Boolean(buf.get_u8(pos)? != 0),
            Self::Char => JavaValue::Char(buf.get_u16(pos)?),
            Self::Float => JavaValue::Float(f32::from_bits(buf.get_u32(pos)?)),
            Self::Double => JavaValue::Double(f64::from_bits(buf.get_u64(pos)?)),
            Self::Byte => JavaValue::Byte(buf.get_u8(pos)? as i8),
            Self::Short => JavaValue::Short(buf.get_u16(pos)? as i16),
            Self::Int => JavaValue::Int(buf.get_u32(pos)? as i32),
            Self::Long => JavaValue::Long(buf.get_u64(pos)? as i64),
        })
    }
}

/// A single field or array element value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JavaValue {
    Object(Id),
    Boolean(bool),
    Char(u16),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
}

impl JavaValue {
    #[must_use]
    pub const fn ty(&self) -> JavaType {
        match self {
            Self::Object(_) => JavaType::Object,
            Self::Boolean(_) => JavaType::Boolean,
            Self::Char(_) => JavaType::Char,
            Self::Float(_) => JavaType::Float,
            Self::Double(_) => JavaType::Double,
            Self::Byte(_) => JavaType::Byte,
            Self::Short(_) => JavaType::Short,
            Self::Int(_) => JavaType::Int,
            Self::Long(_) => JavaType::Long,
        }
    }
}

/// Source position of a stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineNumber {
    Unknown,
    Compiled,
    Native,
    Line(u32),
}

impl LineNumber {
    /// Maps the encoded value. `None` for values below the native sentinel.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Self::Unknown),
            -2 => Some(Self::Compiled),
            -3 => Some(Self::Native),
            n if n >= 0 => Some(Self::Line(n as u32)),
            _ => None,
        }
    }
}

impl std::fmt::Display for LineNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => f.pad("(unknown)"),
            Self::Compiled => f.pad("(compiled method)"),
            Self::Native => f.pad("(native method)"),
            Self::Line(n) => write!(f, "line {n}"),
        }
    }
}

/// One frame of a recorded stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub method_name: BString,
    pub method_signature: BString,
    pub source_file: BString,
    /// Resolved name of the frame's class.
    pub class_name: BString,
    pub line: LineNumber,
}

/// A recorded stack trace, frames innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTrace {
    pub thread_serial: Serial,
    pub frames: Vec<Arc<StackFrame>>,
}

impl StackTrace {
    /// The trace truncated to its `depth` innermost frames; the trace itself
    /// when it is already that shallow.
    #[must_use]
    pub fn for_depth(self: &Arc<Self>, depth: usize) -> Arc<Self> {
        if depth >= self.frames.len() {
            return Arc::clone(self);
        }
        Arc::new(Self {
            thread_serial: self.thread_serial,
            frames: self.frames[..depth].to_vec(),
        })
    }
}

/// An instance field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: BString,
    pub ty: JavaType,
}

/// A static field and its value at dump time.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticField {
    pub name: BString,
    pub value: JavaValue,
}

/// A class parsed from a class sub-record.
#[derive(Debug, Clone, PartialEq)]
pub struct JavaClass {
    pub id: Id,
    /// Binary name with dots, e.g. `java.lang.String`.
    pub name: BString,
    /// [`Id::NULL`] for `java.lang.Object`.
    pub super_id: Id,
    pub classloader_id: Id,
    pub signers_id: Id,
    pub protection_domain_id: Id,
    /// Declared byte size of one instance's field data.
    pub instance_size: u32,
    pub static_fields: Vec<StaticField>,
    /// Fields declared by this class itself, superclasses excluded.
    pub fields: Vec<FieldDecl>,
    pub stack_trace: Option<Arc<StackTrace>>,
}

/// An object from the heap-dump stream.
///
/// Field and element payloads are not materialized; the variants carry the
/// store position of the data so consumers can read it lazily through
/// [`ReadBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapObject {
    /// An ordinary class instance.
    Instance {
        id: Id,
        class_id: Id,
        stack_trace: Option<Arc<StackTrace>>,
        /// Store position of the field data.
        fields_pos: u64,
        /// Byte length of the field data.
        fields_len: u32,
    },
    /// An array of object references.
    ObjectArray {
        id: Id,
        elem_class_id: Id,
        stack_trace: Option<Arc<StackTrace>>,
        /// Element count, not a byte length.
        len: u32,
        /// Store position of the element identifiers.
        elems_pos: u64,
    },
    /// An array of a primitive type.
    PrimitiveArray {
        id: Id,
        elem_ty: JavaType,
        stack_trace: Option<Arc<StackTrace>>,
        len: u32,
        elems_pos: u64,
    },
}

impl HeapObject {
    #[must_use]
    pub fn id(&self) -> Id {
        match self {
            Self::Instance { id, .. }
            | Self::ObjectArray { id, .. }
            | Self::PrimitiveArray { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn stack_trace(&self) -> Option<&Arc<StackTrace>> {
        match self {
            Self::Instance { stack_trace, .. }
            | Self::ObjectArray { stack_trace, .. }
            | Self::PrimitiveArray { stack_trace, .. } => stack_trace.as_ref(),
        }
    }
}

/// How a GC root references its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Unknown,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
}

impl std::fmt::Display for RootKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Unknown => "Unknown",
            Self::JniGlobal => "JNI Global",
            Self::JniLocal => "JNI Local",
            Self::JavaFrame => "Java Local",
            Self::NativeStack => "Native Stack",
            Self::StickyClass => "System Class",
            Self::ThreadBlock => "Thread Block",
            Self::MonitorUsed => "Busy Monitor",
        })
    }
}

/// A GC root entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    /// The referenced object.
    pub id: Id,
    pub kind: RootKind,
    /// Serial of the owning thread, for thread-bound root kinds.
    pub thread_serial: Option<Serial>,
    /// Object id of the owning thread, [`Id::NULL`] when there is none.
    pub referrer_id: Id,
    pub stack_trace: Option<Arc<StackTrace>>,
}

/// Receives model objects as the heap-dump stream is parsed.
///
/// Methods are called in stream order. A site trace always arrives after the
/// object it belongs to was added.
pub trait Sink {
    fn add_class(&mut self, class: JavaClass);

    fn add_object(&mut self, obj: HeapObject);

    fn add_root(&mut self, root: Root);

    /// Records the allocation-site trace of an already added object.
    fn set_site_trace(&mut self, id: Id, trace: Arc<StackTrace>);

    /// Looks up a class added earlier in this pass.
    fn find_class(&self, id: Id) -> Option<&JavaClass>;
}

/// An in-memory [`Sink`] retaining everything a parse produced.
#[derive(Debug, Default)]
pub struct Snapshot {
    classes: HashMap<Id, JavaClass>,
    objects: Vec<HeapObject>,
    roots: Vec<Root>,
    site_traces: HashMap<Id, Arc<StackTrace>>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classes(&self) -> impl ExactSizeIterator<Item = &JavaClass> {
        self.classes.values()
    }

    #[must_use]
    pub fn objects(&self) -> &[HeapObject] {
        &self.objects
    }

    #[must_use]
    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    #[must_use]
    pub fn site_trace(&self, id: Id) -> Option<&Arc<StackTrace>> {
        self.site_traces.get(&id)
    }
}

impl Sink for Snapshot {
    fn add_class(&mut self, class: JavaClass) {
        self.classes.insert(class.id, class);
    }

    fn add_object(&mut self, obj: HeapObject) {
        self.objects.push(obj);
    }

    fn add_root(&mut self, root: Root) {
        self.roots.push(root);
    }

    fn set_site_trace(&mut self, id: Id, trace: Arc<StackTrace>) {
        self.site_traces.insert(id, trace);
    }

    fn find_class(&self, id: Id) -> Option<&JavaClass> {
        self.classes.get(&id)
    }
}
