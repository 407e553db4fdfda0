//! Sub-record parsing for `HEAP_DUMP` and `HEAP_DUMP_SEGMENT` payloads.
//!
//! Instance field blobs and array elements are not decoded here. Their
//! stream position is recorded on the emitted object so a consumer can read
//! them later through the dump's [`ReadBuffer`](crate::ReadBuffer), once
//! class schemas are known.

use std::sync::Arc;

use crate::{
    Id,
    model::{
        FieldDecl, HeapObject, JavaClass, JavaType, Root, RootKind, Sink, StackTrace, StaticField,
    },
};

use super::{DumpReader, ErrorInner, Result, SubRecordTag, ThreadObject};

impl<S: Sink> DumpReader<'_, S> {
    /// Parses `len` bytes worth of sub-records. A premature end of data
    /// stops the parse, keeps everything read so far and flags
    /// [`Summary::truncated`](super::Summary::truncated).
    pub(super) fn read_heap_dump(&mut self, len: u32, record_pos: u64) -> Result<()> {
        let mut bytes_left = i64::from(len);
        while bytes_left > 0 {
            let start = self.stream.position();
            let tag = match self.stream.try_read_u8()? {
                Some(tag) => SubRecordTag(tag),
                None => return self.note_truncation(record_pos),
            };
            self.summary.heap_sub_records += 1;
            match self.read_sub_record(tag, (bytes_left - 1) as u64) {
                Ok(()) => {}
                Err(err) if err.is_unexpected_eof() => return self.note_truncation(record_pos),
                Err(err) => return Err(err),
            }
            bytes_left -= (self.stream.position() - start) as i64;
        }
        if bytes_left != 0 {
            warn!("heap dump byte count is {bytes_left} instead of 0");
            self.summary.warnings += 1;
        }
        Ok(())
    }

    #[cold]
    fn note_truncation(&mut self, record_pos: u64) -> Result<()> {
        warn!("heap dump record at {record_pos:#x} ends prematurely, keeping what was read");
        self.summary.warnings += 1;
        self.summary.truncated = true;
        Ok(())
    }

    /// `rest` is the byte count left in the enclosing record after the tag,
    /// used to bail out of it when the tag is unrecognized.
    fn read_sub_record(&mut self, tag: SubRecordTag, rest: u64) -> Result<()> {
        match tag {
            SubRecordTag::ROOT_UNKNOWN => self.simple_root(RootKind::Unknown)?,
            SubRecordTag::ROOT_JNI_GLOBAL => {
                let id = self.stream.read_id(self.id_size)?;
                let _global_ref_id = self.stream.read_id(self.id_size)?;
                self.sink.add_root(Root {
                    id,
                    kind: RootKind::JniGlobal,
                    thread_serial: None,
                    referrer_id: Id::NULL,
                    stack_trace: None,
                });
            }
            SubRecordTag::ROOT_JNI_LOCAL => self.thread_root(RootKind::JniLocal, true)?,
            SubRecordTag::ROOT_JAVA_FRAME => self.thread_root(RootKind::JavaFrame, true)?,
            SubRecordTag::ROOT_NATIVE_STACK => self.thread_root(RootKind::NativeStack, false)?,
            SubRecordTag::ROOT_STICKY_CLASS => self.simple_root(RootKind::StickyClass)?,
            SubRecordTag::ROOT_THREAD_BLOCK => self.thread_root(RootKind::ThreadBlock, false)?,
            SubRecordTag::ROOT_MONITOR_USED => self.simple_root(RootKind::MonitorUsed)?,
            SubRecordTag::ROOT_THREAD_OBJ => {
                let id = self.stream.read_id(self.id_size)?;
                let thread_serial = self.stream.read_u32()?;
                let trace_serial = self.stream.read_u32()?;
                self.threads
                    .insert(thread_serial, ThreadObject { id, trace_serial });
            }
            SubRecordTag::CLASS_DUMP => self.read_class_dump()?,
            SubRecordTag::INSTANCE_DUMP => self.read_instance_dump()?,
            SubRecordTag::OBJECT_ARRAY_DUMP => self.read_object_array()?,
            SubRecordTag::PRIMITIVE_ARRAY_DUMP => self.read_primitive_array()?,
            _ => {
                // Sub-records carry no length of their own, so an unknown
                // tag forfeits the rest of the enclosing record.
                warn!(
                    "ignoring unrecognized heap sub-record tag {:#04x} and the {rest} bytes after it",
                    tag.0
                );
                self.summary.warnings += 1;
                self.stream.skip(rest);
            }
        }
        Ok(())
    }

    /// A root that is nothing but an object id.
    fn simple_root(&mut self, kind: RootKind) -> Result<()> {
        let id = self.stream.read_id(self.id_size)?;
        self.sink.add_root(Root {
            id,
            kind,
            thread_serial: None,
            referrer_id: Id::NULL,
            stack_trace: None,
        });
        Ok(())
    }

    /// A root owned by a thread. The frame-carrying kinds also record the
    /// call depth; the thread's trace is narrowed to the frames above it.
    fn thread_root(&mut self, kind: RootKind, has_depth: bool) -> Result<()> {
        let id = self.stream.read_id(self.id_size)?;
        let thread_serial = self.stream.read_u32()?;
        let depth = if has_depth {
            Some(self.stream.read_i32()?)
        } else {
            None
        };

        let Some(&thread) = self.threads.get(&thread_serial) else {
            bail!(ErrorInner::MissingThread {
                serial: thread_serial,
            });
        };
        let mut stack_trace = self.trace_for_serial(thread.trace_serial);
        if let (Some(trace), Some(depth)) = (&stack_trace, depth) {
            let keep = (i64::from(depth) + 1).max(0) as usize;
            stack_trace = Some(trace.for_depth(keep));
        }
        self.sink.add_root(Root {
            id,
            kind,
            thread_serial: Some(thread_serial),
            referrer_id: thread.id,
            stack_trace,
        });
        Ok(())
    }

    fn read_class_dump(&mut self) -> Result<()> {
        let id = self.stream.read_id(self.id_size)?;
        let stack_serial = self.stream.read_u32()?;
        let super_id = self.stream.read_id(self.id_size)?;
        let classloader_id = self.stream.read_id(self.id_size)?;
        let signers_id = self.stream.read_id(self.id_size)?;
        let protection_domain_id = self.stream.read_id(self.id_size)?;
        let _reserved1 = self.stream.read_id(self.id_size)?;
        let _reserved2 = self.stream.read_id(self.id_size)?;
        let instance_size = self.stream.read_u32()?;

        // Constant pool values only matter for their size.
        let constant_count = self.stream.read_u16()?;
        for _ in 0..constant_count {
            let _index = self.stream.read_u16()?;
            let ty = self.read_value_type()?;
            self.stream.skip(ty.size(self.id_size));
        }

        let static_count = self.stream.read_u16()?;
        let mut static_fields = Vec::with_capacity(static_count.into());
        for _ in 0..static_count {
            let name_id = self.stream.read_id(self.id_size)?;
            let name = self.lookup_name(name_id);
            let ty = self.read_value_type()?;
            let value = ty.read(&mut self.stream, self.id_size)?;
            static_fields.push(StaticField { name, value });
        }

        let field_count = self.stream.read_u16()?;
        let mut fields = Vec::with_capacity(field_count.into());
        for _ in 0..field_count {
            let name_id = self.stream.read_id(self.id_size)?;
            let name = self.lookup_name(name_id);
            let ty = self.read_value_type()?;
            fields.push(FieldDecl { name, ty });
        }

        let name = match self.class_name_by_id.get(&id) {
            Some(name) => name.clone(),
            None => {
                warn!("class name not found for {id}");
                self.summary.warnings += 1;
                format!("unknown-name@{id:#x}").into_bytes().into()
            }
        };
        let stack_trace = self.trace_for_serial(stack_serial);

        self.sink.add_class(JavaClass {
            id,
            name,
            super_id,
            classloader_id,
            signers_id,
            protection_domain_id,
            instance_size,
            static_fields,
            fields,
            stack_trace: stack_trace.clone(),
        });
        self.note_site_trace(id, stack_trace);
        Ok(())
    }

    fn read_instance_dump(&mut self) -> Result<()> {
        let id = self.stream.read_id(self.id_size)?;
        let stack_serial = self.stream.read_u32()?;
        let class_id = self.stream.read_id(self.id_size)?;
        if self.sink.find_class(class_id).is_none() {
            bail!(ErrorInner::UnknownClassId(class_id));
        }

        // The field blob cannot be decoded without the full class hierarchy,
        // so only its position is kept.
        let fields_len = self.stream.read_u32()?;
        let fields_pos = self.stream.position();
        self.stream.skip(fields_len.into());

        let stack_trace = self.trace_for_serial(stack_serial);
        self.add_object(
            HeapObject::Instance {
                id,
                class_id,
                stack_trace: stack_trace.clone(),
                fields_pos,
                fields_len,
            },
            stack_trace,
        );
        Ok(())
    }

    fn read_object_array(&mut self) -> Result<()> {
        let id = self.stream.read_id(self.id_size)?;
        let stack_serial = self.stream.read_u32()?;
        let len = self.stream.read_u32()?;
        let stack_trace = self.trace_for_serial(stack_serial);

        if !self.version.numeric_type_codes() {
            // The oldest format squeezes primitive arrays through this
            // record: the element class id slot may hold a primitive type
            // code instead of a real id.
            let code = self.stream.read_id(self.id_size)?;
            let prim = u8::try_from(code.get())
                .ok()
                .and_then(JavaType::from_numeric)
                .filter(|ty| *ty != JavaType::Object);
            if let Some(elem_ty) = prim {
                let elems_pos = self.stream.position();
                self.stream.skip(u64::from(len) * elem_ty.size(self.id_size));
                self.add_object(
                    HeapObject::PrimitiveArray {
                        id,
                        elem_ty,
                        stack_trace: stack_trace.clone(),
                        len,
                        elems_pos,
                    },
                    stack_trace,
                );
            } else {
                let elems_pos = self.stream.position();
                self.stream.skip(u64::from(len) * self.id_size.in_bytes());
                self.add_object(
                    HeapObject::ObjectArray {
                        id,
                        elem_class_id: code,
                        stack_trace: stack_trace.clone(),
                        len,
                        elems_pos,
                    },
                    stack_trace,
                );
            }
            return Ok(());
        }

        let elem_class_id = self.stream.read_id(self.id_size)?;
        let elems_pos = self.stream.position();
        self.stream.skip(u64::from(len) * self.id_size.in_bytes());
        self.add_object(
            HeapObject::ObjectArray {
                id,
                elem_class_id,
                stack_trace: stack_trace.clone(),
                len,
                elems_pos,
            },
            stack_trace,
        );
        Ok(())
    }

    fn read_primitive_array(&mut self) -> Result<()> {
        let id = self.stream.read_id(self.id_size)?;
        let stack_serial = self.stream.read_u32()?;
        let len = self.stream.read_u32()?;
        let elem_ty = self.read_value_type()?;
        let elems_pos = self.stream.position();
        self.stream.skip(u64::from(len) * elem_ty.size(self.id_size));

        let stack_trace = self.trace_for_serial(stack_serial);
        self.add_object(
            HeapObject::PrimitiveArray {
                id,
                elem_ty,
                stack_trace: stack_trace.clone(),
                len,
                elems_pos,
            },
            stack_trace,
        );
        Ok(())
    }

    /// Hands the object to the sink, then its allocation-site trace when
    /// there is a non-empty one.
    fn add_object(&mut self, obj: HeapObject, trace: Option<Arc<StackTrace>>) {
        let id = obj.id();
        self.sink.add_object(obj);
        self.note_site_trace(id, trace);
    }

    /// Allocation sites are only worth recording with at least one frame.
    fn note_site_trace(&mut self, id: Id, trace: Option<Arc<StackTrace>>) {
        if let Some(trace) = trace {
            if !trace.frames.is_empty() {
                self.sink.set_site_trace(id, trace);
            }
        }
    }
}
