// Skein Binary Snapshots
// Byte format for compiled programs, values, references, threads and whole
// engine state. The host supplies the byte sink/source; `Vec<u8>` and
// `SliceSource` cover the in-memory case.

use crate::compiler::{Action, ActionKind, InlineFunction, Program};
use crate::engine::Engine;
use crate::error::{ErrorCode, ErrorPhase, ScriptError, SourcePos};
use crate::vm::reference::{AccessChain, RefTarget};
use crate::vm::{
    Accessor, Constness, Field, InlineFrame, Origin, Structure, Thread, ThreadId, ThreadStatus,
    Value, ValueKind, ValueRef, Variable, VariableTable,
};
use std::sync::Arc;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"SKNC";
const VERSION: u8 = 1;

const SECTION_PROGRAM: u8 = b'P';
const SECTION_THREAD: u8 = b'T';
const SECTION_ENGINE: u8 = b'E';

#[derive(Debug, Error, PartialEq)]
pub enum PersistError {
    #[error("Unexpected end of data at offset {at}")]
    Truncated { at: u64 },
    #[error("Not a Skein snapshot (bad magic)")]
    BadMagic,
    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
    #[error("Expected a {expected} snapshot")]
    WrongSection { expected: &'static str },
    #[error("Invalid {what} tag {tag} at offset {at}")]
    BadTag { what: &'static str, tag: u32, at: u64 },
    #[error("Invalid UTF-8 string at offset {at}")]
    BadString { at: u64 },
    #[error("Reference to unknown {0}")]
    UnknownTarget(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Host hook receiving serialized bytes
pub trait ByteSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> PersistResult<()>;
    /// Bytes written so far
    fn tell(&self) -> u64;
}

/// Host hook supplying bytes to deserialize
pub trait ByteSource {
    fn read_bytes(&mut self, buf: &mut [u8]) -> PersistResult<()>;
    /// Bytes consumed so far
    fn tell(&self) -> u64;
}

impl ByteSink for Vec<u8> {
    fn write_bytes(&mut self, bytes: &[u8]) -> PersistResult<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.len() as u64
    }
}

/// Cursor over an in-memory byte slice
pub struct SliceSource<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}

impl ByteSource for SliceSource<'_> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> PersistResult<()> {
        let end = self.cursor + buf.len();
        if end > self.data.len() {
            return Err(PersistError::Truncated {
                at: self.cursor as u64,
            });
        }
        buf.copy_from_slice(&self.data[self.cursor..end]);
        self.cursor = end;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.cursor as u64
    }
}

// ==================== Public entry points ====================

pub fn save_program<S: ByteSink + ?Sized>(out: &mut S, program: &Program) -> PersistResult<()> {
    write_header(out, SECTION_PROGRAM)?;
    write_program(out, program)
}

pub fn load_program<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Program> {
    read_header(input, SECTION_PROGRAM, "program")?;
    read_program(input)
}

/// Save a thread so it can be resumed later, typically while paused
pub fn save_thread<S: ByteSink + ?Sized>(out: &mut S, thread: &Thread) -> PersistResult<()> {
    write_header(out, SECTION_THREAD)?;
    write_thread(out, thread)
}

pub fn load_thread<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Thread> {
    read_header(input, SECTION_THREAD, "thread")?;
    read_thread(input)
}

/// Save the engine's globals, parked threads and their wait deadlines.
/// Host functions and constants are code and are not saved.
pub fn save_engine<S: ByteSink + ?Sized>(out: &mut S, engine: &Engine) -> PersistResult<()> {
    write_header(out, SECTION_ENGINE)?;
    write_table(out, engine.globals())?;

    let timers = engine.host().timers.entries();
    write_u32(out, timers.len() as u32)?;
    for (id, deadline) in timers {
        write_u64(out, id.0)?;
        write_i64(out, deadline)?;
    }

    let threads = engine.scheduler().threads();
    write_u32(out, threads.len() as u32)?;
    for thread in threads {
        write_thread(out, thread)?;
    }
    Ok(())
}

/// Replace an engine's globals and parked threads with a saved snapshot
pub fn load_engine<R: ByteSource + ?Sized>(input: &mut R, engine: &mut Engine) -> PersistResult<()> {
    read_header(input, SECTION_ENGINE, "engine")?;
    let globals = read_table(input)?;

    let timer_count = read_u32(input)?;
    let mut timers = Vec::with_capacity(timer_count.min(1024) as usize);
    for _ in 0..timer_count {
        let id = ThreadId(read_u64(input)?);
        timers.push((id, read_i64(input)?));
    }

    let thread_count = read_u32(input)?;
    let mut threads = Vec::with_capacity(thread_count.min(1024) as usize);
    for _ in 0..thread_count {
        threads.push(read_thread(input)?);
    }

    engine.restore_state(globals, threads, timers);
    Ok(())
}

// ==================== Header ====================

fn write_header<S: ByteSink + ?Sized>(out: &mut S, section: u8) -> PersistResult<()> {
    out.write_bytes(MAGIC)?;
    write_u8(out, VERSION)?;
    write_u8(out, section)
}

fn read_header<R: ByteSource + ?Sized>(
    input: &mut R,
    section: u8,
    expected: &'static str,
) -> PersistResult<()> {
    let mut magic = [0u8; 4];
    input.read_bytes(&mut magic)?;
    if &magic != MAGIC {
        return Err(PersistError::BadMagic);
    }
    let version = read_u8(input)?;
    if version != VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }
    if read_u8(input)? != section {
        return Err(PersistError::WrongSection { expected });
    }
    Ok(())
}

// ==================== Programs ====================

fn write_program<S: ByteSink + ?Sized>(out: &mut S, program: &Program) -> PersistResult<()> {
    write_u32(out, program.len() as u32)?;
    for action in program.actions() {
        let (tag, operand) = action.kind.code();
        write_u8(out, tag)?;
        write_u8(out, operand)?;
        write_u32(out, action.pos.0)?;
        write_i64(out, action.argument)?;
        write_value(out, &action.literal)?;
        match &action.inline {
            Some(function) => {
                write_u8(out, 1)?;
                write_inline(out, function)?;
            }
            None => write_u8(out, 0)?,
        }
    }
    write_strings(out, program.locals())
}

fn read_program<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Program> {
    let count = read_u32(input)?;
    let mut actions = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let at = input.tell();
        let tag = read_u8(input)?;
        let operand = read_u8(input)?;
        let kind = ActionKind::from_code(tag, operand).ok_or(PersistError::BadTag {
            what: "action",
            tag: tag as u32,
            at,
        })?;
        let pos = SourcePos(read_u32(input)?);
        let argument = read_i64(input)?;
        let literal = read_value(input)?;
        let mut action = Action::new(kind, pos)
            .with_literal(literal)
            .with_argument(argument);
        if read_bool(input)? {
            action.inline = Some(Arc::new(read_inline(input)?));
        }
        actions.push(action);
    }
    let locals = read_strings(input)?;
    Ok(Program::new(actions, locals))
}

fn write_inline<S: ByteSink + ?Sized>(out: &mut S, function: &InlineFunction) -> PersistResult<()> {
    write_string(out, &function.name)?;
    write_strings(out, &function.params)?;
    write_program(out, &function.program)
}

fn read_inline<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<InlineFunction> {
    let name = read_string(input)?;
    let params = read_strings(input)?;
    let program = read_program(input)?;
    Ok(InlineFunction {
        name,
        params,
        program,
    })
}

// ==================== Values ====================

pub fn write_value<S: ByteSink + ?Sized>(out: &mut S, value: &Value) -> PersistResult<()> {
    write_u8(out, value.kind() as u8)?;
    match value {
        Value::Int(n) => write_i64(out, *n),
        Value::Float(n) => out.write_bytes(&n.to_le_bytes()),
        Value::Str(s) => write_string(out, s),
        Value::Array(items) => {
            write_u32(out, items.len() as u32)?;
            for item in items {
                write_value(out, item)?;
            }
            Ok(())
        }
        Value::Structure(st) => {
            write_u64(out, st.id())?;
            write_u8(out, st.is_static as u8)?;
            write_u32(out, st.fields.len() as u32)?;
            for field in &st.fields {
                write_string(out, &field.name)?;
                write_u8(out, field.constness as u8)?;
                write_value(out, &field.value)?;
            }
            Ok(())
        }
    }
}

pub fn read_value<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Value> {
    let at = input.tell();
    let tag = read_u8(input)?;
    let kind = ValueKind::from_u8(tag).ok_or(PersistError::BadTag {
        what: "value",
        tag: tag as u32,
        at,
    })?;
    match kind {
        ValueKind::Int => Ok(Value::Int(read_i64(input)?)),
        ValueKind::Float => {
            let mut bytes = [0u8; 8];
            input.read_bytes(&mut bytes)?;
            Ok(Value::Float(f64::from_le_bytes(bytes)))
        }
        ValueKind::Str => Ok(Value::Str(read_string(input)?)),
        ValueKind::Array => {
            let count = read_u32(input)?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(read_value(input)?);
            }
            Ok(Value::Array(items))
        }
        ValueKind::Structure => {
            let id = read_u64(input)?;
            let is_static = read_bool(input)?;
            let count = read_u32(input)?;
            let mut fields = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let name = read_string(input)?;
                let constness = read_constness(input)?;
                let value = read_value(input)?;
                fields.push(Field {
                    name,
                    value,
                    constness,
                });
            }
            Ok(Value::Structure(Structure::with_id(id, is_static, fields)))
        }
    }
}

// ==================== References ====================

/// A stack item: its value plus the variable slot and accessor chain it
/// writes back to
pub fn write_ref<S: ByteSink + ?Sized>(out: &mut S, item: &ValueRef) -> PersistResult<()> {
    write_value(out, &item.value)?;
    let Some(target) = &item.target else {
        return write_u8(out, 0);
    };
    match target.origin {
        Origin::Global(slot) => {
            write_u8(out, 1)?;
            write_u32(out, slot)?;
        }
        Origin::Local(slot) => {
            write_u8(out, 2)?;
            write_u32(out, slot)?;
        }
        Origin::Frame { depth, slot } => {
            write_u8(out, 3)?;
            write_u32(out, depth)?;
            write_u32(out, slot)?;
        }
    }
    write_u32(out, target.chain.len() as u32)?;
    for step in &target.chain {
        match step {
            Accessor::Index(i) => {
                write_u8(out, 0)?;
                write_i64(out, *i)?;
            }
            Accessor::Field(name) => {
                write_u8(out, 1)?;
                write_string(out, name)?;
            }
        }
    }
    Ok(())
}

pub fn read_ref<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<ValueRef> {
    let value = read_value(input)?;
    let at = input.tell();
    let origin = match read_u8(input)? {
        0 => return Ok(ValueRef::rvalue(value)),
        1 => Origin::Global(read_u32(input)?),
        2 => Origin::Local(read_u32(input)?),
        3 => Origin::Frame {
            depth: read_u32(input)?,
            slot: read_u32(input)?,
        },
        tag => {
            return Err(PersistError::BadTag {
                what: "reference origin",
                tag: tag as u32,
                at,
            })
        }
    };

    let count = read_u32(input)?;
    let mut chain = AccessChain::new();
    for _ in 0..count {
        let at = input.tell();
        let step = match read_u8(input)? {
            0 => Accessor::Index(read_i64(input)?),
            1 => Accessor::Field(read_string(input)?),
            tag => {
                return Err(PersistError::BadTag {
                    what: "accessor",
                    tag: tag as u32,
                    at,
                })
            }
        };
        chain.push(step);
    }
    Ok(ValueRef {
        value,
        target: Some(Box::new(RefTarget { origin, chain })),
    })
}

fn write_refs<S: ByteSink + ?Sized>(out: &mut S, items: &[ValueRef]) -> PersistResult<()> {
    write_u32(out, items.len() as u32)?;
    for item in items {
        write_ref(out, item)?;
    }
    Ok(())
}

fn read_refs<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Vec<ValueRef>> {
    let count = read_u32(input)?;
    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        items.push(read_ref(input)?);
    }
    Ok(items)
}

// ==================== Variables ====================

fn write_table<S: ByteSink + ?Sized>(out: &mut S, table: &VariableTable) -> PersistResult<()> {
    write_u32(out, table.len() as u32)?;
    for var in table.iter() {
        write_string(out, &var.name)?;
        write_u8(out, var.constness as u8)?;
        write_value(out, &var.value)?;
    }
    Ok(())
}

fn read_table<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<VariableTable> {
    let count = read_u32(input)?;
    let mut vars = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let name = read_string(input)?;
        let constness = read_constness(input)?;
        let value = read_value(input)?;
        vars.push(Variable::new(name, value, constness));
    }
    Ok(VariableTable::from_variables(vars))
}

// ==================== Threads ====================

fn write_thread<S: ByteSink + ?Sized>(out: &mut S, thread: &Thread) -> PersistResult<()> {
    write_u64(out, thread.id.0)?;
    write_u8(out, thread.status as u8)?;
    write_u32(out, thread.ip as u32)?;
    write_u64(out, thread.step_limit)?;
    write_u64(out, thread.steps)?;
    write_u8(out, thread.trace as u8)?;
    write_optional_string(out, thread.label.as_deref())?;
    write_value(out, &thread.result)?;
    write_error(out, thread.error.as_ref())?;

    write_program(out, &thread.program)?;
    write_table(out, &thread.locals)?;
    write_refs(out, &thread.stack)?;

    let mut inlines: Vec<&Arc<InlineFunction>> = thread.inlines.values().collect();
    inlines.sort_by(|a, b| a.name.cmp(&b.name));
    write_u32(out, inlines.len() as u32)?;
    for function in inlines {
        write_inline(out, function)?;
    }

    // Frames refer to their function by name
    write_u32(out, thread.frames.len() as u32)?;
    for frame in &thread.frames {
        write_string(out, &frame.function.name)?;
        write_u32(out, frame.return_ip as u32)?;
        write_refs(out, &frame.saved_stack)?;
        write_table(out, &frame.locals)?;
    }
    Ok(())
}

fn read_thread<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Thread> {
    let id = ThreadId(read_u64(input)?);
    let at = input.tell();
    let status_tag = read_u8(input)?;
    let status = ThreadStatus::from_u8(status_tag).ok_or(PersistError::BadTag {
        what: "thread status",
        tag: status_tag as u32,
        at,
    })?;
    let ip = read_u32(input)? as usize;
    let step_limit = read_u64(input)?;
    let steps = read_u64(input)?;
    let trace = read_bool(input)?;
    let label = read_optional_string(input)?;
    let result = read_value(input)?;
    let error = read_error(input)?;

    let program = read_program(input)?;
    let mut thread = Thread::new(id, program);
    thread.locals = read_table(input)?;
    thread.stack = read_refs(input)?;

    let inline_count = read_u32(input)?;
    for _ in 0..inline_count {
        let function = read_inline(input)?;
        thread
            .inlines
            .insert(function.name.clone(), Arc::new(function));
    }

    let frame_count = read_u32(input)?;
    for _ in 0..frame_count {
        let name = read_string(input)?;
        let function = thread
            .inlines
            .get(&name)
            .cloned()
            .ok_or_else(|| PersistError::UnknownTarget(format!("inline function '{}'", name)))?;
        let return_ip = read_u32(input)? as usize;
        let saved_stack = read_refs(input)?;
        let mut frame = InlineFrame::new(function, return_ip, saved_stack);
        frame.locals = read_table(input)?;
        thread.frames.push(frame);
    }

    for item in &thread.stack {
        if let Some(target) = &item.target {
            let known = match target.origin {
                Origin::Global(_) => true,
                Origin::Local(slot) => (slot as usize) < thread.locals.len(),
                Origin::Frame { depth, .. } => (depth as usize) < thread.frames.len(),
            };
            if !known {
                return Err(PersistError::UnknownTarget(format!("{:?}", target.origin)));
            }
        }
    }

    thread.status = status;
    thread.ip = ip;
    thread.step_limit = step_limit;
    thread.steps = steps;
    thread.trace = trace;
    thread.label = label;
    thread.result = result;
    thread.error = error;
    Ok(thread)
}

fn write_error<S: ByteSink + ?Sized>(out: &mut S, error: Option<&ScriptError>) -> PersistResult<()> {
    let Some(err) = error else {
        return write_u8(out, 0);
    };
    write_u8(out, 1)?;
    write_u8(out, phase_code(err.phase))?;
    write_u16(out, err.code.as_u16())?;
    write_string(out, &err.message)?;
    write_u32(out, err.pos.0)?;
    write_optional_string(out, err.help.as_deref())?;
    write_optional_string(out, err.callee.as_deref())
}

fn read_error<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Option<ScriptError>> {
    if !read_bool(input)? {
        return Ok(None);
    }
    let at = input.tell();
    let phase_tag = read_u8(input)?;
    let phase = phase_from_code(phase_tag).ok_or(PersistError::BadTag {
        what: "error phase",
        tag: phase_tag as u32,
        at,
    })?;
    let at = input.tell();
    let code_tag = read_u16(input)?;
    let code = ErrorCode::from_u16(code_tag).ok_or(PersistError::BadTag {
        what: "error code",
        tag: code_tag as u32,
        at,
    })?;
    let message = read_string(input)?;
    let pos = SourcePos(read_u32(input)?);

    let mut err = ScriptError::new(code, message, pos);
    err.phase = phase;
    err.help = read_optional_string(input)?;
    err.callee = read_optional_string(input)?;
    Ok(Some(err))
}

fn phase_code(phase: ErrorPhase) -> u8 {
    match phase {
        ErrorPhase::Lex => 0,
        ErrorPhase::Build => 1,
        ErrorPhase::Compile => 2,
        ErrorPhase::Runtime => 3,
        ErrorPhase::Host => 4,
    }
}

fn phase_from_code(code: u8) -> Option<ErrorPhase> {
    match code {
        0 => Some(ErrorPhase::Lex),
        1 => Some(ErrorPhase::Build),
        2 => Some(ErrorPhase::Compile),
        3 => Some(ErrorPhase::Runtime),
        4 => Some(ErrorPhase::Host),
        _ => None,
    }
}

// ==================== Primitives ====================

fn write_u8<S: ByteSink + ?Sized>(out: &mut S, value: u8) -> PersistResult<()> {
    out.write_bytes(&[value])
}

fn write_u16<S: ByteSink + ?Sized>(out: &mut S, value: u16) -> PersistResult<()> {
    out.write_bytes(&value.to_le_bytes())
}

fn write_u32<S: ByteSink + ?Sized>(out: &mut S, value: u32) -> PersistResult<()> {
    out.write_bytes(&value.to_le_bytes())
}

fn write_u64<S: ByteSink + ?Sized>(out: &mut S, value: u64) -> PersistResult<()> {
    out.write_bytes(&value.to_le_bytes())
}

fn write_i64<S: ByteSink + ?Sized>(out: &mut S, value: i64) -> PersistResult<()> {
    out.write_bytes(&value.to_le_bytes())
}

fn write_string<S: ByteSink + ?Sized>(out: &mut S, s: &str) -> PersistResult<()> {
    write_u32(out, s.len() as u32)?;
    out.write_bytes(s.as_bytes())
}

fn write_optional_string<S: ByteSink + ?Sized>(out: &mut S, s: Option<&str>) -> PersistResult<()> {
    match s {
        Some(s) => {
            write_u8(out, 1)?;
            write_string(out, s)
        }
        None => write_u8(out, 0),
    }
}

fn write_strings<S: ByteSink + ?Sized>(out: &mut S, items: &[String]) -> PersistResult<()> {
    write_u32(out, items.len() as u32)?;
    for item in items {
        write_string(out, item)?;
    }
    Ok(())
}

fn read_u8<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<u8> {
    let mut buf = [0u8; 1];
    input.read_bytes(&mut buf)?;
    Ok(buf[0])
}

fn read_bool<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<bool> {
    Ok(read_u8(input)? != 0)
}

fn read_u16<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<u16> {
    let mut buf = [0u8; 2];
    input.read_bytes(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<u32> {
    let mut buf = [0u8; 4];
    input.read_bytes(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<u64> {
    let mut buf = [0u8; 8];
    input.read_bytes(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<i64> {
    let mut buf = [0u8; 8];
    input.read_bytes(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_string<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<String> {
    let len = read_u32(input)? as usize;
    let at = input.tell();
    let mut buf = vec![0u8; len];
    input.read_bytes(&mut buf)?;
    String::from_utf8(buf).map_err(|_| PersistError::BadString { at })
}

fn read_optional_string<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Option<String>> {
    if read_bool(input)? {
        Ok(Some(read_string(input)?))
    } else {
        Ok(None)
    }
}

fn read_strings<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Vec<String>> {
    let count = read_u32(input)?;
    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        items.push(read_string(input)?);
    }
    Ok(items)
}

fn read_constness<R: ByteSource + ?Sized>(input: &mut R) -> PersistResult<Constness> {
    let at = input.tell();
    let tag = read_u8(input)?;
    Constness::from_u8(tag).ok_or(PersistError::BadTag {
        what: "const flag",
        tag: tag as u32,
        at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::scheduler::Clock;

    #[test]
    fn test_program_survives_save_and_load() {
        let engine = Engine::default();
        let program = engine
            .compile_script("var total = 0; for (var i = 0; i < 4; i++) { total += twice(i); } return total; function twice(n) { return n * 2; }")
            .unwrap();
        let mut bytes = Vec::new();
        save_program(&mut bytes, &program).unwrap();
        assert_eq!(&bytes[..4], b"SKNC");

        let loaded = load_program(&mut SliceSource::new(&bytes)).unwrap();
        assert_eq!(loaded.disassemble("main"), program.disassemble("main"));

        let mut engine = Engine::default();
        assert_eq!(engine.execute(&loaded, &[]).unwrap(), Value::Int(12));
    }

    #[test]
    fn test_reference_keeps_chain() {
        let item = ValueRef::variable(Origin::Frame { depth: 1, slot: 3 }, Value::Array(vec![Value::Int(1)]))
            .access(&Value::Int(0))
            .unwrap();
        let mut bytes = Vec::new();
        write_ref(&mut bytes, &item).unwrap();
        let loaded = read_ref(&mut SliceSource::new(&bytes)).unwrap();
        assert_eq!(loaded, item);
    }

    #[test]
    fn test_structure_identity_preserved() {
        let mut st = Structure::new(true);
        st.declare("k", Value::Int(1), Constness::Unassigned);
        let value = Value::Structure(st);
        let mut bytes = Vec::new();
        write_value(&mut bytes, &value).unwrap();
        let loaded = read_value(&mut SliceSource::new(&bytes)).unwrap();
        assert!(loaded.equals(&value));
        assert_eq!(loaded.to_string(), "static {const k=1}");
    }

    #[test]
    fn test_paused_thread_resumes_after_reload() {
        let mut engine = Engine::default();
        engine.set_clock(Clock::Manual(0));
        let program = engine
            .compile_script("var n = 5; wait(10); n += 1; return n;")
            .unwrap();
        let mut thread = engine.create_thread(&program, &[]).unwrap();
        assert_eq!(engine.resume(&mut thread), ThreadStatus::Paused);
        assert!(engine.park(thread).is_ok());

        let mut bytes = Vec::new();
        save_engine(&mut bytes, &engine).unwrap();

        let mut restored = Engine::default();
        restored.set_clock(Clock::Manual(0));
        load_engine(&mut SliceSource::new(&bytes), &mut restored).unwrap();
        assert_eq!(restored.parked_count(), 1);
        assert_eq!(restored.next_deadline(), Some(10));

        restored.advance_clock(10);
        let done = restored.poll();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].result(), &Value::Int(6));
    }

    #[test]
    fn test_thread_inside_inline_call() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_clock(Clock::Manual(0));
        let program = engine
            .compile_script("var r = slow(3); return r; function slow(x) { var y = x * 2; wait(5); return y + 1; }")
            .unwrap();
        let mut thread = engine.create_thread(&program, &[]).unwrap();
        assert_eq!(engine.resume(&mut thread), ThreadStatus::Paused);
        assert_eq!(thread.depth(), 1);

        let mut bytes = Vec::new();
        save_thread(&mut bytes, &thread).unwrap();
        let mut loaded = load_thread(&mut SliceSource::new(&bytes)).unwrap();
        assert_eq!(loaded.depth(), 1);
        assert_eq!(loaded.status(), ThreadStatus::Paused);

        engine.advance_clock(5);
        assert_eq!(engine.resume(&mut loaded), ThreadStatus::Finished);
        assert_eq!(loaded.result(), &Value::Int(7));
    }

    #[test]
    fn test_rejects_bad_input() {
        let err = load_program(&mut SliceSource::new(b"NOPE\x01P")).unwrap_err();
        assert_eq!(err, PersistError::BadMagic);
        let err = load_program(&mut SliceSource::new(b"SKNC\x09P")).unwrap_err();
        assert_eq!(err, PersistError::UnsupportedVersion(9));
        let err = load_thread(&mut SliceSource::new(b"SKNC\x01P")).unwrap_err();
        assert_eq!(err, PersistError::WrongSection { expected: "thread" });
        let err = load_program(&mut SliceSource::new(b"SKNC\x01P\x05\x00")).unwrap_err();
        assert!(matches!(err, PersistError::Truncated { .. }));
    }
}
