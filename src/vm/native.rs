// Skein Host Functions
// Registry of host callables plus the call context they receive

use super::reference::ValueRef;
use super::thread::ThreadId;
use super::value::{Structure, Value};
use crate::error::{ScriptError, SkeinResult};
use crate::scheduler::{Clock, TimerTable};
use rustc_hash::FxHashMap;

/// Host function signature
pub type NativeFn = fn(&mut NativeCall<'_>) -> SkeinResult<Value>;

/// Arity of a host function that accepts any number of arguments
pub const VARIADIC: i32 = -1;

/// Sink for script-visible output
pub type OutputHook = Box<dyn FnMut(&str)>;

#[derive(Clone)]
pub struct NativeEntry {
    pub name: String,
    pub arity: i32,
    pub func: NativeFn,
}

impl NativeEntry {
    pub fn accepts(&self, count: usize) -> bool {
        self.arity == VARIADIC || self.arity as usize == count
    }
}

/// Host functions by name
#[derive(Clone, Default)]
pub struct NativeRegistry {
    entries: FxHashMap<String, NativeEntry>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a host function
    pub fn register(&mut self, name: &str, arity: i32, func: NativeFn) {
        self.entries.insert(
            name.to_string(),
            NativeEntry {
                name: name.to_string(),
                arity,
                func,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&NativeEntry> {
        self.entries.get(name)
    }

    pub fn arity(&self, name: &str) -> Option<i32> {
        self.entries.get(name).map(|e| e.arity)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Engine services reachable from host functions
pub struct Host {
    output: OutputHook,
    pub clock: Clock,
    pub timers: TimerTable,
}

impl Host {
    pub fn new(output: OutputHook) -> Self {
        Self {
            output,
            clock: Clock::System,
            timers: TimerTable::new(),
        }
    }

    pub fn write(&mut self, text: &str) {
        (self.output)(text);
    }

    pub fn set_output(&mut self, output: OutputHook) {
        self.output = output;
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(Box::new(|text| println!("{}", text)))
    }
}

/// One invocation of a host function
pub struct NativeCall<'a> {
    name: &'a str,
    args: &'a [ValueRef],
    thread: ThreadId,
    host: &'a mut Host,
    pause_requested: bool,
}

impl<'a> NativeCall<'a> {
    pub fn new(name: &'a str, args: &'a [ValueRef], thread: ThreadId, host: &'a mut Host) -> Self {
        Self {
            name,
            args,
            thread,
            host,
            pause_requested: false,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Iterate over the argument values in call order
    pub fn args(&self) -> impl Iterator<Item = &Value> + '_ {
        self.args.iter().map(|r| &r.value)
    }

    pub fn arg(&self, index: usize) -> SkeinResult<&Value> {
        self.args.get(index).map(|r| &r.value).ok_or_else(|| {
            ScriptError::host(format!(
                "Missing argument {} (got {})",
                index + 1,
                self.args.len()
            ))
        })
    }

    pub fn int(&self, index: usize) -> SkeinResult<i64> {
        match self.arg(index)? {
            Value::Int(n) => Ok(*n),
            other => Err(ScriptError::type_assertion(index, "int", other.type_name())),
        }
    }

    /// An int or float, widened to f64
    pub fn number(&self, index: usize) -> SkeinResult<f64> {
        let value = self.arg(index)?;
        value
            .as_float()
            .ok_or_else(|| ScriptError::type_assertion(index, "number", value.type_name()))
    }

    pub fn string(&self, index: usize) -> SkeinResult<&str> {
        let value = self.arg(index)?;
        value
            .as_str()
            .ok_or_else(|| ScriptError::type_assertion(index, "string", value.type_name()))
    }

    pub fn array(&self, index: usize) -> SkeinResult<&[Value]> {
        let value = self.arg(index)?;
        value
            .as_array()
            .ok_or_else(|| ScriptError::type_assertion(index, "array", value.type_name()))
    }

    pub fn structure(&self, index: usize) -> SkeinResult<&Structure> {
        let value = self.arg(index)?;
        value
            .as_structure()
            .ok_or_else(|| ScriptError::type_assertion(index, "structure", value.type_name()))
    }

    /// Write to the host output hook
    pub fn output(&mut self, text: &str) {
        self.host.write(text);
    }

    pub fn now(&self) -> i64 {
        self.host.now()
    }

    pub fn timers(&mut self) -> &mut TimerTable {
        &mut self.host.timers
    }

    /// Suspend the thread once this call returns. The call is retried on
    /// resume, so the function must track its own progress.
    pub fn request_pause(&mut self) {
        self.pause_requested = true;
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested
    }
}
