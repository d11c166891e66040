// Skein Threads
// One cooperative, pausable execution of a compiled program. A thread owns
// its value stack, its script locals and a stack of inline-call frames;
// globals and host functions are passed in by the engine on every resume.

use super::reference::{Origin, ValueRef};
use super::value::{Constness, Value};
use super::variable::{Variable, VariableTable};
use crate::compiler::{InlineFunction, Program};
use crate::error::ScriptError;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadStatus {
    /// Created or being resumed
    Running = 0,
    /// Suspended inside a host call; resume retries that call
    Paused = 1,
    Finished = 2,
    Error = 3,
    /// Abandoned by the host while paused
    Cancelled = 4,
}

impl ThreadStatus {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ThreadStatus::Running),
            1 => Some(ThreadStatus::Paused),
            2 => Some(ThreadStatus::Finished),
            3 => Some(ThreadStatus::Error),
            4 => Some(ThreadStatus::Cancelled),
            _ => None,
        }
    }

    /// No further resumes will run any actions
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Finished | ThreadStatus::Error | ThreadStatus::Cancelled
        )
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The record of one inline call in progress
#[derive(Debug, Clone)]
pub struct InlineFrame {
    pub function: Arc<InlineFunction>,
    /// Where the caller continues once this call returns
    pub return_ip: usize,
    /// The caller's value stack, set aside while the call runs
    pub saved_stack: Vec<ValueRef>,
    pub locals: VariableTable,
}

impl InlineFrame {
    pub fn new(function: Arc<InlineFunction>, return_ip: usize, saved_stack: Vec<ValueRef>) -> Self {
        let locals = fresh_locals(function.program.locals());
        Self {
            function,
            return_ip,
            saved_stack,
            locals,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) program: Program,
    pub(crate) ip: usize,
    pub(crate) stack: Vec<ValueRef>,
    pub(crate) locals: VariableTable,
    pub(crate) frames: Vec<InlineFrame>,
    pub(crate) inlines: FxHashMap<String, Arc<InlineFunction>>,
    pub(crate) status: ThreadStatus,
    pub(crate) error: Option<ScriptError>,
    pub(crate) result: Value,
    pub(crate) label: Option<String>,
    pub(crate) trace: bool,
    /// Action budget set by `#limit`; 0 means unlimited
    pub(crate) step_limit: u64,
    pub(crate) steps: u64,
}

impl Thread {
    pub fn new(id: ThreadId, program: Program) -> Self {
        let locals = fresh_locals(program.locals());
        Self {
            id,
            program,
            ip: 0,
            stack: Vec::new(),
            locals,
            frames: Vec::new(),
            inlines: FxHashMap::default(),
            status: ThreadStatus::Running,
            error: None,
            result: Value::Int(0),
            label: None,
            trace: false,
            step_limit: 0,
            steps: 0,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn error(&self) -> Option<&ScriptError> {
        self.error.as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Instruction pointer within the program currently executing
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Number of inline calls in progress
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    /// Name used in diagnostics: the `#label` if set, else the id
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", label, self.id),
            None => self.id.to_string(),
        }
    }

    /// Read a script-level local by name
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.by_name(name).map(|v| &v.value)
    }

    /// Seed a script-level local. Returns false if the program has no such local.
    pub fn set_local(&mut self, name: &str, value: Value) -> bool {
        match self.locals.lookup(name).and_then(|slot| self.locals.get_mut(slot)) {
            Some(var) => {
                var.value = value;
                true
            }
            None => false,
        }
    }

    /// The program the instruction pointer refers to
    pub(crate) fn current_program(&self) -> &Program {
        match self.frames.last() {
            Some(frame) => &frame.function.program,
            None => &self.program,
        }
    }

    /// Mark the thread failed and drop its in-flight values and calls
    pub(crate) fn fail(&mut self, error: ScriptError) {
        self.status = ThreadStatus::Error;
        self.error = Some(error);
        self.stack.clear();
        self.frames.clear();
    }

    /// Resolve a reference origin to its variable. Globals live outside the thread.
    pub(crate) fn variable_mut<'a>(
        &'a mut self,
        globals: &'a mut VariableTable,
        origin: Origin,
    ) -> Option<&'a mut Variable> {
        match origin {
            Origin::Global(slot) => globals.get_mut(slot as usize),
            Origin::Local(slot) => self.locals.get_mut(slot as usize),
            Origin::Frame { depth, slot } => self
                .frames
                .get_mut(depth as usize)
                .and_then(|frame| frame.locals.get_mut(slot as usize)),
        }
    }
}

/// A table with one mutable, zero-valued slot per name
pub(crate) fn fresh_locals(names: &[String]) -> VariableTable {
    let mut table = VariableTable::new();
    for name in names {
        table.declare(name, Value::Int(0), Constness::Mutable);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_has_program_locals() {
        let program = Program::new(Vec::new(), vec!["a".into(), "b".into()]);
        let mut thread = Thread::new(ThreadId(7), program);
        assert_eq!(thread.local("b"), Some(&Value::Int(0)));
        assert!(thread.set_local("a", Value::Int(5)));
        assert!(!thread.set_local("zzz", Value::Int(1)));
        assert_eq!(thread.local("a"), Some(&Value::Int(5)));
        assert_eq!(thread.status(), ThreadStatus::Running);
        assert_eq!(thread.display_name(), "#7");
    }

    #[test]
    fn test_status_done() {
        assert!(ThreadStatus::Cancelled.is_done());
        assert!(!ThreadStatus::Paused.is_done());
        assert_eq!(ThreadStatus::from_u8(3), Some(ThreadStatus::Error));
    }
}
