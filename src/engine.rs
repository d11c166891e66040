// Skein Engine
// Owns globals, host functions, the compile cache and parked threads.
// Hosts compile source into programs, then run them either as a quick
// run (no pausing) or as threads they resume and poll.

use crate::builtins;
use crate::compiler::{Compiler, Program};
use crate::config::EngineConfig;
use crate::error::{ErrorCode, ScriptError, SkeinResult};
use crate::lexer::Scanner;
use crate::parser::build;
use crate::scheduler::{Clock, Scheduler};
use crate::vm::{
    run, Constness, ExecContext, Host, NativeFn, NativeRegistry, Thread, ThreadId, ThreadStatus,
    Value, VariableTable,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CompileMode {
    Script,
    Expression,
}

/// A cached program plus the source it came from, so hash collisions
/// compile fresh instead of returning the wrong program
struct CacheEntry {
    source: String,
    program: Program,
}

pub struct Engine {
    config: EngineConfig,
    globals: VariableTable,
    constants: FxHashMap<String, Value>,
    natives: NativeRegistry,
    cache: Mutex<FxHashMap<(CompileMode, u64), CacheEntry>>,
    host: Host,
    scheduler: Scheduler,
    next_thread: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let install = config.builtins;
        let mut engine = Self {
            config,
            globals: VariableTable::new(),
            constants: FxHashMap::default(),
            natives: NativeRegistry::new(),
            cache: Mutex::new(FxHashMap::default()),
            host: Host::default(),
            scheduler: Scheduler::new(),
            next_thread: 1,
        };
        if install {
            builtins::install(&mut engine);
        }
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ==================== Host setup ====================

    /// Declare (or reset) a mutable global
    pub fn define_global(&mut self, name: &str, value: Value) -> usize {
        self.invalidate_cache();
        self.globals.declare(name, value, Constness::Mutable)
    }

    /// Declare a global that scripts cannot assign
    pub fn define_const_global(&mut self, name: &str, value: Value) -> usize {
        self.invalidate_cache();
        self.globals.declare(name, value, Constness::Assigned)
    }

    /// A named constant substituted by the lexer wherever the name appears
    pub fn define_constant(&mut self, name: &str, value: Value) {
        self.invalidate_cache();
        self.constants.insert(name.to_string(), value);
    }

    pub fn register_native(&mut self, name: &str, arity: i32, func: NativeFn) {
        self.invalidate_cache();
        self.natives.register(name, arity, func);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.by_name(name).map(|var| &var.value)
    }

    pub fn globals(&self) -> &VariableTable {
        &self.globals
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Route script output (`print`) somewhere other than stdout
    pub fn set_output(&mut self, output: impl FnMut(&str) + 'static) {
        self.host.set_output(Box::new(output));
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.host.clock = clock;
    }

    /// Move a manual clock forward
    pub fn advance_clock(&mut self, ms: i64) {
        self.host.clock.advance(ms);
    }

    pub fn now(&self) -> i64 {
        self.host.now()
    }

    // ==================== Compilation ====================

    pub fn compile_script(&self, source: &str) -> SkeinResult<Program> {
        self.compile(source, CompileMode::Script, &[])
    }

    /// Compile a script that the host seeds with extra locals before running
    pub fn compile_script_with_locals(&self, source: &str, locals: &[&str]) -> SkeinResult<Program> {
        self.compile(source, CompileMode::Script, locals)
    }

    pub fn compile_expression(&self, source: &str) -> SkeinResult<Program> {
        self.compile(source, CompileMode::Expression, &[])
    }

    fn compile(&self, source: &str, mode: CompileMode, locals: &[&str]) -> SkeinResult<Program> {
        // Programs compiled with host locals have different slot layouts
        let cacheable = self.config.cache_scripts && locals.is_empty();
        let key = (mode, source_hash(source));

        if cacheable {
            if let Some(entry) = self.cache.lock().get(&key) {
                if entry.source == source {
                    debug!(hash = key.1, ?mode, "compile cache hit");
                    return Ok(entry.program.clone());
                }
            }
        }

        let program = self
            .compile_uncached(source, mode, locals)
            .map_err(|err| err.with_source(source))?;

        if cacheable {
            self.cache.lock().insert(
                key,
                CacheEntry {
                    source: source.to_string(),
                    program: program.clone(),
                },
            );
        }
        Ok(program)
    }

    fn compile_uncached(&self, source: &str, mode: CompileMode, locals: &[&str]) -> SkeinResult<Program> {
        let tokens = Scanner::new(source)
            .with_constants(&self.constants)
            .scan_tokens()?;
        let tree = build(tokens, mode == CompileMode::Expression)?;
        debug!(?mode, nodes = tree.size(), "built tree");

        let compiler = Compiler::new(&self.globals, &self.natives).with_locals(locals);
        match mode {
            CompileMode::Script => compiler.compile_script(&tree),
            CompileMode::Expression => compiler.compile_expression(&tree),
        }
    }

    fn invalidate_cache(&mut self) {
        self.cache.get_mut().clear();
    }

    /// Number of cached programs
    pub fn cached_programs(&self) -> usize {
        self.cache.lock().len()
    }

    // ==================== Execution ====================

    /// Quick run: execute to completion, treating any pause request as an error
    pub fn execute(&mut self, program: &Program, locals: &[(&str, Value)]) -> SkeinResult<Value> {
        let mut thread = self.create_thread(program, locals)?;
        let status = {
            let mut ctx = self.context(false);
            run(&mut thread, &mut ctx)
        };
        self.host.timers.clear(thread.id());

        match status {
            ThreadStatus::Finished => Ok(thread.result),
            _ => Err(thread.error.unwrap_or_else(|| {
                ScriptError::runtime(ErrorCode::HostFailure, format!("Quick run ended {}", status))
            })),
        }
    }

    /// Compile and quick-run a script
    pub fn run_script(&mut self, source: &str) -> SkeinResult<Value> {
        let program = self.compile_script(source)?;
        self.execute(&program, &[]).map_err(|err| err.with_source(source))
    }

    /// Compile and quick-run a single expression
    pub fn evaluate(&mut self, source: &str) -> SkeinResult<Value> {
        let program = self.compile_expression(source)?;
        self.execute(&program, &[]).map_err(|err| err.with_source(source))
    }

    /// A fresh, not yet started thread with its locals seeded
    pub fn create_thread(&mut self, program: &Program, locals: &[(&str, Value)]) -> SkeinResult<Thread> {
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;

        let mut thread = Thread::new(id, program.clone());
        thread.set_trace(self.config.trace_by_default);
        for (name, value) in locals {
            if !thread.set_local(name, value.clone()) {
                return Err(ScriptError::runtime(
                    ErrorCode::InvalidVariable,
                    format!("Program has no local '{}' to seed", name),
                ));
            }
        }
        debug!(thread = %id, actions = program.len(), "thread created");
        Ok(thread)
    }

    /// Run a thread from where it stopped. Paused threads retry the host
    /// call that paused them.
    pub fn resume(&mut self, thread: &mut Thread) -> ThreadStatus {
        let status = {
            let mut ctx = self.context(true);
            run(thread, &mut ctx)
        };
        if status.is_done() {
            self.host.timers.clear(thread.id());
        }
        status
    }

    /// Abandon a thread; it never runs again
    pub fn cancel(&mut self, thread: &mut Thread) {
        if thread.status().is_done() {
            return;
        }
        debug!(thread = %thread.display_name(), "thread cancelled");
        thread.status = ThreadStatus::Cancelled;
        thread.error = Some(ScriptError::runtime(
            ErrorCode::Cancelled,
            format!("Thread {} was cancelled", thread.display_name()),
        ));
        thread.stack.clear();
        thread.frames.clear();
        self.host.timers.clear(thread.id());
    }

    fn context(&mut self, allow_pause: bool) -> ExecContext<'_> {
        ExecContext {
            globals: &mut self.globals,
            natives: &self.natives,
            host: &mut self.host,
            max_stack_depth: self.config.max_stack_depth,
            max_inline_depth: self.config.max_inline_depth,
            allow_pause,
        }
    }

    // ==================== Thread handlers ====================

    /// Hand a paused thread to the engine until its wait deadline. Threads
    /// that are not paused are given back.
    pub fn park(&mut self, thread: Thread) -> Result<(), Thread> {
        self.scheduler.park(thread)
    }

    /// Resume every parked thread that is due. Threads that pause again are
    /// re-parked; the rest (finished, failed) are returned.
    pub fn poll(&mut self) -> Vec<Thread> {
        let now = self.host.now();
        let due = self.scheduler.take_due(now, &self.host.timers);
        let mut done = Vec::new();

        for mut thread in due {
            self.resume(&mut thread);
            if let Err(thread) = self.scheduler.park(thread) {
                done.push(thread);
            }
        }
        if !done.is_empty() {
            debug!(completed = done.len(), parked = self.scheduler.len(), "poll");
        }
        done
    }

    /// Earliest wait deadline among parked threads
    pub fn next_deadline(&self) -> Option<i64> {
        self.scheduler.next_deadline(&self.host.timers)
    }

    pub fn parked_count(&self) -> usize {
        self.scheduler.len()
    }

    pub fn parked_threads(&self) -> &[Thread] {
        self.scheduler.threads()
    }

    /// Take a parked thread out and cancel it
    pub fn cancel_parked(&mut self, id: ThreadId) -> Option<Thread> {
        let mut thread = self.scheduler.remove(id)?;
        self.cancel(&mut thread);
        Some(thread)
    }

    // ==================== Snapshots ====================

    pub(crate) fn host(&self) -> &Host {
        &self.host
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Replace globals and parked threads with loaded state
    pub(crate) fn restore_state(
        &mut self,
        globals: VariableTable,
        threads: Vec<Thread>,
        timers: Vec<(ThreadId, i64)>,
    ) {
        self.invalidate_cache();
        self.globals = globals;
        for (id, deadline) in timers {
            self.host.timers.set(id, deadline);
        }
        if let Some(max) = threads.iter().map(|t| t.id().0).max() {
            self.next_thread = self.next_thread.max(max + 1);
        }
        self.scheduler.restore(threads);
    }
}

/// Polynomial string hash used as the cache key
fn source_hash(source: &str) -> u64 {
    source
        .chars()
        .fold(0u64, |h, c| h.wrapping_mul(31).wrapping_add(c as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> Engine {
        Engine::new(EngineConfig {
            builtins: false,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn test_cache_separates_modes() {
        let engine = bare();
        let script = engine.compile_script("var a = 1;").unwrap();
        let again = engine.compile_script("var a = 1;").unwrap();
        assert!(script.ptr_eq(&again));
        let expr = engine.compile_expression("1 + 2").unwrap();
        assert!(!expr.ptr_eq(&script));
        assert_eq!(engine.cached_programs(), 2);
    }

    #[test]
    fn test_defining_invalidates_cache() {
        let mut engine = bare();
        engine.compile_script("var a = 1;").unwrap();
        engine.define_constant("ANSWER", Value::Int(42));
        assert_eq!(engine.cached_programs(), 0);
        assert_eq!(engine.evaluate("ANSWER * 2").unwrap(), Value::Int(84));
    }

    #[test]
    fn test_compile_error_carries_source_line() {
        let engine = bare();
        let err = engine.compile_script("var a = 1;\nb = 2;").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedSymbol);
        assert!(err.format().contains("b = 2;"));
    }

    #[test]
    fn test_seeded_locals() {
        let mut engine = bare();
        let program = engine
            .compile_script_with_locals("return x * 10;", &["x"])
            .unwrap();
        let result = engine.execute(&program, &[("x", Value::Int(4))]).unwrap();
        assert_eq!(result, Value::Int(40));
        let err = engine.execute(&program, &[("y", Value::Int(1))]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidVariable);
    }

    #[test]
    fn test_cancel() {
        let mut engine = bare();
        let program = engine.compile_script("var a = 1;").unwrap();
        let mut thread = engine.create_thread(&program, &[]).unwrap();
        engine.cancel(&mut thread);
        assert_eq!(thread.status(), ThreadStatus::Cancelled);
        assert_eq!(thread.error().unwrap().code, ErrorCode::Cancelled);
        assert_eq!(engine.resume(&mut thread), ThreadStatus::Cancelled);
    }

    #[test]
    fn test_source_hash() {
        assert_eq!(source_hash(""), 0);
        assert_eq!(source_hash("ab"), 97 * 31 + 98);
    }
}
