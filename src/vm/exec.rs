// Skein Execution Loop
// Runs a thread's actions until it finishes, fails, or a host call asks
// to pause. Every piece of state the loop touches arrives through the
// thread or the context, so nothing needs saving or restoring on exit.

use super::native::{Host, NativeCall, NativeRegistry};
use super::reference::{write_through, Origin, ValueRef};
use super::thread::{InlineFrame, Thread, ThreadStatus};
use super::value::{Constness, Structure, Value};
use super::variable::VariableTable;
use crate::compiler::{Action, ActionKind, Scope};
use crate::error::{ErrorCode, ScriptError, SkeinResult};
use crate::lexer::Directive;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, trace, warn};

/// Everything a resume borrows from the engine
pub struct ExecContext<'a> {
    pub globals: &'a mut VariableTable,
    pub natives: &'a NativeRegistry,
    pub host: &'a mut Host,
    pub max_stack_depth: usize,
    pub max_inline_depth: usize,
    /// Quick runs turn a pause request into a `PauseNotAllowed` error
    pub allow_pause: bool,
}

/// What the loop does after one action
enum Flow {
    Continue,
    Pause,
    Finished,
}

/// Run until the thread stops. Finished, failed and cancelled threads are
/// returned as they are.
pub fn run(thread: &mut Thread, ctx: &mut ExecContext<'_>) -> ThreadStatus {
    if thread.status.is_done() {
        return thread.status;
    }
    thread.status = ThreadStatus::Running;

    loop {
        match step(thread, ctx) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Pause) => {
                thread.status = ThreadStatus::Paused;
                debug!(thread = %thread.display_name(), ip = thread.ip, "thread paused");
                return ThreadStatus::Paused;
            }
            Ok(Flow::Finished) => {
                thread.status = ThreadStatus::Finished;
                debug!(
                    thread = %thread.display_name(),
                    steps = thread.steps,
                    result = %thread.result,
                    "thread finished"
                );
                return ThreadStatus::Finished;
            }
            Err(err) => {
                warn!(thread = %thread.display_name(), error = %err, "thread failed");
                thread.fail(err);
                return ThreadStatus::Error;
            }
        }
    }
}

fn step(thread: &mut Thread, ctx: &mut ExecContext<'_>) -> SkeinResult<Flow> {
    let program = thread.current_program().clone();
    let ip = thread.ip;
    let Some(action) = program.get(ip) else {
        // Falling off the end: an inline call yields 0, the script yields
        // whatever expression value is left on the stack
        if thread.frames.is_empty() {
            let value = thread.stack.pop().map(ValueRef::into_value).unwrap_or_default();
            return finish(thread, value);
        }
        return return_from(thread, Value::Int(0), ctx.max_stack_depth);
    };

    if thread.step_limit > 0 && thread.steps >= thread.step_limit {
        return Err(ScriptError::runtime(
            ErrorCode::StepLimit,
            format!("Thread exceeded its limit of {} actions", thread.step_limit),
        )
        .at(action.pos));
    }
    thread.steps += 1;

    if thread.trace {
        trace!(
            thread = %thread.display_name(),
            depth = thread.frames.len(),
            stack = thread.stack.len(),
            "{:04} {}",
            ip,
            action
        );
    }

    thread.ip = ip + 1;
    execute(thread, ctx, action, ip).map_err(|err| err.at(action.pos))
}

fn execute(
    thread: &mut Thread,
    ctx: &mut ExecContext<'_>,
    action: &Action,
    ip: usize,
) -> SkeinResult<Flow> {
    let limit = ctx.max_stack_depth;

    match action.kind {
        ActionKind::PushLiteral => push(thread, ValueRef::rvalue(action.literal.clone()), limit)?,

        ActionKind::Pop => {
            pop(thread)?;
        }

        ActionKind::Dup => {
            let top = peek(thread)?.clone();
            push(thread, top, limit)?;
        }

        ActionKind::DupX1 => {
            let b = pop(thread)?;
            let a = pop(thread)?;
            push(thread, b.clone(), limit)?;
            push(thread, a, limit)?;
            push(thread, b, limit)?;
        }

        ActionKind::Declare { scope, constness } => {
            let value = pop(thread)?.into_value();
            let slot = action.argument as usize;
            let table = match scope {
                Scope::Frame => thread.frames.last_mut().map(|f| &mut f.locals),
                Scope::Script => Some(&mut thread.locals),
                Scope::Global => Some(&mut *ctx.globals),
            };
            let var = table
                .and_then(|t| t.get_mut(slot))
                .ok_or_else(|| invalid_variable(action.name()))?;
            var.value = value;
            var.constness = constness;
        }

        ActionKind::Get(scope) => {
            let item = get(thread, ctx.globals, scope, action)?;
            push(thread, item, limit)?;
        }

        ActionKind::Set => {
            let value = pop(thread)?.into_value();
            let target = pop(thread)?.target.ok_or_else(|| {
                ScriptError::runtime(ErrorCode::InvalidVariable, "Cannot assign to a temporary value")
            })?;
            let var = thread
                .variable_mut(ctx.globals, target.origin)
                .ok_or_else(|| ScriptError::runtime(ErrorCode::InvalidVariable, "Assignment target no longer exists"))?;
            write_through(var, &target.chain, value)?;
        }

        ActionKind::Access => {
            let key = pop(thread)?;
            let base = pop(thread)?;
            let item = if action.argument == 1 {
                base.access_slot(&key.value)?
            } else {
                base.access(&key.value)?
            };
            push(thread, item, limit)?;
        }

        ActionKind::Unary(op) => {
            let operand = pop(thread)?;
            push(thread, ValueRef::rvalue(op.apply(&operand.value)?), limit)?;
        }

        ActionKind::Binary(op) => {
            let right = pop(thread)?;
            let left = pop(thread)?;
            push(thread, ValueRef::rvalue(op.apply(&left.value, &right.value)?), limit)?;
        }

        ActionKind::Jump => thread.ip = jump_target(action)?,

        ActionKind::JumpIfFalse => {
            if !pop(thread)?.value.is_truthy() {
                thread.ip = jump_target(action)?;
            }
        }

        ActionKind::JumpIfTrue => {
            if pop(thread)?.value.is_truthy() {
                thread.ip = jump_target(action)?;
            }
        }

        ActionKind::AndBranch | ActionKind::OrBranch => {
            let truthy = peek(thread)?.value.is_truthy();
            let decided = if action.kind == ActionKind::AndBranch {
                !truthy
            } else {
                truthy
            };
            if decided {
                thread.ip = jump_target(action)?;
            } else {
                pop(thread)?;
            }
        }

        ActionKind::SwitchJump => {
            let case = pop(thread)?;
            if peek(thread)?.value.equals(&case.value) {
                pop(thread)?;
                thread.ip = jump_target(action)?;
            }
        }

        ActionKind::CallNative => return call_native(thread, ctx, action, ip),

        ActionKind::CallInline => call_inline(thread, ctx, action, ip)?,

        ActionKind::Return => {
            let value = if action.argument == 1 {
                pop(thread)?.into_value()
            } else {
                Value::Int(0)
            };
            if thread.frames.is_empty() {
                return finish(thread, value);
            }
            return return_from(thread, value, limit);
        }

        ActionKind::DefineInline => {
            let function = action.inline.clone().ok_or_else(|| {
                ScriptError::runtime(ErrorCode::MissingCallee, "Definition carries no function body")
            })?;
            thread.inlines.insert(function.name.clone(), function);
        }

        ActionKind::BuildArray => {
            let items = take_values(thread, action.argument as usize)?;
            push(thread, ValueRef::rvalue(Value::Array(items)), limit)?;
        }

        ActionKind::BuildStruct => {
            let layout = action.literal.as_array().unwrap_or_default();
            let values = take_values(thread, layout.len())?;
            let mut structure = Structure::new(action.argument == 1);
            for (entry, value) in layout.iter().zip(values) {
                let (name, constness) = field_layout(entry)?;
                structure.declare(name, value, constness);
            }
            push(thread, ValueRef::rvalue(Value::Structure(structure)), limit)?;
        }

        ActionKind::Directive(directive) => apply_directive(thread, directive, &action.literal),
    }

    Ok(Flow::Continue)
}

fn get(
    thread: &Thread,
    globals: &VariableTable,
    scope: Scope,
    action: &Action,
) -> SkeinResult<ValueRef> {
    let slot = action.argument as usize;
    let name = action.name();

    match scope {
        Scope::Global => {
            // Slots are fixed at compile time; a renumbered table is found by name
            let slot = match globals.get(slot) {
                Some(var) if var.name == name => slot,
                _ => globals.lookup(name).ok_or_else(|| invalid_variable(name))?,
            };
            let var = globals.get(slot).ok_or_else(|| invalid_variable(name))?;
            Ok(ValueRef::variable(Origin::Global(slot as u32), var.value.clone()))
        }
        Scope::Script => {
            let var = thread.locals.get(slot).ok_or_else(|| invalid_variable(name))?;
            Ok(ValueRef::variable(Origin::Local(slot as u32), var.value.clone()))
        }
        Scope::Frame => {
            let depth = thread
                .frames
                .len()
                .checked_sub(1)
                .ok_or_else(|| invalid_variable(name))?;
            let var = thread.frames[depth]
                .locals
                .get(slot)
                .ok_or_else(|| invalid_variable(name))?;
            Ok(ValueRef::variable(
                Origin::Frame {
                    depth: depth as u32,
                    slot: slot as u32,
                },
                var.value.clone(),
            ))
        }
    }
}

fn call_native(
    thread: &mut Thread,
    ctx: &mut ExecContext<'_>,
    action: &Action,
    ip: usize,
) -> SkeinResult<Flow> {
    let name = action.name();
    let entry = ctx.natives.get(name).ok_or_else(|| missing_callee(name))?;
    let count = action.argument as usize;
    let start = args_start(thread, count)?;

    let (result, pause) = {
        let mut call = NativeCall::new(name, &thread.stack[start..], thread.id, ctx.host);
        // A panicking host function fails this thread instead of unwinding
        // through the engine
        let result = panic::catch_unwind(AssertUnwindSafe(|| (entry.func)(&mut call)))
            .unwrap_or_else(|payload| {
                Err(ScriptError::host(format!(
                    "Host function panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        (result, call.pause_requested())
    };
    let value = result.map_err(|err| err.with_callee(name).at(action.pos))?;

    if pause {
        if !ctx.allow_pause {
            return Err(ScriptError::runtime(
                ErrorCode::PauseNotAllowed,
                format!("'{}' tried to pause a quick run", name),
            )
            .with_callee(name)
            .with_help("Run the script as a thread to allow waiting"));
        }
        // Retry the same call on resume
        thread.ip = ip;
        return Ok(Flow::Pause);
    }

    thread.stack.truncate(start);
    push(thread, ValueRef::rvalue(value), ctx.max_stack_depth)?;
    Ok(Flow::Continue)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s;
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s;
    }
    "unknown panic"
}

fn call_inline(
    thread: &mut Thread,
    ctx: &ExecContext<'_>,
    action: &Action,
    ip: usize,
) -> SkeinResult<()> {
    let name = action.name();
    let function = thread
        .inlines
        .get(name)
        .cloned()
        .ok_or_else(|| missing_callee(name))?;

    let count = action.argument as usize;
    if count != function.arity() {
        return Err(ScriptError::runtime(
            ErrorCode::ArityMismatch,
            format!(
                "Function '{}' expects {} arguments, got {}",
                name,
                function.arity(),
                count
            ),
        ));
    }
    if thread.frames.len() >= ctx.max_inline_depth {
        return Err(ScriptError::runtime(
            ErrorCode::StackOverflow,
            format!("Inline call depth exceeded {} in '{}'", ctx.max_inline_depth, name),
        ));
    }

    let start = args_start(thread, count)?;
    let args = thread.stack.split_off(start);
    let saved_stack = std::mem::take(&mut thread.stack);
    let mut frame = InlineFrame::new(function, ip + 1, saved_stack);
    for (slot, arg) in args.into_iter().enumerate() {
        if let Some(var) = frame.locals.get_mut(slot) {
            var.value = arg.into_value();
        }
    }

    thread.frames.push(frame);
    thread.ip = 0;
    Ok(())
}

/// Leave the innermost inline call, handing `value` to the caller
fn return_from(thread: &mut Thread, value: Value, limit: usize) -> SkeinResult<Flow> {
    let frame = thread.frames.pop().ok_or_else(|| {
        ScriptError::runtime(ErrorCode::InvalidVariable, "Return outside of a call")
    })?;
    thread.stack = frame.saved_stack;
    thread.ip = frame.return_ip;
    push(thread, ValueRef::rvalue(value), limit)?;
    Ok(Flow::Continue)
}

fn finish(thread: &mut Thread, value: Value) -> SkeinResult<Flow> {
    thread.result = value;
    thread.stack.clear();
    Ok(Flow::Finished)
}

fn apply_directive(thread: &mut Thread, directive: Directive, literal: &Value) {
    match directive {
        Directive::Trace => thread.trace = literal.is_truthy(),
        Directive::Label => thread.label = literal.as_str().map(String::from),
        Directive::Limit => thread.step_limit = literal.as_int().unwrap_or(0).max(0) as u64,
    }
}

/// `[name, constness]` pair from a structure layout literal
fn field_layout(entry: &Value) -> SkeinResult<(&str, Constness)> {
    let bad_layout = || ScriptError::runtime(ErrorCode::BadAccessor, "Malformed structure layout");
    let pair = entry.as_array().ok_or_else(bad_layout)?;
    let name = pair.first().and_then(Value::as_str).ok_or_else(bad_layout)?;
    let constness = pair
        .get(1)
        .and_then(Value::as_int)
        .and_then(|c| u8::try_from(c).ok())
        .and_then(Constness::from_u8)
        .unwrap_or_default();
    Ok((name, constness))
}

// ==================== Stack helpers ====================

fn push(thread: &mut Thread, item: ValueRef, limit: usize) -> SkeinResult<()> {
    if thread.stack.len() >= limit {
        return Err(ScriptError::runtime(
            ErrorCode::StackOverflow,
            format!("Value stack exceeded {} items", limit),
        ));
    }
    thread.stack.push(item);
    Ok(())
}

fn pop(thread: &mut Thread) -> SkeinResult<ValueRef> {
    thread
        .stack
        .pop()
        .ok_or_else(|| ScriptError::runtime(ErrorCode::InvalidVariable, "Stack underflow"))
}

fn peek(thread: &Thread) -> SkeinResult<&ValueRef> {
    thread
        .stack
        .last()
        .ok_or_else(|| ScriptError::runtime(ErrorCode::InvalidVariable, "Stack underflow"))
}

fn args_start(thread: &Thread, count: usize) -> SkeinResult<usize> {
    thread.stack.len().checked_sub(count).ok_or_else(|| {
        ScriptError::runtime(ErrorCode::InvalidVariable, "Stack underflow in call")
    })
}

fn take_values(thread: &mut Thread, count: usize) -> SkeinResult<Vec<Value>> {
    let start = args_start(thread, count)?;
    Ok(thread
        .stack
        .split_off(start)
        .into_iter()
        .map(ValueRef::into_value)
        .collect())
}

fn jump_target(action: &Action) -> SkeinResult<usize> {
    usize::try_from(action.argument).map_err(|_| {
        ScriptError::runtime(
            ErrorCode::InvalidVariable,
            format!("Unresolved jump target {}", action.argument),
        )
    })
}

fn invalid_variable(name: &str) -> ScriptError {
    ScriptError::runtime(
        ErrorCode::InvalidVariable,
        format!("Variable '{}' does not exist in this thread", name),
    )
}

fn missing_callee(name: &str) -> ScriptError {
    ScriptError::runtime(
        ErrorCode::MissingCallee,
        format!("No function named '{}' is available", name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Compiler, Program};
    use crate::lexer::tokenize;
    use crate::parser::build;
    use crate::vm::native::VARIADIC;
    use crate::vm::thread::ThreadId;

    fn boom(_: &mut NativeCall<'_>) -> SkeinResult<Value> {
        Err(ScriptError::host("boom"))
    }

    fn nap(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
        call.request_pause();
        Ok(Value::Int(0))
    }

    fn sum(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
        let mut total = 0;
        for i in 0..call.len() {
            total += call.int(i)?;
        }
        Ok(Value::Int(total))
    }

    struct Fixture {
        globals: VariableTable,
        natives: NativeRegistry,
        host: Host,
    }

    impl Fixture {
        fn new() -> Self {
            let mut natives = NativeRegistry::new();
            natives.register("boom", 0, boom);
            natives.register("nap", 0, nap);
            natives.register("sum", VARIADIC, sum);
            let mut globals = VariableTable::new();
            globals.declare("total", Value::Int(0), Constness::Mutable);
            Self {
                globals,
                natives,
                host: Host::new(Box::new(|_| {})),
            }
        }

        fn compile(&self, source: &str) -> Program {
            let tree = build(tokenize(source).unwrap(), false).unwrap();
            Compiler::new(&self.globals, &self.natives)
                .compile_script(&tree)
                .unwrap()
        }

        fn run(&mut self, thread: &mut Thread, allow_pause: bool) -> ThreadStatus {
            let mut ctx = ExecContext {
                globals: &mut self.globals,
                natives: &self.natives,
                host: &mut self.host,
                max_stack_depth: 64,
                max_inline_depth: 8,
                allow_pause,
            };
            run(thread, &mut ctx)
        }

        fn eval(&mut self, source: &str) -> Thread {
            let program = self.compile(source);
            let mut thread = Thread::new(ThreadId(1), program);
            self.run(&mut thread, true);
            thread
        }
    }

    #[test]
    fn test_return_value() {
        let mut fx = Fixture::new();
        let thread = fx.eval("var i = 0; while (i < 3) { i += 1; } return i;");
        assert_eq!(thread.status(), ThreadStatus::Finished);
        assert_eq!(thread.result(), &Value::Int(3));
    }

    #[test]
    fn test_host_error_tagged_with_callee() {
        let mut fx = Fixture::new();
        let thread = fx.eval("var a = 1;\nboom();");
        assert_eq!(thread.status(), ThreadStatus::Error);
        let err = thread.error().unwrap();
        assert_eq!(err.callee.as_deref(), Some("boom"));
        assert_eq!(err.pos.line(), 2);
    }

    #[test]
    fn test_pause_keeps_ip_at_call() {
        let mut fx = Fixture::new();
        let program = fx.compile("var a = 1; nap(); a = 2;");
        let mut thread = Thread::new(ThreadId(1), program);
        assert_eq!(fx.run(&mut thread, true), ThreadStatus::Paused);
        let action = thread.current_program().get(thread.ip()).unwrap();
        assert_eq!(action.kind, ActionKind::CallNative);
        assert_eq!(thread.local("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_quick_run_rejects_pause() {
        let mut fx = Fixture::new();
        let program = fx.compile("nap();");
        let mut thread = Thread::new(ThreadId(1), program);
        assert_eq!(fx.run(&mut thread, false), ThreadStatus::Error);
        assert_eq!(thread.error().unwrap().code, ErrorCode::PauseNotAllowed);
    }

    #[test]
    fn test_step_limit() {
        let mut fx = Fixture::new();
        let thread = fx.eval("#limit 50; var i = 0; while (1) { i++; }");
        assert_eq!(thread.status(), ThreadStatus::Error);
        assert_eq!(thread.error().unwrap().code, ErrorCode::StepLimit);
    }

    #[test]
    fn test_inline_recursion_depth_bounded() {
        let mut fx = Fixture::new();
        let thread = fx.eval("function f(n) { return f(n + 1); } var x = f(0);");
        assert_eq!(thread.error().unwrap().code, ErrorCode::StackOverflow);
        assert_eq!(thread.depth(), 0);
        assert_eq!(thread.stack_len(), 0);
    }

    #[test]
    fn test_failure_inside_call_unwinds_thread() {
        let mut fx = Fixture::new();
        let thread = fx.eval("function f(a) { return a + boom(); } var x = 1 + f(2);");
        assert_eq!(thread.status(), ThreadStatus::Error);
        assert_eq!(thread.depth(), 0);
        assert_eq!(thread.stack_len(), 0);
    }

    #[test]
    fn test_local_const_violation_at_runtime() {
        let mut fx = Fixture::new();
        let thread = fx.eval("const k = 1; k = 2;");
        let err = thread.error().unwrap();
        assert_eq!(err.code, ErrorCode::ConstViolation);
        assert_eq!(err.phase, crate::error::ErrorPhase::Runtime);
        assert_eq!(thread.stack_len(), 0);
        assert_eq!(thread.local("k"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_label_and_variadic_native() {
        let mut fx = Fixture::new();
        let thread = fx.eval("#label \"adder\"; total = sum(1, 2, 3);");
        assert_eq!(thread.label(), Some("adder"));
        assert_eq!(fx.globals.by_name("total").unwrap().value, Value::Int(6));
    }
}
