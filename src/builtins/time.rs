// Time built-ins: the engine clock and the pausing `wait`

use crate::error::SkeinResult;
use crate::vm::{NativeCall, Value};

/// `now()`: milliseconds on the engine clock
pub fn now(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    Ok(Value::Int(call.now()))
}

/// `wait(ms)`: pause the calling thread until `ms` have passed.
///
/// The call is retried on every resume, so the deadline lives in the
/// engine's timer table keyed by thread rather than in the call itself.
pub fn wait(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let ms = call.int(0)?;
    if ms <= 0 {
        return Ok(Value::Int(0));
    }

    let thread = call.thread_id();
    let now = call.now();
    match call.timers().deadline(thread) {
        None => {
            call.timers().set(thread, now.saturating_add(ms));
            call.request_pause();
        }
        Some(deadline) if now >= deadline => {
            call.timers().clear(thread);
        }
        Some(_) => call.request_pause(),
    }
    Ok(Value::Int(0))
}
