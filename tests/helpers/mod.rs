//! Shared setup for the integration tests

#![allow(dead_code)]

use skein_core::{Clock, Engine, NativeCall, ScriptError, SkeinResult, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Engine with the standard library and a manual clock at 0
pub fn engine() -> Engine {
    let mut engine = Engine::default();
    engine.set_clock(Clock::Manual(0));
    engine.register_native("boom", 0, boom);
    engine
}

/// Host function that always fails
pub fn boom(_call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    Err(ScriptError::host("boom was called"))
}

/// Route `print` output into a shared buffer
pub fn capture_output(engine: &mut Engine) -> Rc<RefCell<Vec<String>>> {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&lines);
    engine.set_output(move |line| sink.borrow_mut().push(line.to_string()));
    lines
}

/// Quick-run a script, panicking with the formatted error on failure
pub fn run(source: &str) -> Value {
    match engine().run_script(source) {
        Ok(value) => value,
        Err(err) => panic!("script failed:\n{}", err.format()),
    }
}

pub fn run_err(source: &str) -> ScriptError {
    match engine().run_script(source) {
        Ok(value) => panic!("script should fail, returned {}", value.repr()),
        Err(err) => err,
    }
}
