// Core built-ins: output, conversion and collection helpers

use crate::error::{ScriptError, SkeinResult};
use crate::vm::{NativeCall, Value};

/// `print(a, b, ...)`: render the arguments separated by spaces
pub fn print(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let line = call
        .args()
        .map(Value::render)
        .collect::<Vec<_>>()
        .join(" ");
    call.output(&line);
    Ok(Value::Int(0))
}

/// `debug(v)`: log a value through tracing and pass it on
pub fn debug(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let value = call.arg(0)?.clone();
    tracing::debug!(target: "skein::script", thread = %call.thread_id(), value = %value.repr(), "debug");
    Ok(value)
}

pub fn len(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let value = call.arg(0)?;
    value
        .len()
        .map(|n| Value::Int(n as i64))
        .ok_or_else(|| ScriptError::type_assertion(0, "string, array or structure", value.type_name()))
}

pub fn type_of(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    Ok(Value::str(call.arg(0)?.type_name()))
}

pub fn to_int(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    Ok(Value::Int(call.arg(0)?.to_int()?))
}

pub fn to_float(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    Ok(Value::Float(call.arg(0)?.to_float()?))
}

pub fn to_str(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    Ok(Value::Str(call.arg(0)?.render()))
}

/// `push(array, v)` returns a new array; the argument is a copy
pub fn push(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let mut items = call.array(0)?.to_vec();
    items.push(call.arg(1)?.clone());
    Ok(Value::Array(items))
}

pub fn keys(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let structure = call.structure(0)?;
    Ok(Value::Array(structure.keys().map(Value::str).collect()))
}
