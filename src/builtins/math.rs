// Math built-ins
// Provides: abs, min, max, floor, sqrt, pow, random

use crate::error::{ScriptError, SkeinResult};
use crate::vm::{NativeCall, Value};
use rand::Rng;
use std::cmp::Ordering;

pub fn abs(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    match call.arg(0)? {
        Value::Int(n) => n
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::bad_operand("Integer overflow in abs")),
        _ => Ok(Value::Float(call.number(0)?.abs())),
    }
}

pub fn min(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    extreme(call, Ordering::Less)
}

pub fn max(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    extreme(call, Ordering::Greater)
}

/// The argument that compares `wanted` against all others; ties keep the first
fn extreme(call: &NativeCall<'_>, wanted: Ordering) -> SkeinResult<Value> {
    let mut best = call.arg(0)?;
    for candidate in call.args().skip(1) {
        if candidate.compare(best)? == wanted {
            best = candidate;
        }
    }
    Ok(best.clone())
}

pub fn floor(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    match call.arg(0)? {
        Value::Int(n) => Ok(Value::Int(*n)),
        _ => Ok(Value::Int(call.number(0)?.floor() as i64)),
    }
}

pub fn sqrt(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let n = call.number(0)?;
    if n < 0.0 {
        return Err(ScriptError::bad_operand(format!(
            "Cannot take the square root of {}",
            n
        )));
    }
    Ok(Value::Float(n.sqrt()))
}

/// Integer powers stay integers while they fit
pub fn pow(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    if let (Value::Int(base), Value::Int(exp)) = (call.arg(0)?, call.arg(1)?) {
        if let Some(n) = u32::try_from(*exp).ok().and_then(|e| base.checked_pow(e)) {
            return Ok(Value::Int(n));
        }
    }
    Ok(Value::Float(call.number(0)?.powf(call.number(1)?)))
}

/// `random(n)`: an int in `0..n`, or a float in `[0, 1)` when n is 0
pub fn random(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let n = call.int(0)?;
    let mut rng = rand::rng();
    match n {
        0 => Ok(Value::Float(rng.random::<f64>())),
        n if n > 0 => Ok(Value::Int(rng.random_range(0..n))),
        n => Err(ScriptError::bad_operand(format!(
            "random() needs a non-negative bound, got {}",
            n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::error::ErrorCode;
    use crate::vm::Value;

    #[test]
    fn test_min_max() {
        let mut engine = Engine::default();
        assert_eq!(engine.evaluate("min(4, 2.5, 9)").unwrap(), Value::Float(2.5));
        assert_eq!(engine.evaluate("max(4, 2, 9)").unwrap(), Value::Int(9));
        assert_eq!(engine.evaluate("max(\"a\", \"c\", \"b\")").unwrap(), Value::str("c"));
        let err = engine.evaluate("min()").unwrap_err();
        assert_eq!(err.code, ErrorCode::HostFailure);
    }

    #[test]
    fn test_numeric() {
        let mut engine = Engine::default();
        assert_eq!(engine.evaluate("abs(-3)").unwrap(), Value::Int(3));
        assert_eq!(engine.evaluate("floor(2.7)").unwrap(), Value::Int(2));
        assert_eq!(engine.evaluate("pow(2, 10)").unwrap(), Value::Int(1024));
        assert_eq!(engine.evaluate("pow(4, 0.5)").unwrap(), Value::Float(2.0));
        assert_eq!(engine.evaluate("sqrt(9)").unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_random_in_range() {
        let mut engine = Engine::default();
        for _ in 0..20 {
            let n = engine.evaluate("random(5)").unwrap().as_int().unwrap();
            assert!((0..5).contains(&n));
        }
        assert!(engine.evaluate("random(-1)").is_err());
    }
}
