// Hashing built-in: SHA-256 of a value's rendering

use crate::error::SkeinResult;
use crate::vm::{NativeCall, Value};
use sha2::{Digest, Sha256};

/// `hash(v)`: hex SHA-256 digest. Strings hash their raw text, other
/// values their printed form.
pub fn hash(call: &mut NativeCall<'_>) -> SkeinResult<Value> {
    let text = call.arg(0)?.render();
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Ok(Value::Str(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::vm::Value;

    #[test]
    fn test_sha256_hex() {
        let mut engine = Engine::default();
        assert_eq!(
            engine.evaluate("hash(\"abc\")").unwrap(),
            Value::str("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(
            engine.evaluate("hash(12)").unwrap(),
            engine.evaluate("hash(\"12\")").unwrap()
        );
    }
}
