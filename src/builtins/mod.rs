// Skein Built-in Functions
// Host functions and named constants installed into every engine unless
// the config turns them off

mod common;
mod hash;
mod math;
mod time;

use crate::engine::Engine;
use crate::vm::{Value, VARIADIC};

/// Register the standard library with an engine
pub fn install(engine: &mut Engine) {
    // common
    engine.register_native("print", VARIADIC, common::print);
    engine.register_native("debug", 1, common::debug);
    engine.register_native("len", 1, common::len);
    engine.register_native("typeof", 1, common::type_of);
    engine.register_native("int", 1, common::to_int);
    engine.register_native("float", 1, common::to_float);
    engine.register_native("str", 1, common::to_str);
    engine.register_native("push", 2, common::push);
    engine.register_native("keys", 1, common::keys);

    // math
    engine.register_native("abs", 1, math::abs);
    engine.register_native("min", VARIADIC, math::min);
    engine.register_native("max", VARIADIC, math::max);
    engine.register_native("floor", 1, math::floor);
    engine.register_native("sqrt", 1, math::sqrt);
    engine.register_native("pow", 2, math::pow);
    engine.register_native("random", 1, math::random);

    // hashing and time
    engine.register_native("hash", 1, hash::hash);
    engine.register_native("now", 0, time::now);
    engine.register_native("wait", 1, time::wait);

    engine.define_constant("true", Value::Int(1));
    engine.define_constant("false", Value::Int(0));
    engine.define_constant("PI", Value::Float(std::f64::consts::PI));
    engine.define_constant("E", Value::Float(std::f64::consts::E));
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::vm::Value;

    #[test]
    fn test_installed_by_default() {
        let engine = Engine::default();
        assert!(engine.natives().contains("wait"));
        assert!(engine.natives().contains("print"));
        let bare = Engine::new(EngineConfig {
            builtins: false,
            ..EngineConfig::default()
        });
        assert!(bare.natives().is_empty());
    }

    #[test]
    fn test_constants_fold() {
        let mut engine = Engine::default();
        assert_eq!(engine.evaluate("true && !false").unwrap(), Value::Int(1));
        let program = engine.compile_expression("PI * 2").unwrap();
        assert_eq!(program.len(), 1);
    }
}
