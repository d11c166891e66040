mod helpers;

use helpers::{capture_output, engine, run, run_err};
use skein_core::{ErrorCode, ErrorPhase, Value};

#[test]
fn test_operator_priority() {
    assert_eq!(run("return 2 + 3 * 4 - (1 << 2);"), Value::Int(10));
    assert_eq!(
        run("var a = 2; var b = 3; return a + b * 4 == 14;"),
        Value::Int(1)
    );
    assert_eq!(run("var x = 6; return x & 3 | 8;"), Value::Int(10));
    assert_eq!(run("var x = 7; return x / 2 + x % 2;"), Value::Int(4));
    assert_eq!(run("var s = \"n=\"; return s + 4;"), Value::str("n=4"));
}

#[test]
fn test_short_circuit_skips_failing_call() {
    assert_eq!(run("var a = 0; return a && boom();"), Value::Int(0));
    assert_eq!(run("var a = 5; return a || boom();"), Value::Int(5));

    let err = run_err("var a = 1; return a && boom();");
    assert_eq!(err.code, ErrorCode::HostFailure);
    assert_eq!(err.callee.as_deref(), Some("boom"));
}

#[test]
fn test_constant_expressions_fold_to_one_action() {
    let engine = engine();
    let program = engine.compile_expression("(1 + 2) * PI - 3").unwrap();
    assert_eq!(program.len(), 1);

    let program = engine.compile_expression("2 * 3 + x").unwrap_err();
    assert_eq!(program.code, ErrorCode::UndefinedSymbol);
}

#[test]
fn test_loops_with_break_and_continue() {
    let source = "
        var total = 0;
        for (var i = 0; i < 10; i++) {
            if (i % 2 == 0) { continue; }
            if (i > 7) { break; }
            total += i;
        }
        return total;";
    assert_eq!(run(source), Value::Int(1 + 3 + 5 + 7));

    let source = "
        var n = 0;
        do { n += 3; } while (n < 10);
        var m = 0;
        while (m < n) { m += 4; }
        return [n, m];";
    assert_eq!(
        run(source),
        Value::Array(vec![Value::Int(12), Value::Int(12)])
    );
}

#[test]
fn test_switch_falls_through_until_break() {
    let source = "
        var log = [];
        switch (key) {
            case 1: log = push(log, \"one\");
            case 2: log = push(log, \"two\"); break;
            default: log = push(log, \"other\");
            case 3: log = push(log, \"three\");
        }
        return log;";

    let engine = engine();
    let program = engine.compile_script_with_locals(source, &["key"]).unwrap();
    let mut engine = engine;

    let one = engine.execute(&program, &[("key", Value::Int(1))]).unwrap();
    assert_eq!(one.repr(), "[\"one\", \"two\"]");
    let three = engine.execute(&program, &[("key", Value::Int(3))]).unwrap();
    assert_eq!(three.repr(), "[\"three\"]");
    let other = engine.execute(&program, &[("key", Value::Int(9))]).unwrap();
    assert_eq!(other.repr(), "[\"other\", \"three\"]");
}

#[test]
fn test_const_rules() {
    assert_eq!(run("const k; k = 4; return k;"), Value::Int(4));

    let err = run_err("const k = 1;\nk += 1;");
    assert_eq!(err.code, ErrorCode::ConstViolation);
    assert_eq!(err.phase, ErrorPhase::Runtime);
    assert_eq!(err.pos.line(), 2);

    let mut engine = engine();
    engine.define_const_global("LIMIT", Value::Int(3));
    let err = engine.compile_script("LIMIT = 4;").unwrap_err();
    assert_eq!(err.code, ErrorCode::ConstViolation);
    assert_eq!(err.phase, ErrorPhase::Compile);
}

#[test]
fn test_accessor_writes_and_value_copies() {
    let source = "
        var grid = [[1, 2], [3, 4]];
        grid[1][0] = 30;
        grid[0][1] += 5;
        return grid;";
    assert_eq!(run(source).repr(), "[[1, 7], [30, 4]]");

    // assignment copies, so writes through the copy leave the original alone
    let source = "
        var a = { items = [1, 2], name = \"a\" };
        var b = a;
        b.items[0] = 99;
        b.name = \"b\";
        return [a.items[0], a.name, b.items[0], b.name];";
    assert_eq!(run(source).repr(), "[1, \"a\", 99, \"b\"]");

    assert_eq!(run("var s = { x = 1 }; s.y = 2; return s.x + s.y;"), Value::Int(3));
    let err = run_err("var s = static { x = 1 }; s.y = 2;");
    assert_eq!(err.code, ErrorCode::BadAccessor);
    let err = run_err("var s = { const id = 7 }; s.id = 8;");
    assert_eq!(err.code, ErrorCode::ConstViolation);
}

#[test]
fn test_indexing_errors() {
    assert_eq!(run_err("var a = [1, 2]; return a[2];").code, ErrorCode::IndexOutOfBounds);
    assert_eq!(run_err("var a = []; return a[0];").code, ErrorCode::EmptyIndex);
    assert_eq!(run("var s = \"abc\"; return s[1];"), Value::str("b"));
}

#[test]
fn test_inline_functions_are_isolated() {
    let source = "
        var seen = fact(5);
        var n = 100;
        touch(n);
        return [seen, n];
        function fact(n) {
            if (n <= 1) { return 1; }
            return n * fact(n - 1);
        }
        function touch(n) {
            n = 0;
        }";
    assert_eq!(run(source).repr(), "[120, 100]");
}

#[test]
fn test_print_goes_through_output_hook() {
    let mut engine = engine();
    let lines = capture_output(&mut engine);
    engine
        .run_script("var name = \"skein\"; print(\"hello\", name, 3);")
        .unwrap();
    assert_eq!(lines.borrow().as_slice(), &["hello skein 3".to_string()]);
}

#[test]
fn test_errors_carry_positions() {
    let err = run_err("var a = 1;\nvar b = a / 0;");
    assert_eq!(err.code, ErrorCode::DivisionByZero);
    assert_eq!(err.pos.line(), 2);

    let err = engine().compile_script("var s = \"open;").unwrap_err();
    assert_eq!(err.phase, ErrorPhase::Lex);
    assert_eq!(err.code, ErrorCode::UnterminatedString);
}

#[test]
fn test_sibling_functions_keep_their_own_locals() {
    let source = "
        return outer(1);
        function outer(x) {
            var t = x + 10;
            var got = inner(t);
            return [t, got];
        }
        function inner(x) {
            var t = x * 2;
            return t;
        }";
    assert_eq!(run(source).repr(), "[11, 22]");
}

#[test]
fn test_string_growth_fails_instead_of_allocating() {
    let err = run_err("var n = 9223372036854775807; var s = \"ab\" * n;");
    assert_eq!(err.code, ErrorCode::BadOperand);
    assert_eq!(err.phase, ErrorPhase::Runtime);

    // a literal that cannot fold is left for the runtime to reject
    let mut engine = engine();
    let program = engine.compile_expression("\"ab\" * 9223372036854775807").unwrap();
    assert!(program.len() > 1);
    let err = engine.execute(&program, &[]).unwrap_err();
    assert_eq!(err.code, ErrorCode::BadOperand);

    let err = run_err("var s = \"xxxxxxxx\"; while (1) { s = s + s; }");
    assert_eq!(err.code, ErrorCode::BadOperand);
    assert_eq!(run("return \"ab\" * 3;"), Value::str("ababab"));
}

#[test]
fn test_sibling_loops_redeclare_their_counter() {
    let source = "
        var total = 0;
        for (var i = 0; i < 3; i++) { total += i; }
        for (var i = 10; i < 12; i++) { total += i; }
        return total;";
    assert_eq!(run(source), Value::Int(24));

    let err = run_err("for (var i = 0; i < 3; i++) { var i = 1; }");
    assert_eq!(err.code, ErrorCode::Redefinition);
    assert_eq!(err.phase, ErrorPhase::Compile);
}
