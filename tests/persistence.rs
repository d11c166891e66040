mod helpers;

use helpers::engine;
use skein_core::binary::{load_engine, load_program, load_thread, save_engine, save_program, save_thread};
use skein_core::{PersistError, SliceSource, ThreadStatus, Value};

#[test]
fn test_saved_program_runs_in_another_engine() {
    let source = "
        var s = { name = \"box\", sizes = [1, 2] };
        s.sizes[1] = square(4);
        return s;
        function square(x) { return x * x; }";
    let program = engine().compile_script(source).unwrap();

    let mut bytes = Vec::new();
    save_program(&mut bytes, &program).unwrap();
    let loaded = load_program(&mut SliceSource::new(&bytes)).unwrap();

    let value = engine().execute(&loaded, &[]).unwrap();
    assert_eq!(value.to_string(), "{name=\"box\", sizes=[1, 16]}");
}

#[test]
fn test_pending_store_survives_thread_snapshot() {
    let mut engine = engine();
    let program = engine
        .compile_script("var arr = [1, 2, 3]; arr[1] = wait(5); return arr;")
        .unwrap();
    let mut thread = engine.create_thread(&program, &[]).unwrap();
    assert_eq!(engine.resume(&mut thread), ThreadStatus::Paused);

    let mut bytes = Vec::new();
    save_thread(&mut bytes, &thread).unwrap();
    let mut restored = load_thread(&mut SliceSource::new(&bytes)).unwrap();
    assert_eq!(restored.id(), thread.id());
    assert_eq!(restored.ip(), thread.ip());
    assert_eq!(restored.stack_len(), thread.stack_len());

    engine.advance_clock(5);
    assert_eq!(engine.resume(&mut restored), ThreadStatus::Finished);
    assert_eq!(
        restored.result(),
        &Value::Array(vec![Value::Int(1), Value::Int(0), Value::Int(3)])
    );
}

#[test]
fn test_engine_snapshot_restores_globals_and_parked_threads() {
    let mut engine = engine();
    engine.define_global("count", Value::Int(0));
    let program = engine
        .compile_script("count += 1; wait(20); count += 1; return count;")
        .unwrap();
    for _ in 0..2 {
        let mut thread = engine.create_thread(&program, &[]).unwrap();
        engine.resume(&mut thread);
        assert!(engine.park(thread).is_ok());
    }

    let mut bytes = Vec::new();
    save_engine(&mut bytes, &engine).unwrap();

    let mut restored = helpers::engine();
    load_engine(&mut SliceSource::new(&bytes), &mut restored).unwrap();
    assert_eq!(restored.global("count"), Some(&Value::Int(2)));
    assert_eq!(restored.parked_count(), 2);
    assert_eq!(restored.next_deadline(), Some(20));

    restored.advance_clock(20);
    let mut results: Vec<Value> = restored
        .poll()
        .iter()
        .map(|t| t.result().clone())
        .collect();
    results.sort_by_key(|v| v.as_int());
    assert_eq!(results, vec![Value::Int(3), Value::Int(4)]);

    // new threads never reuse a restored id
    let fresh = restored.create_thread(&program, &[]).unwrap();
    assert!(restored.parked_threads().iter().all(|t| t.id() != fresh.id()));
    assert!(fresh.id().0 > 2);
}

#[test]
fn test_corrupt_snapshot_is_rejected() {
    let program = engine().compile_script("return 1;").unwrap();
    let mut bytes = Vec::new();
    save_program(&mut bytes, &program).unwrap();

    let cut = &bytes[..bytes.len() - 3];
    assert!(matches!(
        load_program(&mut SliceSource::new(cut)),
        Err(PersistError::Truncated { .. })
    ));

    let mut wrong = bytes.clone();
    wrong[0] = b'X';
    assert_eq!(
        load_program(&mut SliceSource::new(&wrong)).unwrap_err(),
        PersistError::BadMagic
    );

    // Huge counts in a short buffer fail on the first missing record
    assert!(matches!(
        load_program(&mut SliceSource::new(b"SKNC\x01P\xff\xff\xff\xff")),
        Err(PersistError::Truncated { .. })
    ));
    let mut target = engine();
    assert!(matches!(
        load_engine(&mut SliceSource::new(b"SKNC\x01E\x00\x00\x00\x00\xff\xff\xff\xff"), &mut target),
        Err(PersistError::Truncated { .. })
    ));
}
