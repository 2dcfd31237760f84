//! End-to-end scenarios exercising `Engine::run` the way an embedder would,
//! each grounded in one of the documented execution paths: a pure host
//! round trip, a Wasm function touching linear memory, a trap with a
//! populated stack trace, a host-to-Wasm tail call, a GC null-deref trap,
//! and tiering taking effect on a function's second call.

use std::sync::{Arc, Mutex};

use vmcore::dispatch;
use vmcore::function::{Function, HostCallResult, HostFunction, Signature, WasmFunction};
use vmcore::gc_heap::{FieldType, HeapTypeDecl, StructDecl};
use vmcore::instance::{GlobalVar, Instance, Memory, ModuleData, Table};
use vmcore::tiering::{CompiledCode, OsrPoint, TieringPolicy};
use vmcore::trap::{Throwable, TrapReason};
use vmcore::value::{Type, Value, ValueRep};
use vmcore::{Config, Engine};

fn engine() -> Engine {
    Engine::new(Config::default()).unwrap()
}

#[test]
fn return_a_constant() {
    let f = Function::Host(HostFunction::new(
        "answer",
        Signature::new(vec![], vec![Type::I32]),
        |_| HostCallResult::Value1(Value::I32(42)),
    ));
    assert_eq!(engine().run(f, &[]).unwrap(), vec![Value::I32(42)]);
}

#[test]
fn arithmetic_and_memory_grow() {
    let instance = Arc::new(Instance::new(
        vec![Memory::new(1, Some(4))],
        Vec::<Table>::new(),
        Vec::<GlobalVar>::new(),
        Vec::<HeapTypeDecl>::new(),
        ModuleData::default(),
    ));
    let inst = instance.clone();
    let f = Function::Wasm(WasmFunction::new(
        "grow_and_add",
        Signature::new(vec![Type::I32], vec![Type::I32]),
        Arc::new(move |_stack, vs| {
            let delta = vs.pop_u32().unwrap();
            let prev_pages = dispatch::memory::grow(&inst, 0, delta);
            unsafe { vs.push(Value::I32(prev_pages as u32 + 1)) };
            None
        }),
    ));
    let results = engine().run(f, &[Value::I32(2)]).unwrap();
    assert_eq!(results, vec![Value::I32(2)]);
    assert_eq!(instance.memories[0].borrow().size_pages(), 3);
}

#[test]
fn trap_on_out_of_bounds_load_carries_a_trace() {
    let instance = Instance::new(
        vec![Memory::new(1, None)],
        Vec::<Table>::new(),
        Vec::<GlobalVar>::new(),
        Vec::<HeapTypeDecl>::new(),
        ModuleData::default(),
    );
    let f = Function::Wasm(WasmFunction::new(
        "oob_load",
        Signature::new(vec![], vec![]),
        Arc::new(move |stack, _vs| {
            match dispatch::memory::fill(&instance, 0, u32::MAX, 0, 16) {
                Ok(()) => None,
                Err(reason) => Some(dispatch::control::trap(stack, reason)),
            }
        }),
    ));
    let err = engine().run(f, &[]).unwrap_err();
    match err {
        Throwable::Trap(trap) => {
            assert_eq!(trap.reason, TrapReason::MemoryOob);
            assert_eq!(trap.trace.len(), 1, "innermost frame should be recorded");
            assert_eq!(trap.trace[0].function.name(), "oob_load");
        }
        other => panic!("expected a trap, got {other}"),
    }
}

#[test]
fn host_tail_calls_into_wasm_without_growing_the_stack() {
    let squarer = Function::Wasm(WasmFunction::new(
        "square",
        Signature::new(vec![Type::I32], vec![Type::I32]),
        Arc::new(|_stack, vs| {
            let x = vs.pop_u32().unwrap();
            unsafe { vs.push(Value::I32(x * x)) };
            None
        }),
    ));
    let entry = Function::Host(HostFunction::new(
        "entry",
        Signature::new(vec![Type::I32], vec![Type::I32]),
        move |args| HostCallResult::TailCall(squarer.clone(), args.to_vec()),
    ));
    assert_eq!(engine().run(entry, &[Value::I32(6)]).unwrap(), vec![Value::I32(36)]);
}

#[test]
fn gc_struct_null_deref_traps_instead_of_segfaulting() {
    let f = Function::Wasm(WasmFunction::new(
        "read_null_struct",
        Signature::new(vec![], vec![Type::I32]),
        Arc::new(|stack, _vs| match dispatch::gc::struct_get(None, 0) {
            Ok(_) => unreachable!("a null struct ref must never yield a field"),
            Err(reason) => Some(dispatch::control::trap(stack, reason)),
        }),
    ));
    let err = engine().run(f, &[]).unwrap_err();
    assert!(matches!(err, Throwable::Trap(t) if t.reason == TrapReason::NullDeref));
}

#[test]
fn gc_struct_round_trips_through_instance_heaptypes() {
    let instance = Instance::new(
        Vec::<Memory>::new(),
        Vec::<Table>::new(),
        Vec::<GlobalVar>::new(),
        vec![HeapTypeDecl::Struct(StructDecl { fields: vec![FieldType::I32] })],
        ModuleData::default(),
    );
    let r = dispatch::gc::struct_new(&instance, 0, vec![Value::I32(99)]);
    assert_eq!(dispatch::gc::struct_get(Some(r), 0), Ok(Value::I32(99)));
}

/// Tier-up taking effect on a *subsequent* call to the same function
/// (testable property: tiering changes behavior on the next call, never
/// the one in flight). Drives `dispatch::host::call` directly on a
/// hand-built `StackObject` rather than through `Engine`, since the gate
/// here belongs to the test's own policy rather than an `Engine` instance.
#[test]
fn osr_tier_up_changes_behavior_only_on_the_next_call() {
    use vmcore::stack::StackObject;

    struct FixedPolicy(Arc<CompiledCode>);
    impl TieringPolicy for FixedPolicy {
        fn consult(&self, _f: &WasmFunction, pc: u32) -> Option<Arc<CompiledCode>> {
            (pc == 1).then(|| self.0.clone())
        }
    }

    let compiled = Arc::new(CompiledCode {
        entry: Arc::new(|_stack, vs| {
            unsafe { vs.push(Value::I32(100)) };
            None
        }),
        osr_points: vec![OsrPoint { wasm_pc: 1, code_offset: 0 }],
    });
    let gate = Arc::new(vmcore::tiering::TierUpGate::new(Arc::new(FixedPolicy(compiled))));

    let interp_ran = Arc::new(Mutex::new(0u32));
    let counter = interp_ran.clone();
    let gate_for_body = gate.clone();
    let f = WasmFunction::new(
        "loopy",
        Signature::new(vec![], vec![Type::I32]),
        Arc::new(move |stack, vs| {
            *counter.lock().unwrap() += 1;
            let this_fn = match stack.func().unwrap() {
                Function::Wasm(w) => w,
                Function::Host(_) => unreachable!(),
            };
            dispatch::control::probe_loop(stack, &this_fn, 1, &gate_for_body);
            unsafe { vs.push(Value::I32(1)) };
            None
        }),
    );

    let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();

    // First call: interpreter runs and (via PROBE_loop) installs the
    // compiled entry, but still returns the interpreter's own result.
    let first = dispatch::host::call(&so, Function::Wasm(f.clone()), vec![]).unwrap();
    assert_eq!(first, vec![Value::I32(1)]);
    assert_eq!(*interp_ran.lock().unwrap(), 1);

    // Second call: the function's FuncDecl now has compiled code installed,
    // so the dispatcher runs that path instead of the interpreter body.
    let second = dispatch::host::call(&so, Function::Wasm(f), vec![]).unwrap();
    assert_eq!(second, vec![Value::I32(100)]);
    assert_eq!(
        *interp_ran.lock().unwrap(),
        1,
        "compiled path must not re-enter the interpreter body"
    );
}
