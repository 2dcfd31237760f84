//! The stack-switch stubs (spec §4.2): `prepare_fresh_stack` realizes
//! `STACK_ENTER_FUNC_STUB`, and the tail end of [`enter_func`] realizes
//! `STACK_RETURN_PARENT_STUB`, as a single Rust trampoline rather than two
//! separate hand-written assembly thunks — there is exactly one machine
//! instruction sequence here (`vmcore_fiber_switch`'s `ret`), and which
//! logical stub it represents is a matter of what runs before or after it,
//! not a distinct code address. A real hand-written JIT would give each
//! stub its own entry point for the unwinder to recognize by address;
//! `vmcore-unwinder`'s `CodeRegistry` is still used for exactly that
//! purpose, registered once at crate init (see [`register_stub_regions`]).

use std::cell::RefCell;

use vmcore_unwinder::{CodeRegistry, RegionKind};

use super::object::{ResumeOutcome, StackObject, StackState};
use crate::trap::{InternalError, Throwable};

thread_local! {
    /// The single `StackObject` currently running on this native thread
    /// (spec §5's single-threaded cooperative model — enforced here with a
    /// thread-local rather than a process-wide lock, since only the thread
    /// that calls `resume()` ever touches the fiber it switches onto).
    static CURRENT_STACK: RefCell<Option<std::sync::Arc<StackObject>>> = const { RefCell::new(None) };
    static PENDING_OUTCOME: RefCell<Option<ResumeOutcome>> = const { RefCell::new(None) };
}

/// `STACK_ENTER_FUNC_STUB` in trampoline form: the first thing control runs
/// on a freshly switched-to stack. Never returns to its caller in the usual
/// sense — it switches back to the parent itself once the call finishes.
extern "C" fn fiber_entry_trampoline() {
    let stack = CURRENT_STACK
        .with(|c| c.borrow().clone())
        .unwrap_or_else(|| crate::trap::fatal("fiber entered with no current stack set"));

    stack.set_state(StackState::Running);
    let outcome = enter_func(&stack);
    PENDING_OUTCOME.with(|o| *o.borrow_mut() = Some(outcome));

    // STACK_RETURN_PARENT_STUB: switch back into whoever called `resume()`.
    // `parent_rsp` was filled in by the very switch that brought us here.
    let parent_rsp = stack.parent_rsp.get();
    let mut discard: *mut u8 = std::ptr::null_mut();
    unsafe { vmcore_fiber::switch(&mut discard as *mut *mut u8, parent_rsp) };
    crate::trap::fatal("control returned into a retired fiber");
}

/// Runs the function bound to `stack` to completion via the host-call/
/// tail-call protocol (spec §4.5), pushing and popping the one logical
/// call frame a top-level entry represents.
fn enter_func(stack: &StackObject) -> ResumeOutcome {
    let Some(func) = stack.func() else {
        return ResumeOutcome::Throw(Throwable::internal(InternalError::MalformedConfig(
            "fiber entered with no function bound",
        )));
    };
    let param_types = func.signature().params.clone();
    let args = {
        let mut vs = stack.value_stack.borrow_mut();
        match vs.pop_n(&param_types) {
            Ok(v) => v.into_vec(),
            Err(e) => return ResumeOutcome::Throw(Throwable::internal(e)),
        }
    };
    match crate::dispatch::host::call(stack, func, args) {
        Ok(results) => ResumeOutcome::Value(results),
        Err(t) => ResumeOutcome::Throw(t),
    }
}

/// Seeds a freshly reset stack with a synthetic frame that, on the first
/// switch into it, "returns" into [`fiber_entry_trampoline`].
pub(crate) unsafe fn prepare_fresh_stack(top: *mut u8) -> *mut u8 {
    unsafe { vmcore_fiber::prepare_entry_frame(top, fiber_entry_trampoline) }
}

/// `resume()`'s mechanics: walks to the bottom of the parent chain (a
/// suspended stack may itself be waiting on a child — spec §4.2), records
/// itself as current, and performs the native context switch.
pub(crate) fn resume(stack: &std::sync::Arc<StackObject>) -> ResumeOutcome {
    let mut bottom = stack.clone();
    while let Some(parent) = bottom.parent() {
        bottom = parent;
    }

    CURRENT_STACK.with(|c| *c.borrow_mut() = Some(bottom.clone()));
    unsafe {
        vmcore_fiber::switch(bottom.parent_rsp.as_ptr(), bottom.rsp.get());
    }

    PENDING_OUTCOME
        .with(|o| o.borrow_mut().take())
        .unwrap_or_else(|| crate::trap::fatal("fiber returned to parent without an outcome"))
}

/// Registers the logical stub "code" addresses with the unwinder's
/// registry so a frame walk across a stack-switch boundary classifies them
/// as `RegionKind::StackStub` rather than unknown memory (spec §4.6).
pub fn register_stub_regions(registry: &mut CodeRegistry) {
    let addr = fiber_entry_trampoline as usize;
    registry.register(
        addr..addr + 1,
        RegionKind::StackStub { name: "stack_enter_func_stub", frame_size: 0 },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{HostFunction, Signature};
    use crate::value::{Type, Value, ValueRep};

    #[test]
    fn resume_runs_host_function_to_completion() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        let f = crate::function::Function::Host(HostFunction::new(
            "double",
            Signature::new(vec![Type::I32], vec![Type::I32]),
            |args| {
                let Value::I32(x) = args[0] else { unreachable!() };
                crate::function::HostCallResult::Value1(Value::I32(x * 2))
            },
        ));
        so.reset(f).unwrap();
        so.bind(&[Value::I32(21)]).unwrap();
        match so.resume() {
            ResumeOutcome::Value(results) => assert_eq!(results, vec![Value::I32(42)]),
            ResumeOutcome::Throw(t) => panic!("unexpected throw: {t}"),
        }
        assert_eq!(so.state(), StackState::Empty);
    }

    #[test]
    fn resume_is_stack_neutral_across_repeated_calls() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        for i in 0..4u32 {
            let f = crate::function::Function::Host(HostFunction::new(
                "id",
                Signature::new(vec![Type::I32], vec![Type::I32]),
                |args| crate::function::HostCallResult::Value1(args[0]),
            ));
            so.reset(f).unwrap();
            so.bind(&[Value::I32(i)]).unwrap();
            let outcome = so.resume();
            assert!(matches!(outcome, ResumeOutcome::Value(v) if v == vec![Value::I32(i)]));
            assert!(so.value_stack.borrow().is_empty());
        }
    }
}
