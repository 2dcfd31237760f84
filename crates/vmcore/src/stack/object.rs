//! [`StackObject`]: the unit of suspendability (spec §3, §4.2).

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use vmcore_fiber::StackMapping;

use crate::frame::FrameRecord;
use crate::function::Function;
use crate::stack::value_stack::ValueStack;
use crate::trap::{InternalError, Throwable};
use crate::value::{Type, Value, ValueRep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Empty,
    Suspended,
    Resumable,
    Running,
    RunningHost,
}

impl StackState {
    fn name(self) -> &'static str {
        match self {
            StackState::Empty => "EMPTY",
            StackState::Suspended => "SUSPENDED",
            StackState::Resumable => "RESUMABLE",
            StackState::Running => "RUNNING",
            StackState::RunningHost => "RUNNING_HOST",
        }
    }
}

/// What a completed `resume()` produced (spec §4.2).
#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    Value(Vec<Value>),
    Throw(Throwable),
}

/// The unit of suspendability: a guarded native stack, the typed value
/// stack living in its lower half, and the bookkeeping needed to suspend
/// and resume execution on it.
pub struct StackObject {
    pub(crate) mapping: StackMapping,
    pub(crate) value_stack: RefCell<ValueStack>,
    pub(crate) rsp: Cell<*mut u8>,
    func: RefCell<Option<Function>>,
    params_arity: Cell<usize>,
    return_results: RefCell<Vec<Type>>,
    state: Cell<StackState>,
    pub(crate) parent: RefCell<Option<Arc<StackObject>>>,
    pub(crate) parent_rsp: Cell<*mut u8>,
    /// Logical Wasm call-frame chain for this stack (see `crate::frame`).
    pub(crate) frames: RefCell<Vec<FrameRecord>>,
}

// Exactly one native thread ever touches a `StackObject` at a time (spec
// §5's single-threaded cooperative model); `currentStack` enforces that at
// the process level, not this type, but we still need `Send`/`Sync` so a
// `StackObject` can be parked in a process-wide static between turns.
unsafe impl Send for StackObject {}
unsafe impl Sync for StackObject {}

impl StackObject {
    pub fn new(rep: ValueRep, size: usize) -> Result<Arc<StackObject>, vmcore_fiber::FiberError> {
        rep.validate().map_err(|_| vmcore_fiber::FiberError::Protect)?;
        let mapping = StackMapping::new(size)?;
        let range = mapping.range();
        let guard = mapping.guard_page_size();

        let vs_base = range.start as *mut u8;
        let vs_limit = (range.end - 2 * guard) as *mut u8;
        let value_stack = unsafe { ValueStack::new(rep, vs_base, vs_limit) };

        let rsp = range.end as *mut u8;

        Ok(Arc::new(StackObject {
            mapping,
            value_stack: RefCell::new(value_stack),
            rsp: Cell::new(rsp),
            func: RefCell::new(None),
            params_arity: Cell::new(0),
            return_results: RefCell::new(Vec::new()),
            state: Cell::new(StackState::Empty),
            parent: RefCell::new(None),
            parent_rsp: Cell::new(std::ptr::null_mut()),
            frames: RefCell::new(Vec::new()),
        }))
    }

    pub fn push_frame(&self, frame: FrameRecord) {
        self.frames.borrow_mut().push(frame);
    }

    pub fn pop_frame(&self) {
        self.frames.borrow_mut().pop();
    }

    pub fn set_current_pc(&self, pc: u32) {
        if let Some(top) = self.frames.borrow().last() {
            top.set_pc(pc);
        }
    }

    pub fn capture_trace(&self) -> Vec<crate::trap::TraceFrame> {
        crate::frame::capture_trace(&self.frames.borrow())
    }

    pub fn state(&self) -> StackState {
        self.state.get()
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.mapping.range()
    }

    fn require(&self, expected: StackState) -> Result<(), InternalError> {
        if self.state.get() != expected {
            return Err(InternalError::WrongState { expected: expected.name(), found: self.state.get().name() });
        }
        Ok(())
    }

    /// Arms the stack to call `func`: requires `EMPTY`. Transitions to
    /// `SUSPENDED` if `func` still needs parameters, or straight to
    /// `RESUMABLE` if it takes none.
    pub fn reset(&self, func: Function) -> Result<(), InternalError> {
        self.require(StackState::Empty)?;
        let arity = func.signature().params.len();
        let results = func.signature().results.clone();
        log::debug!("stack {:p}: reset for {arity}-arg call", self as *const _);

        *self.func.borrow_mut() = Some(func);
        self.params_arity.set(arity);
        *self.return_results.borrow_mut() = results;

        let entry_rsp = unsafe { super::switch::prepare_fresh_stack(self.mapping.range().end as *mut u8) };
        self.rsp.set(entry_rsp);

        self.state.set(if arity == 0 { StackState::Resumable } else { StackState::Suspended });
        Ok(())
    }

    /// Pushes `args` onto the value stack. Requires `SUSPENDED`. Excess
    /// arguments (more than the function still needs) are an embedder bug,
    /// reported rather than silently truncated.
    pub fn bind(&self, args: &[Value]) -> Result<(), InternalError> {
        self.require(StackState::Suspended)?;
        if args.len() > self.params_arity.get() {
            return Err(InternalError::TooManyArguments);
        }
        {
            let mut vs = self.value_stack.borrow_mut();
            for v in args {
                unsafe { vs.push(*v) };
            }
        }
        self.params_arity.set(self.params_arity.get() - args.len());
        if self.params_arity.get() == 0 {
            self.state.set(StackState::Resumable);
        }
        Ok(())
    }

    pub fn func(&self) -> Option<Function> {
        self.func.borrow().clone()
    }

    pub fn result_types(&self) -> Vec<Type> {
        self.return_results.borrow().clone()
    }

    pub(crate) fn set_state(&self, s: StackState) {
        self.state.set(s);
    }

    pub(crate) fn set_parent(&self, parent: Option<Arc<StackObject>>) {
        *self.parent.borrow_mut() = parent;
    }

    pub(crate) fn parent(&self) -> Option<Arc<StackObject>> {
        self.parent.borrow().clone()
    }

    /// Runs the stack to completion. Requires `RESUMABLE`. Walks `parent`
    /// to find the bottom of the chain, switches onto this stack, and on
    /// return pops `|return_results|` values (or observes a throwable),
    /// then resets to `EMPTY`.
    pub fn resume(self: &Arc<StackObject>) -> ResumeOutcome {
        assert_eq!(self.state.get(), StackState::Resumable, "resume() requires RESUMABLE");
        let outcome = super::switch::resume(self);
        self.clear();
        outcome
    }

    /// Resets `vsp`, `rsp`, and all bookkeeping to the initial `EMPTY` state.
    pub fn clear(&self) {
        let range = self.mapping.range();
        unsafe {
            self.value_stack.borrow_mut().set_vsp(range.start as *mut u8);
        }
        self.rsp.set(range.end as *mut u8);
        *self.func.borrow_mut() = None;
        self.params_arity.set(0);
        self.return_results.borrow_mut().clear();
        self.parent_rsp.set(std::ptr::null_mut());
        *self.parent.borrow_mut() = None;
        self.frames.borrow_mut().clear();
        self.state.set(StackState::Empty);
    }

    // --- Declared-but-unimplemented operations (spec §9 open questions).
    // Stubbed to report unsupported rather than guessing semantics.

    pub fn pop_all_frames(&self) -> Result<(), InternalError> {
        Err(InternalError::Unsupported("StackObject::popAllFrames"))
    }

    pub fn throw_tag(&self, _tag: u32) -> Result<(), InternalError> {
        Err(InternalError::Unsupported("StackObject::throwTag"))
    }

    pub fn where_(&self) -> Result<(), InternalError> {
        Err(InternalError::Unsupported("StackObject::where"))
    }

    pub fn caller(&self) -> Result<(), InternalError> {
        Err(InternalError::Unsupported("StackObject::caller"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{HostFunction, Signature};

    fn noop_host() -> Function {
        Function::Host(HostFunction::new(
            "noop",
            Signature::new(vec![Type::I32], vec![]),
            |_args| crate::function::HostCallResult::Value0,
        ))
    }

    #[test]
    fn lifecycle_suspended_until_bound_then_resumable() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        assert_eq!(so.state(), StackState::Empty);
        so.reset(noop_host()).unwrap();
        assert_eq!(so.state(), StackState::Suspended);
        so.bind(&[Value::I32(1)]).unwrap();
        assert_eq!(so.state(), StackState::Resumable);
    }

    #[test]
    fn zero_arity_goes_straight_to_resumable() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        let f = Function::Host(HostFunction::new("f", Signature::new(vec![], vec![]), |_| {
            crate::function::HostCallResult::Value0
        }));
        so.reset(f).unwrap();
        assert_eq!(so.state(), StackState::Resumable);
    }

    #[test]
    fn excess_bind_arguments_are_reported_not_truncated() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        so.reset(noop_host()).unwrap();
        let err = so.bind(&[Value::I32(1), Value::I32(2)]).unwrap_err();
        assert!(matches!(err, InternalError::TooManyArguments));
    }
}
