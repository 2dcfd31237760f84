//! `PROBE_instr`/`PROBE_loop`, `TRAP`, and the `TIERUP` wiring (spec §4.4,
//! §4.7). These are the escape points a hand-rolled interpreter body calls
//! into at instruction boundaries; everything else about instruction
//! decoding stays out of scope.

use crate::function::WasmFunction;
use crate::stack::StackObject;
use crate::tiering::TierUpGate;
use crate::trap::{Throwable, TrapReason};

/// `TRAP(reason)`: raises a Wasm-specified failure, attaching the current
/// call-frame chain as its trace (spec testable property 4).
pub fn trap(stack: &StackObject, reason: TrapReason) -> Throwable {
    log::debug!("trap: {reason}");
    Throwable::Trap(crate::trap::Trap::with_trace(reason, stack.capture_trace()))
}

/// `PROBE_instr(pc)`: records the interpreter's current position in the
/// innermost frame, so a trap raised moments later has an accurate `pc`.
pub fn probe_instr(stack: &StackObject, pc: u32) {
    stack.set_current_pc(pc);
}

/// `PROBE_loop(pc)`: like `PROBE_instr`, but also the sole place `TIERUP`
/// is consulted (spec §4.7: tier-up only fires at loop back-edges).
pub fn probe_loop(stack: &StackObject, f: &WasmFunction, pc: u32, gate: &TierUpGate) {
    stack.set_current_pc(pc);
    gate.tier_up(f, pc, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRecord;
    use crate::function::Signature;
    use crate::value::ValueRep;
    use std::sync::Arc;

    #[test]
    fn trap_captures_the_current_frame_chain() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        let f = WasmFunction::new("f", Signature::new(vec![], vec![]), Arc::new(|_stack, _vs| None));
        so.push_frame(FrameRecord::interpreter(f));
        probe_instr(&so, 42);

        let t = trap(&so, TrapReason::Unreachable);
        match t {
            Throwable::Trap(trap) => {
                assert_eq!(trap.trace.len(), 1);
                assert_eq!(trap.trace[0].pc, 42);
            }
            other => panic!("expected a trap, got {other}"),
        }
    }

    #[test]
    fn probe_loop_never_tiers_up_when_gate_is_disabled() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        let f = WasmFunction::new("loopy", Signature::new(vec![], vec![]), Arc::new(|_stack, _vs| None));
        let gate = TierUpGate::disabled();
        probe_loop(&so, &f, 3, &gate);
        assert!(f.decl().compiled.lock().unwrap().is_none());
    }
}
