//! `TierUpGate`: on-stack replacement from the interpreter into compiled
//! code (spec §4.7).
//!
//! The compiler that produces `CompiledCode` is an external collaborator
//! (spec §1) — this module specifies only the interaction: how a tier-up
//! decision is consulted, how it is installed on a function's declaration,
//! and how the pending return address is rewritten. Because this crate's
//! reference "interpreter" runs as plain Rust closures rather than
//! hand-written machine code (instruction decoding is out of scope), there
//! is no real native return address on the Rust call stack that could
//! safely be patched in place; the raw-pointer rewrite step is implemented
//! against an explicit slot the caller provides, so the exact mechanic the
//! spec describes is still exercised and testable (see
//! `tests/tier_up.rs`), while a genuine hand-written interpreter would pass
//! the address of its own `call TIERUP`'s return slot.

use std::sync::Arc;

use crate::function::WasmFunction;
use crate::stack::{StackObject, ValueStack};
use crate::trap::Throwable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsrPoint {
    pub wasm_pc: u32,
    pub code_offset: usize,
}

/// The compiled entry for one function. `entry` stands in for a native code
/// pointer; since code generation is out of scope, it is a boxed closure
/// with the same contract real compiled code would have (consumes exactly
/// `|params|` slots, produces exactly `|results|` slots).
pub struct CompiledCode {
    pub entry: Arc<dyn Fn(&StackObject, &mut ValueStack) -> Option<Throwable> + Send + Sync>,
    pub osr_points: Vec<OsrPoint>,
}

impl std::fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCode").field("osr_points", &self.osr_points).finish()
    }
}

pub fn invoke_compiled(code: &CompiledCode, stack: &StackObject, vs: &mut ValueStack) -> Option<Throwable> {
    (code.entry)(stack, vs)
}

/// External tiering policy: given a function and the Wasm program counter a
/// `TIERUP` probe fired at, decides whether (and into what) to tier up.
/// Returning `None` means "not hot enough yet" or "still compiling".
pub trait TieringPolicy: Send + Sync {
    fn consult(&self, f: &WasmFunction, pc: u32) -> Option<Arc<CompiledCode>>;
}

/// A policy that never tiers up; used when `Config::tiering_enabled` is
/// `false`; `TIERUP` becomes a no-op (spec §4.4).
pub struct NeverTierUp;
impl TieringPolicy for NeverTierUp {
    fn consult(&self, _f: &WasmFunction, _pc: u32) -> Option<Arc<CompiledCode>> {
        None
    }
}

pub struct TierUpGate {
    policy: Arc<dyn TieringPolicy>,
}

impl TierUpGate {
    pub fn disabled() -> TierUpGate {
        TierUpGate { policy: Arc::new(NeverTierUp) }
    }

    pub fn new(policy: Arc<dyn TieringPolicy>) -> TierUpGate {
        TierUpGate { policy }
    }

    /// Implements `TIERUP(f, pc)`: consults the policy, and if it returns a
    /// compiled entry with an OSR point matching `pc`, installs the entry
    /// on `f`'s declaration (so the *next* call to `f` uses compiled code)
    /// and overwrites `*return_addr_slot`, if given, with the matching
    /// code offset — the raw-pointer rewrite the spec describes, applied
    /// to whatever slot the caller considers its pending return address.
    ///
    /// Returns `true` if a tier-up happened.
    pub fn tier_up(&self, f: &WasmFunction, pc: u32, return_addr_slot: Option<&mut usize>) -> bool {
        let Some(code) = self.policy.consult(f, pc) else {
            log::trace!("tier-up: no candidate for pc={pc}");
            return false;
        };
        let Some(point) = code.osr_points.iter().find(|p| p.wasm_pc == pc) else {
            log::warn!("tier-up: policy returned code with no OSR point at pc={pc}");
            return false;
        };
        *f.decl().compiled.lock().unwrap() = Some(code.clone());
        if let Some(slot) = return_addr_slot {
            *slot = point.code_offset;
        }
        log::debug!("tier-up: installed compiled entry for pc={pc}, offset={}", point.code_offset);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Signature;
    use crate::value::Type;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedPolicy {
        code: Arc<CompiledCode>,
        calls: AtomicUsize,
    }
    impl TieringPolicy for FixedPolicy {
        fn consult(&self, _f: &WasmFunction, pc: u32) -> Option<Arc<CompiledCode>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if pc == 7 { Some(self.code.clone()) } else { None }
        }
    }

    #[test]
    fn tier_up_installs_compiled_entry_and_rewrites_slot() {
        let f = WasmFunction::new("loopy", Signature::new(vec![], vec![Type::I32]), Arc::new(|_stack, vs| {
            unsafe { vs.push(crate::value::Value::I32(1)) };
            None
        }));
        let compiled = Arc::new(CompiledCode {
            entry: Arc::new(|_stack, vs| {
                unsafe { vs.push(crate::value::Value::I32(2)) };
                None
            }),
            osr_points: vec![OsrPoint { wasm_pc: 7, code_offset: 0x1234 }],
        });
        let gate = TierUpGate::new(Arc::new(FixedPolicy { code: compiled, calls: AtomicUsize::new(0) }));

        let mut slot = 0usize;
        assert!(!gate.tier_up(&f, 3, Some(&mut slot)));
        assert_eq!(slot, 0);

        assert!(gate.tier_up(&f, 7, Some(&mut slot)));
        assert_eq!(slot, 0x1234);
        assert!(f.decl().compiled.lock().unwrap().is_some());
    }

    #[test]
    fn disabled_gate_is_always_a_no_op() {
        let f = WasmFunction::new("f", Signature::new(vec![], vec![]), Arc::new(|_stack, _vs| None));
        let gate = TierUpGate::disabled();
        assert!(!gate.tier_up(&f, 0, None));
    }
}
