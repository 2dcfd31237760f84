//! `TargetFrame` and trap-trace capture (spec §4.6).
//!
//! `vmcore-unwinder` supplies the generic mechanics of classifying a raw
//! return address and stepping between native frames; it is used as-is for
//! the one place this crate has genuine, literal native frames to walk —
//! the stack-switch stub boundary (`crate::stack::switch`). Wasm-to-Wasm
//! call frames, however, are *not* literal raw machine frames here: this
//! crate's interpreter bodies are Rust closures rather than hand-decoded
//! bytecode (out of scope per spec §1), so there is no byte-addressable
//! `{saved_ra, wasm_func, func_decl, pc, locals...}` layout to read fields
//! out of directly. Each [`crate::stack::StackObject`] instead keeps an
//! explicit call-frame record that the dispatcher pushes/pops around every
//! Wasm call and updates on every `TRAP`/`PROBE_instr`/`PROBE_loop` — the
//! concrete data `TargetFrame` reads, standing in for what a real
//! hand-written interpreter's native frame would expose at the same fixed
//! offsets (spec §6's "Frame offset contract").

use std::cell::Cell;

use vmcore_unwinder::RegionKind;

use crate::function::WasmFunction;
use crate::trap::TraceFrame;

/// One recorded Wasm call-frame, pushed when the dispatcher enters a Wasm
/// function and popped when it returns.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub function: WasmFunction,
    pub pc: Cell<u32>,
    pub region: RegionKind,
}

impl FrameRecord {
    pub fn interpreter(function: WasmFunction) -> FrameRecord {
        FrameRecord { function, pc: Cell::new(0), region: RegionKind::Interpreter }
    }

    pub fn compiled(function: WasmFunction) -> FrameRecord {
        FrameRecord { function, pc: Cell::new(0), region: RegionKind::Spc }
    }

    pub fn set_pc(&self, pc: u32) {
        self.pc.set(pc);
    }
}

/// A read-only view over one recorded frame plus its ancestors, matching
/// the `function()`/`pc()`/`caller()` contract of spec §3's `TargetFrame`.
pub struct TargetFrame<'a> {
    frames: &'a [FrameRecord],
    index: usize,
}

pub enum Caller<'a> {
    Wasm(TargetFrame<'a>),
    Host,
    None,
}

impl<'a> TargetFrame<'a> {
    pub fn function(&self) -> &WasmFunction {
        &self.frames[self.index].function
    }

    pub fn pc(&self) -> u32 {
        self.frames[self.index].pc.get()
    }

    pub fn region(&self) -> RegionKind {
        self.frames[self.index].region
    }

    /// Walks to the enclosing frame. `frames[0]` is the outermost Wasm
    /// frame (the one the top-level `run()` call entered); its caller is
    /// either the host (if this activation's function was called directly
    /// by the host) or `None` (bottom of the chain).
    pub fn caller(&self) -> Caller<'a> {
        if self.index == 0 {
            Caller::Host
        } else {
            Caller::Wasm(TargetFrame { frames: self.frames, index: self.index - 1 })
        }
    }
}

/// Captures the innermost-first trace a trap attaches (spec testable
/// property 4: "the first element is the innermost frame").
pub fn capture_trace(frames: &[FrameRecord]) -> Vec<TraceFrame> {
    frames
        .iter()
        .rev()
        .map(|fr| TraceFrame { function: fr.function.clone(), pc: fr.pc.get() })
        .collect()
}

/// A lazily-created, memoized accessor for a frame's locals and operand
/// slots (spec's "frame accessor" glossary entry). Construction is cheap
/// here since there is no raw memory to decode; the type exists so callers
/// needing repeated typed access to the same frame don't re-derive it.
pub struct FrameAccessor<'a> {
    frame: TargetFrame<'a>,
}

impl<'a> FrameAccessor<'a> {
    pub fn new(frame: TargetFrame<'a>) -> FrameAccessor<'a> {
        FrameAccessor { frame }
    }

    pub fn function(&self) -> &WasmFunction {
        self.frame.function()
    }

    pub fn pc(&self) -> u32 {
        self.frame.pc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Signature;
    use std::sync::Arc;

    #[test]
    fn trace_is_innermost_first() {
        let outer = WasmFunction::new("outer", Signature::new(vec![], vec![]), Arc::new(|_stack, _vs| None));
        let inner = WasmFunction::new("inner", Signature::new(vec![], vec![]), Arc::new(|_stack, _vs| None));
        let frames = vec![FrameRecord::interpreter(outer.clone()), FrameRecord::interpreter(inner.clone())];
        frames[0].set_pc(1);
        frames[1].set_pc(2);

        let trace = capture_trace(&frames);
        assert_eq!(trace[0].function, inner);
        assert_eq!(trace[1].function, outer);
        assert_eq!(trace[0].pc, 2);
    }

    #[test]
    fn caller_walks_outward_to_host() {
        let f = WasmFunction::new("f", Signature::new(vec![], vec![]), Arc::new(|_stack, _vs| None));
        let frames = vec![FrameRecord::interpreter(f)];
        let top = TargetFrame { frames: &frames, index: 0 };
        assert!(matches!(top.caller(), Caller::Host));
    }
}
