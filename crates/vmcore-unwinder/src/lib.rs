//! Mechanics of walking a chain of native stack frames: classifying a
//! return address by which code region it falls in, and stepping to the
//! caller. Interpreting what lives *inside* a frame (locals, the boxed
//! `WasmFunction` pointer, the current `pc`) is `vmcore`'s job — this crate
//! only knows how frames are found and chained.

use std::ops::Range;

/// What kind of code a return address falls inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Interpreter,
    Spc,
    /// One of the stack-switch stubs (`resume`, `enter-func`,
    /// `return-to-parent`). `frame_size` is how many bytes the walker must
    /// skip to reach the next real frame, since stub frames don't follow
    /// the interpreter/SPC frame-offset contract.
    StackStub {
        name: &'static str,
        frame_size: usize,
    },
}

#[derive(Debug, Clone)]
struct Region {
    range: Range<usize>,
    kind: RegionKind,
}

/// A sorted-by-start map from instruction-pointer ranges to code regions.
/// Populated once per engine (interpreter code is a single static range;
/// SPC and stub ranges are added/removed as code is compiled/freed).
#[derive(Debug, Default, Clone)]
pub struct CodeRegistry {
    regions: Vec<Region>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        CodeRegistry { regions: Vec::new() }
    }

    pub fn register(&mut self, range: Range<usize>, kind: RegionKind) {
        debug_assert!(range.start < range.end);
        let idx = self
            .regions
            .partition_point(|r| r.range.start < range.start);
        self.regions.insert(idx, Region { range, kind });
    }

    /// Removes the region previously registered with the given start
    /// address, if any. Used when SPC code is freed.
    pub fn unregister(&mut self, start: usize) {
        self.regions.retain(|r| r.range.start != start);
    }

    pub fn lookup(&self, pc: usize) -> Option<RegionKind> {
        let idx = self
            .regions
            .partition_point(|r| r.range.start <= pc)
            .checked_sub(1)?;
        let region = &self.regions[idx];
        if region.range.contains(&pc) {
            Some(region.kind)
        } else {
            None
        }
    }
}

/// Reads the return address a native `call` instruction pushed just below
/// `sp`, per the platform calling convention (x86-64: `*(sp - 8)`).
///
/// # Safety
/// `sp` must be a live, readable native stack pointer with at least one
/// pointer-width word below it.
pub unsafe fn return_address(sp: *const u8) -> usize {
    let slot = unsafe { sp.sub(std::mem::size_of::<usize>()) } as *const usize;
    unsafe { slot.read() }
}

/// Steps from `sp` to the caller's stack pointer, given the current frame's
/// total size in bytes (return address included). Frame sizes for
/// interpreter/SPC frames come from the frame-offset contract `vmcore`
/// maintains; stub frame sizes come from [`RegionKind::StackStub`].
///
/// # Safety
/// `sp` must be a live native stack pointer and `frame_size` must not walk
/// past the top of the owning [`vmcore_fiber::StackMapping`].
pub unsafe fn caller_sp(sp: *const u8, frame_size: usize) -> *const u8 {
    unsafe { sp.add(frame_size) }
}

/// The outcome of walking one step up the native stack from a `TargetFrame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Caller is itself Wasm code (interpreter or SPC); walking may continue.
    Wasm { sp: usize, pc: usize, region: RegionKind },
    /// Caller is one of the stack-switch stubs; the walker should transparently
    /// skip over it using `RegionKind::StackStub::frame_size`.
    Stub { sp: usize, name: &'static str },
    /// Caller is non-Wasm (host) code, or there is no caller (stack bottom).
    Host,
}

/// Classifies the frame whose return address lives just below `sp`, without
/// knowing anything about frame-internal layout beyond the region it falls
/// in. `vmcore`'s `TargetFrame` wraps this to add `function()`/`pc()`
/// accessors.
///
/// # Safety
/// `sp` must be a live native stack pointer with the contract described on
/// [`return_address`].
pub unsafe fn step(registry: &CodeRegistry, sp: *const u8) -> StepResult {
    let ra = unsafe { return_address(sp) };
    match registry.lookup(ra) {
        Some(RegionKind::Interpreter) => StepResult::Wasm {
            sp: sp as usize,
            pc: ra,
            region: RegionKind::Interpreter,
        },
        Some(RegionKind::Spc) => StepResult::Wasm {
            sp: sp as usize,
            pc: ra,
            region: RegionKind::Spc,
        },
        Some(RegionKind::StackStub { name, .. }) => StepResult::Stub {
            sp: sp as usize,
            name,
        },
        None => StepResult::Host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_containing_region_and_rejects_gaps() {
        let mut reg = CodeRegistry::new();
        reg.register(0x1000..0x2000, RegionKind::Interpreter);
        reg.register(0x3000..0x4000, RegionKind::Spc);

        assert_eq!(reg.lookup(0x1500), Some(RegionKind::Interpreter));
        assert_eq!(reg.lookup(0x3999), Some(RegionKind::Spc));
        assert_eq!(reg.lookup(0x2500), None);
        assert_eq!(reg.lookup(0x5000), None);
    }

    #[test]
    fn unregister_removes_freed_spc_code() {
        let mut reg = CodeRegistry::new();
        reg.register(0x1000..0x2000, RegionKind::Spc);
        reg.unregister(0x1000);
        assert_eq!(reg.lookup(0x1500), None);
    }
}
