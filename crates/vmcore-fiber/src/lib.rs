//! Guarded native stack mappings and the raw context-switch primitive used
//! by `vmcore`'s stack-switching machinery.
//!
//! This crate owns exactly two things: the memory (`StackMapping`) and the
//! machine-level register swap (`switch`). Everything about *what* runs on
//! the stack — value-stack layout, frame shape, dispatcher reentry — is a
//! `vmcore` concern.

use std::ops::Range;
use std::ptr::NonNull;

mod platform;

pub use platform::page_size;

/// Guard/red zone size. One page is enough to reliably trip a protection
/// fault on the first overflowing access; the signal handler (external to
/// this crate) is responsible for turning that into `STACK_OVERFLOW`.
pub fn red_zone_size() -> usize {
    page_size()
}

#[derive(Debug, thiserror::Error)]
pub enum FiberError {
    #[error("failed to reserve {0} bytes for a stack mapping")]
    Reserve(usize),
    #[error("failed to protect the guard page of a stack mapping")]
    Protect,
}

/// An anonymous, guarded virtual memory region backing one [`StackObject`].
///
/// Layout (addresses increasing downward in this diagram, matching the
/// value stack growing up from `range.start` and the native stack growing
/// down from `range.end`):
///
/// ```text
/// range.start                                               range.end
///     |-- red zone --|-- value stack grows up --> <-- native stack --|-- red zone --|
/// ```
///
/// Both red zones are a single no-access page; the value stack would have
/// to underflow (impossible by construction) or the native stack overflow
/// downward past `range.start + page_size` to hit the low one, and the
/// value stack would have to grow past `range.end - 2*page_size` to hit the
/// high one, colliding with the native stack's own guard first.
pub struct StackMapping {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for StackMapping {}
unsafe impl Sync for StackMapping {}

impl StackMapping {
    /// Reserves `size` bytes (rounded up to a whole number of pages, with a
    /// minimum of `4 * page_size` so both guard pages and some usable space
    /// always fit) and marks the low page and the page at `size -
    /// 2*page_size` as no-access.
    pub fn new(size: usize) -> Result<Self, FiberError> {
        let page = page_size();
        let min = page.checked_mul(4).expect("page size overflow");
        let len = size.max(min).next_multiple_of(page);

        let base = platform::reserve(len).ok_or(FiberError::Reserve(len))?;

        unsafe {
            platform::protect_none(base.as_ptr(), page).map_err(|_| FiberError::Protect)?;
            let high_guard = base.as_ptr().add(len - 2 * page);
            platform::protect_none(high_guard, page).map_err(|_| FiberError::Protect)?;
        }

        log::debug!("vmcore-fiber: mapped {len} byte stack at {base:p}", base = base.as_ptr());
        Ok(StackMapping { base, len })
    }

    /// The addressable range of this mapping, including both guard pages
    /// (callers must not dereference inside them).
    pub fn range(&self) -> Range<usize> {
        let start = self.base.as_ptr() as usize;
        start..start + self.len
    }

    pub fn guard_page_size(&self) -> usize {
        page_size()
    }
}

impl Drop for StackMapping {
    fn drop(&mut self) {
        unsafe { platform::release(self.base.as_ptr(), self.len) }
    }
}

unsafe extern "C" {
    /// Saves callee-saved registers and the post-save `rsp` into
    /// `*save_rsp`, then restores the callee-saved registers found at
    /// `new_rsp` and jumps to the return address stored just above them.
    fn vmcore_fiber_switch(save_rsp: *mut *mut u8, new_rsp: *mut u8);
}

/// Switches the machine's native stack pointer from whatever it is now to
/// `new_rsp`, stashing the pre-switch value (after this routine's own
/// register save) into `*save_rsp`. Does not return until some other call
/// to [`switch`] targets `*save_rsp` again.
///
/// # Safety
/// `new_rsp` must point into a region previously initialized either by a
/// prior `switch` call that target it, or by [`prepare_entry_frame`].
pub unsafe fn switch(save_rsp: *mut *mut u8, new_rsp: *mut u8) {
    unsafe { vmcore_fiber_switch(save_rsp, new_rsp) }
}

/// Writes a synthetic register-save frame at the bottom of a fresh native
/// stack region (the lowest address of the downward-growing native stack)
/// so that the first [`switch`] into it "returns" into `entry`.
///
/// Returns the `rsp` value callers should store for this stack: the address
/// of the synthetic frame, i.e. what `switch`'s `new_rsp` parameter expects.
///
/// # Safety
/// `top` must be a writable native-stack address with at least 7 pointers
/// of space below it still inside the mapping.
pub unsafe fn prepare_entry_frame(top: *mut u8, entry: extern "C" fn()) -> *mut u8 {
    const SAVED_REGS: usize = 6; // rbp, rbx, r12, r13, r14, r15
    let ptr_size = std::mem::size_of::<usize>();
    let frame = unsafe { top.sub((SAVED_REGS + 1) * ptr_size) };
    unsafe {
        for i in 0..SAVED_REGS {
            (frame.add(i * ptr_size) as *mut usize).write(0);
        }
        (frame.add(SAVED_REGS * ptr_size) as *mut usize).write(entry as usize);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_rounds_up_to_page_multiple_and_reserves_two_guards() {
        let page = page_size();
        let m = StackMapping::new(17).unwrap();
        let len = m.range().end - m.range().start;
        assert_eq!(len % page, 0);
        assert!(len >= 4 * page);
    }
}
