//! `MEMORY_GROW`/`MEMORY_INIT`/`MEMORY_COPY`/`MEMORY_FILL` (spec §4.3).

use crate::instance::{Instance, WASM_PAGE_SIZE};
use crate::trap::TrapReason;

/// `memory.grow`: returns the previous size in pages, or `-1` (spec
/// convention: growth failure is a value, not a trap).
pub fn grow(instance: &Instance, memory_index: u32, delta_pages: u32) -> i64 {
    let mem = &instance.memories[memory_index as usize];
    match mem.borrow_mut().grow(delta_pages) {
        Some(old) => old as i64,
        None => -1,
    }
}

pub fn size(instance: &Instance, memory_index: u32) -> u32 {
    instance.memories[memory_index as usize].borrow().size_pages()
}

fn bounds_check(len: usize, offset: u32, n: u32) -> Result<std::ops::Range<usize>, TrapReason> {
    let end = (offset as u64).checked_add(n as u64).ok_or(TrapReason::MemoryOob)?;
    if end > len as u64 {
        return Err(TrapReason::MemoryOob);
    }
    Ok(offset as usize..end as usize)
}

/// `memory.fill`: writes `value` into `[dst, dst+len)`, trapping on OOB.
pub fn fill(instance: &Instance, memory_index: u32, dst: u32, value: u8, len: u32) -> Result<(), TrapReason> {
    let mem = &instance.memories[memory_index as usize];
    let mut mem = mem.borrow_mut();
    let range = bounds_check(mem.data().len(), dst, len)?;
    mem.data_mut()[range].fill(value);
    Ok(())
}

/// `memory.copy`: may overlap, so uses `copy_within` semantics.
pub fn copy(instance: &Instance, memory_index: u32, dst: u32, src: u32, len: u32) -> Result<(), TrapReason> {
    let mem = &instance.memories[memory_index as usize];
    let mut mem = mem.borrow_mut();
    let data_len = mem.data().len();
    bounds_check(data_len, dst, len)?;
    bounds_check(data_len, src, len)?;
    mem.data_mut().copy_within(src as usize..src as usize + len as usize, dst as usize);
    Ok(())
}

/// `memory.init`: copies from a passive data segment. Traps if the segment
/// was dropped (spec's "subsequent init of a dropped segment traps" rule).
pub fn init(
    instance: &Instance,
    memory_index: u32,
    data_index: u32,
    dst: u32,
    src: u32,
    len: u32,
) -> Result<(), TrapReason> {
    if instance.dropped_data.borrow().contains(&data_index) {
        return Err(TrapReason::MemoryOob);
    }
    let segment = &instance.module.data[data_index as usize];
    let src_range = bounds_check(segment.len(), src, len)?;

    let mem = &instance.memories[memory_index as usize];
    let mut mem = mem.borrow_mut();
    let dst_range = bounds_check(mem.data().len(), dst, len)?;
    mem.data_mut()[dst_range].copy_from_slice(&segment[src_range]);
    Ok(())
}

pub fn data_drop(instance: &Instance, data_index: u32) {
    instance.dropped_data.borrow_mut().insert(data_index);
}

pub const fn page_size() -> usize {
    WASM_PAGE_SIZE
}
