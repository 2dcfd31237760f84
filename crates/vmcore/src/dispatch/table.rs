//! `TABLE_GET`/`TABLE_SET`/`TABLE_INIT`/`TABLE_COPY`/`TABLE_GROW`/`TABLE_FILL`
//! (spec §4.3).

use crate::instance::Instance;
use crate::trap::TrapReason;
use crate::value::Value;

pub fn get(instance: &Instance, table_index: u32, index: u32) -> Result<Value, TrapReason> {
    instance.tables[table_index as usize].borrow().get(index).ok_or(TrapReason::TableOob)
}

pub fn set(instance: &Instance, table_index: u32, index: u32, value: Value) -> Result<(), TrapReason> {
    if instance.tables[table_index as usize].borrow_mut().set(index, value) {
        Ok(())
    } else {
        Err(TrapReason::TableOob)
    }
}

pub fn grow(instance: &Instance, table_index: u32, delta: u32, init: Value) -> i64 {
    match instance.tables[table_index as usize].borrow_mut().grow(delta, init) {
        Some(old) => old as i64,
        None => -1,
    }
}

pub fn fill(instance: &Instance, table_index: u32, dst: u32, value: Value, len: u32) -> Result<(), TrapReason> {
    if instance.tables[table_index as usize].borrow_mut().fill(dst, value, len) {
        Ok(())
    } else {
        Err(TrapReason::TableOob)
    }
}

pub fn copy(instance: &Instance, dst_table: u32, src_table: u32, dst: u32, src: u32, len: u32) -> Result<(), TrapReason> {
    if dst_table == src_table {
        if instance.tables[dst_table as usize].borrow_mut().copy_within(dst, src, len) {
            return Ok(());
        }
        return Err(TrapReason::TableOob);
    }
    let values: Vec<Value> = {
        let src_table = instance.tables[src_table as usize].borrow();
        (src..src.checked_add(len).ok_or(TrapReason::TableOob)?)
            .map(|i| src_table.get(i).ok_or(TrapReason::TableOob))
            .collect::<Result<_, _>>()?
    };
    let mut dst_table = instance.tables[dst_table as usize].borrow_mut();
    for (i, v) in values.into_iter().enumerate() {
        if !dst_table.set(dst + i as u32, v) {
            return Err(TrapReason::TableOob);
        }
    }
    Ok(())
}

/// `table.init`: copies from a passive element segment, trapping if it was
/// dropped.
pub fn init(
    instance: &Instance,
    table_index: u32,
    elem_index: u32,
    dst: u32,
    src: u32,
    len: u32,
) -> Result<(), TrapReason> {
    if instance.dropped_elems.borrow().contains(&elem_index) {
        return Err(TrapReason::TableOob);
    }
    let segment = &instance.module.elems[elem_index as usize];
    if instance.tables[table_index as usize].borrow_mut().init(dst, segment, src, len) {
        Ok(())
    } else {
        Err(TrapReason::TableOob)
    }
}

pub fn elem_drop(instance: &Instance, elem_index: u32) {
    instance.dropped_elems.borrow_mut().insert(elem_index);
}
