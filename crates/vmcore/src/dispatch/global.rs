//! `GLOBAL_GET`/`GLOBAL_SET` (spec §4.3).

use crate::instance::Instance;
use crate::trap::InternalError;
use crate::value::Value;

pub fn get(instance: &Instance, global_index: u32) -> Value {
    instance.globals[global_index as usize].borrow().value
}

/// Writing an immutable global is a module-validation bug, not a Wasm trap
/// (the validator should have rejected it before this ever runs) — reported
/// as an [`InternalError`] to keep that distinction testable.
pub fn set(instance: &Instance, global_index: u32, value: Value) -> Result<(), InternalError> {
    let mut global = instance.globals[global_index as usize].borrow_mut();
    if !global.mutable {
        return Err(InternalError::MalformedConfig("write to an immutable global"));
    }
    global.value = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc_heap::HeapTypeDecl;
    use crate::instance::{GlobalVar, Memory, ModuleData, Table};

    fn instance_with_globals() -> Instance {
        Instance::new(
            Vec::<Memory>::new(),
            Vec::<Table>::new(),
            vec![
                GlobalVar { value: Value::I32(1), mutable: true },
                GlobalVar { value: Value::I32(2), mutable: false },
            ],
            Vec::<HeapTypeDecl>::new(),
            ModuleData::default(),
        )
    }

    #[test]
    fn mutable_global_round_trips() {
        let inst = instance_with_globals();
        set(&inst, 0, Value::I32(42)).unwrap();
        assert_eq!(get(&inst, 0), Value::I32(42));
    }

    #[test]
    fn immutable_global_write_is_internal_error() {
        let inst = instance_with_globals();
        assert!(set(&inst, 1, Value::I32(9)).is_err());
    }
}
