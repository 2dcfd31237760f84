//! The GC-proposal opcodes (spec §4.4): `STRUCT_NEW[_DEFAULT]`/
//! `STRUCT_GET[S|U]`/`STRUCT_SET` and their `ARRAY_*` counterparts, including
//! the passive-segment constructors `ARRAY_NEW_DATA`/`ARRAY_NEW_ELEM` and
//! `ARRAY_INIT_DATA`/`ARRAY_INIT_ELEM`.

use crate::gc_heap::{FieldType, HeapArray, HeapStruct, HeapTypeDecl, MAX_ARRAY_LENGTH};
use crate::instance::Instance;
use crate::trap::TrapReason;
use crate::value::{GcRef, Value};

fn struct_decl<'a>(instance: &'a Instance, type_index: u32) -> &'a crate::gc_heap::StructDecl {
    match &instance.heaptypes[type_index as usize] {
        HeapTypeDecl::Struct(s) => s,
        HeapTypeDecl::Array(_) => panic!("type index {type_index} is not a struct type"),
    }
}

fn array_decl(instance: &Instance, type_index: u32) -> &crate::gc_heap::ArrayDecl {
    match &instance.heaptypes[type_index as usize] {
        HeapTypeDecl::Array(a) => a,
        HeapTypeDecl::Struct(_) => panic!("type index {type_index} is not an array type"),
    }
}

fn default_value(field: FieldType) -> Value {
    match field {
        FieldType::I32 | FieldType::PackedI8 | FieldType::PackedI16 => Value::I32(0),
        FieldType::I64 => Value::I64(0),
        FieldType::F32 => Value::F32(0),
        FieldType::F64 => Value::F64(0),
        FieldType::V128 => Value::V128(0, 0),
        FieldType::Ref => Value::Ref(None),
    }
}

pub fn struct_new(instance: &Instance, type_index: u32, fields: Vec<Value>) -> GcRef {
    debug_assert_eq!(fields.len(), struct_decl(instance, type_index).fields.len());
    HeapStruct::alloc(type_index, fields)
}

pub fn struct_new_default(instance: &Instance, type_index: u32) -> GcRef {
    let fields = struct_decl(instance, type_index).fields.iter().map(|f| default_value(*f)).collect();
    HeapStruct::alloc(type_index, fields)
}

fn null_check(r: Option<GcRef>) -> Result<GcRef, TrapReason> {
    r.ok_or(TrapReason::NullDeref)
}

/// Sign- or zero-extends a packed field's stored low bits to a full 32-bit
/// word. Only meaningful for `PackedI8`/`PackedI16`; any other field type
/// is a module-validation bug (the unpacked `GET` opcode exists for those).
fn extend_packed(stored: u32, field: FieldType, signed: bool) -> u32 {
    match field {
        FieldType::PackedI8 => {
            let byte = stored as u8;
            if signed { byte as i8 as i32 as u32 } else { byte as u32 }
        }
        FieldType::PackedI16 => {
            let half = stored as u16;
            if signed { half as i16 as i32 as u32 } else { half as u32 }
        }
        other => panic!("field type {other:?} is not packed; use the unsuffixed accessor"),
    }
}

pub fn struct_get(r: Option<GcRef>, field_index: u32) -> Result<Value, TrapReason> {
    let s = unsafe { HeapStruct::from_ref(null_check(r)?) };
    s.fields.get(field_index as usize).copied().ok_or(TrapReason::ArrayIndexOob)
}

/// `STRUCT_GET_S`: reads a packed (`i8`/`i16`) field, sign-extended to the
/// slot width and re-pushed.
pub fn struct_get_s(instance: &Instance, r: Option<GcRef>, field_index: u32) -> Result<Value, TrapReason> {
    struct_get_packed(instance, r, field_index, true)
}

/// `STRUCT_GET_U`: like [`struct_get_s`], but zero-extended.
pub fn struct_get_u(instance: &Instance, r: Option<GcRef>, field_index: u32) -> Result<Value, TrapReason> {
    struct_get_packed(instance, r, field_index, false)
}

fn struct_get_packed(instance: &Instance, r: Option<GcRef>, field_index: u32, signed: bool) -> Result<Value, TrapReason> {
    let s = unsafe { HeapStruct::from_ref(null_check(r)?) };
    let field = struct_decl(instance, s.decl_index)
        .fields
        .get(field_index as usize)
        .copied()
        .ok_or(TrapReason::ArrayIndexOob)?;
    let Some(Value::I32(stored)) = s.fields.get(field_index as usize).copied() else {
        panic!("packed field storage must be an I32 slot");
    };
    Ok(Value::I32(extend_packed(stored, field, signed)))
}

pub fn struct_set(r: Option<GcRef>, field_index: u32, value: Value) -> Result<(), TrapReason> {
    let s = unsafe { HeapStruct::from_ref_mut(null_check(r)?) };
    match s.fields.get_mut(field_index as usize) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(TrapReason::ArrayIndexOob),
    }
}

pub fn array_new(instance: &Instance, type_index: u32, init: Value, len: u32) -> Result<GcRef, TrapReason> {
    let _ = array_decl(instance, type_index);
    if len > MAX_ARRAY_LENGTH {
        return Err(TrapReason::Oom);
    }
    Ok(HeapArray::alloc(type_index, vec![init; len as usize]))
}

pub fn array_new_default(instance: &Instance, type_index: u32, len: u32) -> Result<GcRef, TrapReason> {
    let elem = array_decl(instance, type_index).elem;
    if len > MAX_ARRAY_LENGTH {
        return Err(TrapReason::Oom);
    }
    Ok(HeapArray::alloc(type_index, vec![default_value(elem); len as usize]))
}

pub fn array_new_fixed(instance: &Instance, type_index: u32, elems: Vec<Value>) -> Result<GcRef, TrapReason> {
    let _ = array_decl(instance, type_index);
    if elems.len() as u32 > MAX_ARRAY_LENGTH {
        return Err(TrapReason::Oom);
    }
    Ok(HeapArray::alloc(type_index, elems))
}

/// Byte width of one element when reading/writing raw bytes from a passive
/// data segment (`ARRAY_NEW_DATA`/`ARRAY_INIT_DATA`). `Ref` has no byte
/// encoding; module validation rejects it for those opcodes before this
/// ever runs.
fn field_byte_width(field: FieldType) -> usize {
    match field {
        FieldType::PackedI8 => 1,
        FieldType::PackedI16 => 2,
        FieldType::I32 | FieldType::F32 => 4,
        FieldType::I64 | FieldType::F64 => 8,
        FieldType::V128 => 16,
        FieldType::Ref => panic!("array.new_data/init_data require a numeric or packed element type"),
    }
}

/// Decodes one little-endian element of `field`'s type out of `bytes`
/// (exactly `field_byte_width(field)` long).
fn decode_field_bytes(field: FieldType, bytes: &[u8]) -> Value {
    match field {
        FieldType::PackedI8 => Value::I32(bytes[0] as u32),
        FieldType::PackedI16 => Value::I32(u16::from_le_bytes([bytes[0], bytes[1]]) as u32),
        FieldType::I32 => Value::I32(u32::from_le_bytes(bytes[..4].try_into().unwrap())),
        FieldType::F32 => Value::F32(u32::from_le_bytes(bytes[..4].try_into().unwrap())),
        FieldType::I64 => Value::I64(u64::from_le_bytes(bytes[..8].try_into().unwrap())),
        FieldType::F64 => Value::F64(u64::from_le_bytes(bytes[..8].try_into().unwrap())),
        FieldType::V128 => {
            let lo = u64::from_le_bytes(bytes[..8].try_into().unwrap());
            let hi = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
            Value::V128(lo, hi)
        }
        FieldType::Ref => unreachable!("checked by field_byte_width"),
    }
}

/// `ARRAY_NEW_DATA`: allocates a `len`-element array, decoding each element
/// from `len * byte_width` bytes starting at byte offset `src` in a passive
/// data segment. Traps `MEMORY_OOB` if the segment was dropped or the byte
/// range runs past its end; `OOM` if `len` exceeds the array length bound.
pub fn array_new_data(instance: &Instance, type_index: u32, data_index: u32, src: u32, len: u32) -> Result<GcRef, TrapReason> {
    if len > MAX_ARRAY_LENGTH {
        return Err(TrapReason::Oom);
    }
    let elem = array_decl(instance, type_index).elem;
    let width = field_byte_width(elem);

    if instance.dropped_data.borrow().contains(&data_index) {
        return Err(TrapReason::MemoryOob);
    }
    let segment = &instance.module.data[data_index as usize];
    let nbytes = (len as usize).checked_mul(width).ok_or(TrapReason::MemoryOob)?;
    let end = (src as u64).checked_add(nbytes as u64).filter(|&e| e <= segment.len() as u64).ok_or(TrapReason::MemoryOob)?;
    let bytes = &segment[src as usize..end as usize];

    let elems = bytes.chunks_exact(width).map(|chunk| decode_field_bytes(elem, chunk)).collect();
    Ok(HeapArray::alloc(type_index, elems))
}

/// `ARRAY_NEW_ELEM`: allocates a `len`-element array, copying values
/// directly from a passive element segment starting at element index `src`.
pub fn array_new_elem(instance: &Instance, type_index: u32, elem_index: u32, src: u32, len: u32) -> Result<GcRef, TrapReason> {
    if len > MAX_ARRAY_LENGTH {
        return Err(TrapReason::Oom);
    }
    let _ = array_decl(instance, type_index);
    if instance.dropped_elems.borrow().contains(&elem_index) {
        return Err(TrapReason::ArrayIndexOob);
    }
    let segment = &instance.module.elems[elem_index as usize];
    let end = src.checked_add(len).filter(|&e| e as usize <= segment.len()).ok_or(TrapReason::ArrayIndexOob)?;
    Ok(HeapArray::alloc(type_index, segment[src as usize..end as usize].to_vec()))
}

pub fn array_len(r: Option<GcRef>) -> Result<u32, TrapReason> {
    let a = unsafe { HeapArray::from_ref(null_check(r)?) };
    Ok(a.elems.len() as u32)
}

pub fn array_get(r: Option<GcRef>, index: u32) -> Result<Value, TrapReason> {
    let a = unsafe { HeapArray::from_ref(null_check(r)?) };
    a.elems.get(index as usize).copied().ok_or(TrapReason::ArrayIndexOob)
}

/// `ARRAY_GET_S`: reads a packed (`i8`/`i16`) element, sign-extended.
pub fn array_get_s(instance: &Instance, r: Option<GcRef>, index: u32) -> Result<Value, TrapReason> {
    array_get_packed(instance, r, index, true)
}

/// `ARRAY_GET_U`: like [`array_get_s`], but zero-extended.
pub fn array_get_u(instance: &Instance, r: Option<GcRef>, index: u32) -> Result<Value, TrapReason> {
    array_get_packed(instance, r, index, false)
}

fn array_get_packed(instance: &Instance, r: Option<GcRef>, index: u32, signed: bool) -> Result<Value, TrapReason> {
    let a = unsafe { HeapArray::from_ref(null_check(r)?) };
    let elem = array_decl(instance, a.decl_index).elem;
    let Value::I32(stored) = a.elems.get(index as usize).copied().ok_or(TrapReason::ArrayIndexOob)? else {
        panic!("packed element storage must be an I32 slot");
    };
    Ok(Value::I32(extend_packed(stored, elem, signed)))
}

pub fn array_set(r: Option<GcRef>, index: u32, value: Value) -> Result<(), TrapReason> {
    let a = unsafe { HeapArray::from_ref_mut(null_check(r)?) };
    match a.elems.get_mut(index as usize) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(TrapReason::ArrayIndexOob),
    }
}

pub fn array_fill(r: Option<GcRef>, dst: u32, value: Value, len: u32) -> Result<(), TrapReason> {
    let a = unsafe { HeapArray::from_ref_mut(null_check(r)?) };
    let end = dst.checked_add(len).filter(|&e| e as usize <= a.elems.len()).ok_or(TrapReason::ArrayIndexOob)?;
    a.elems[dst as usize..end as usize].fill(value);
    Ok(())
}

pub fn array_copy(dst: Option<GcRef>, dst_index: u32, src: Option<GcRef>, src_index: u32, len: u32) -> Result<(), TrapReason> {
    let src_elems = {
        let src = unsafe { HeapArray::from_ref(null_check(src)?) };
        let end = src_index.checked_add(len).filter(|&e| e as usize <= src.elems.len()).ok_or(TrapReason::ArrayIndexOob)?;
        src.elems[src_index as usize..end as usize].to_vec()
    };
    let dst = unsafe { HeapArray::from_ref_mut(null_check(dst)?) };
    let end = dst_index.checked_add(len).filter(|&e| e as usize <= dst.elems.len()).ok_or(TrapReason::ArrayIndexOob)?;
    dst.elems[dst_index as usize..end as usize].copy_from_slice(&src_elems);
    Ok(())
}

pub fn array_init_elem(
    instance: &Instance,
    r: Option<GcRef>,
    dst: u32,
    elem_index: u32,
    src: u32,
    len: u32,
) -> Result<(), TrapReason> {
    if instance.dropped_elems.borrow().contains(&elem_index) {
        return Err(TrapReason::ArrayIndexOob);
    }
    let segment = &instance.module.elems[elem_index as usize];
    let end = src.checked_add(len).filter(|&e| e as usize <= segment.len()).ok_or(TrapReason::ArrayIndexOob)?;
    let values = segment[src as usize..end as usize].to_vec();
    let a = unsafe { HeapArray::from_ref_mut(null_check(r)?) };
    let dst_end = dst.checked_add(len).filter(|&e| e as usize <= a.elems.len()).ok_or(TrapReason::ArrayIndexOob)?;
    a.elems[dst as usize..dst_end as usize].copy_from_slice(&values);
    Ok(())
}

/// `ARRAY_INIT_DATA`: like [`array_init_elem`], but the source is a passive
/// data segment decoded per the array's element byte width, mirroring
/// `memory::init`'s dropped-segment and bounds-check treatment.
pub fn array_init_data(
    instance: &Instance,
    r: Option<GcRef>,
    dst: u32,
    data_index: u32,
    src: u32,
    len: u32,
) -> Result<(), TrapReason> {
    let a = unsafe { HeapArray::from_ref_mut(null_check(r)?) };
    let elem = array_decl(instance, a.decl_index).elem;
    let width = field_byte_width(elem);

    if instance.dropped_data.borrow().contains(&data_index) {
        return Err(TrapReason::MemoryOob);
    }
    let segment = &instance.module.data[data_index as usize];
    let nbytes = (len as usize).checked_mul(width).ok_or(TrapReason::MemoryOob)?;
    let end = (src as u64).checked_add(nbytes as u64).filter(|&e| e <= segment.len() as u64).ok_or(TrapReason::MemoryOob)?;
    let bytes = &segment[src as usize..end as usize];
    let values: Vec<Value> = bytes.chunks_exact(width).map(|chunk| decode_field_bytes(elem, chunk)).collect();

    let dst_end = dst.checked_add(len).filter(|&e| e as usize <= a.elems.len()).ok_or(TrapReason::ArrayIndexOob)?;
    a.elems[dst as usize..dst_end as usize].copy_from_slice(&values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc_heap::{ArrayDecl, StructDecl};
    use crate::instance::{GlobalVar, Memory, ModuleData, Table};

    // Heap type indices used throughout: 0 = struct {i32, ref}, 1 = array<i32>,
    // 2 = array<packed i8>, 3 = struct {packed i8, packed i16}.
    fn instance_with_types() -> Instance {
        Instance::new(
            Vec::<Memory>::new(),
            Vec::<Table>::new(),
            Vec::<GlobalVar>::new(),
            vec![
                HeapTypeDecl::Struct(StructDecl { fields: vec![FieldType::I32, FieldType::Ref] }),
                HeapTypeDecl::Array(ArrayDecl { elem: FieldType::I32 }),
                HeapTypeDecl::Array(ArrayDecl { elem: FieldType::PackedI8 }),
                HeapTypeDecl::Struct(StructDecl { fields: vec![FieldType::PackedI8, FieldType::PackedI16] }),
            ],
            ModuleData::default(),
        )
    }

    #[test]
    fn struct_field_round_trip() {
        let inst = instance_with_types();
        let r = struct_new(&inst, 0, vec![Value::I32(1), Value::Ref(None)]);
        assert_eq!(struct_get(Some(r), 0), Ok(Value::I32(1)));
        struct_set(Some(r), 0, Value::I32(9)).unwrap();
        assert_eq!(struct_get(Some(r), 0), Ok(Value::I32(9)));
    }

    #[test]
    fn null_struct_get_traps() {
        assert_eq!(struct_get(None, 0), Err(TrapReason::NullDeref));
    }

    #[test]
    fn array_oob_index_traps() {
        let inst = instance_with_types();
        let r = array_new(&inst, 1, Value::I32(0), 4).unwrap();
        assert_eq!(array_get(Some(r), 10), Err(TrapReason::ArrayIndexOob));
        assert_eq!(array_len(Some(r)), Ok(4));
    }

    #[test]
    fn array_new_past_the_length_bound_traps_oom() {
        let inst = instance_with_types();
        assert_eq!(array_new(&inst, 1, Value::I32(0), MAX_ARRAY_LENGTH + 1), Err(TrapReason::Oom));
        assert_eq!(array_new_default(&inst, 1, MAX_ARRAY_LENGTH + 1), Err(TrapReason::Oom));
        let elems = vec![Value::I32(0); (MAX_ARRAY_LENGTH + 1) as usize];
        assert_eq!(array_new_fixed(&inst, 1, elems).unwrap_err(), TrapReason::Oom);
    }

    #[test]
    fn struct_packed_fields_sign_and_zero_extend_on_read() {
        let inst = instance_with_types();
        // 0xFF as i8 is -1 (sign-extended) or 255 (zero-extended).
        let r = struct_new(&inst, 3, vec![Value::I32(0xFF), Value::I32(0xFFFF)]);
        assert_eq!(struct_get_s(&inst, Some(r), 0), Ok(Value::I32(0xFFFF_FFFF)));
        assert_eq!(struct_get_u(&inst, Some(r), 0), Ok(Value::I32(0xFF)));
        assert_eq!(struct_get_s(&inst, Some(r), 1), Ok(Value::I32(0xFFFF_FFFF)));
        assert_eq!(struct_get_u(&inst, Some(r), 1), Ok(Value::I32(0xFFFF)));
    }

    #[test]
    fn array_packed_elements_sign_and_zero_extend_on_read() {
        let inst = instance_with_types();
        let r = array_new(&inst, 2, Value::I32(0x80), 2).unwrap();
        assert_eq!(array_get_s(&inst, Some(r), 0), Ok(Value::I32(0xFFFF_FF80)));
        assert_eq!(array_get_u(&inst, Some(r), 0), Ok(Value::I32(0x80)));
    }

    #[test]
    fn array_new_data_decodes_little_endian_elements_from_a_segment() {
        let mut inst = instance_with_types();
        inst.module.data.push(vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
        let r = array_new_data(&inst, 1, 0, 0, 3).unwrap();
        assert_eq!(array_len(Some(r)), Ok(3));
        assert_eq!(array_get(Some(r), 0), Ok(Value::I32(1)));
        assert_eq!(array_get(Some(r), 2), Ok(Value::I32(3)));
    }

    #[test]
    fn array_new_data_traps_on_a_dropped_or_out_of_range_segment() {
        let mut inst = instance_with_types();
        inst.module.data.push(vec![1, 0, 0, 0]);
        assert_eq!(array_new_data(&inst, 1, 0, 0, 2).unwrap_err(), TrapReason::MemoryOob);
        crate::dispatch::memory::data_drop(&inst, 0);
        assert_eq!(array_new_data(&inst, 1, 0, 0, 1).unwrap_err(), TrapReason::MemoryOob);
    }

    #[test]
    fn array_new_elem_copies_values_from_a_segment() {
        let mut inst = instance_with_types();
        inst.module.elems.push(vec![Value::I32(7), Value::I32(8), Value::I32(9)]);
        let r = array_new_elem(&inst, 1, 0, 1, 2).unwrap();
        assert_eq!(array_len(Some(r)), Ok(2));
        assert_eq!(array_get(Some(r), 0), Ok(Value::I32(8)));
    }

    #[test]
    fn array_init_data_overwrites_a_range_in_place() {
        let mut inst = instance_with_types();
        inst.module.data.push(vec![9, 0, 0, 0]);
        let r = array_new(&inst, 1, Value::I32(0), 2).unwrap();
        array_init_data(&inst, Some(r), 1, 0, 0, 1).unwrap();
        assert_eq!(array_get(Some(r), 0), Ok(Value::I32(0)));
        assert_eq!(array_get(Some(r), 1), Ok(Value::I32(9)));
    }
}
