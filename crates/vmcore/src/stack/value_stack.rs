//! The typed, tag-per-slot operand stack (spec §4.1).

use smallvec::SmallVec;

use crate::trap::InternalError;
use crate::value::{GcRef, Type, TypeCode, Value, ValueRep};

/// A typed push/pop view over a contiguous byte range that grows upward
/// from `base`. Owns no memory itself — it is handed the value-stack
/// portion of a [`vmcore_fiber::StackMapping`] by [`StackObject`](super::StackObject).
pub struct ValueStack {
    rep: ValueRep,
    base: *mut u8,
    vsp: *mut u8,
    /// Exclusive upper bound of the region this `ValueStack` may write
    /// into; a fast-path sanity check, not the mechanism that catches
    /// genuine overflow (the mapping's guard page does that via a trap
    /// signal, external to this crate).
    soft_limit: *mut u8,
}

impl ValueStack {
    /// # Safety
    /// `[base, soft_limit)` must be writable memory exclusively owned by
    /// this `ValueStack` for its lifetime, and `soft_limit - base` must be
    /// a multiple of `rep.slot_size`.
    pub unsafe fn new(rep: ValueRep, base: *mut u8, soft_limit: *mut u8) -> ValueStack {
        ValueStack { rep, base, vsp: base, soft_limit }
    }

    pub fn vsp(&self) -> *mut u8 {
        self.vsp
    }

    /// # Safety
    /// `vsp` must be `base + k*slot_size` for some `k` with
    /// `base <= vsp <= soft_limit`, and the stack in between must already
    /// have been written by this `ValueStack` (used to restore `vsp` after
    /// a trap resets stack height, spec §7).
    pub unsafe fn set_vsp(&mut self, vsp: *mut u8) {
        self.vsp = vsp;
    }

    pub fn is_empty(&self) -> bool {
        self.vsp == self.base
    }

    pub fn len_slots(&self) -> usize {
        (self.vsp as usize - self.base as usize) / self.rep.slot_size
    }

    fn slot_tag_ptr(&self, slot: *mut u8) -> *mut u8 {
        slot
    }

    fn slot_payload_ptr(&self, slot: *mut u8) -> *mut u8 {
        unsafe { slot.add(self.rep.tag_size) }
    }

    fn write_tag(&self, slot: *mut u8, code: TypeCode) {
        if self.rep.tagged {
            unsafe { self.slot_tag_ptr(slot).write(code as u8) };
        }
    }

    fn read_tag(&self, slot: *mut u8) -> Option<TypeCode> {
        if !self.rep.tagged {
            return None;
        }
        let byte = unsafe { self.slot_tag_ptr(slot).read() };
        TypeCode::from_masked_byte(byte)
    }

    fn write_u64(&self, slot: *mut u8, offset: usize, v: u64) {
        unsafe { (self.slot_payload_ptr(slot).add(offset) as *mut u64).write_unaligned(v) };
    }

    fn read_u64(&self, slot: *mut u8, offset: usize) -> u64 {
        unsafe { (self.slot_payload_ptr(slot).add(offset) as *const u64).read_unaligned() }
    }

    /// Writes `v` at `vsp` and advances it by one slot.
    ///
    /// # Safety
    /// There must be at least one free slot before `soft_limit`.
    pub unsafe fn push(&mut self, v: Value) {
        debug_assert!(unsafe { self.vsp.add(self.rep.slot_size) } <= self.soft_limit, "value stack overflow");
        let slot = self.vsp;
        match v {
            Value::I32(x) => {
                self.write_tag(slot, TypeCode::I32);
                self.write_u64(slot, 0, x as u64);
            }
            Value::I64(x) => {
                self.write_tag(slot, TypeCode::I64);
                self.write_u64(slot, 0, x);
            }
            Value::F32(bits) => {
                self.write_tag(slot, TypeCode::F32);
                self.write_u64(slot, 0, bits as u64);
            }
            Value::F64(bits) => {
                self.write_tag(slot, TypeCode::F64);
                self.write_u64(slot, 0, bits);
            }
            Value::V128(lo, hi) => {
                self.write_tag(slot, TypeCode::V128);
                self.write_u64(slot, 0, lo);
                self.write_u64(slot, 8, hi);
            }
            Value::I31(x) => {
                self.write_tag(slot, TypeCode::I31Ref);
                self.write_u64(slot, 0, ((x as u64) << 1) | 1);
            }
            Value::Ref(None) => {
                self.write_tag(slot, TypeCode::RefNull);
                self.write_u64(slot, 0, 0);
            }
            Value::Ref(Some(r)) => {
                self.write_tag(slot, TypeCode::Ref);
                self.write_u64(slot, 0, r.as_ptr() as u64);
            }
        }
        self.vsp = unsafe { self.vsp.add(self.rep.slot_size) };
    }

    fn decode_at(&self, slot: *mut u8, tag: Option<TypeCode>) -> Value {
        match tag {
            Some(TypeCode::I32) => Value::I32(self.read_u64(slot, 0) as u32),
            Some(TypeCode::I64) => Value::I64(self.read_u64(slot, 0)),
            Some(TypeCode::F32) => Value::F32(self.read_u64(slot, 0) as u32),
            Some(TypeCode::F64) => Value::F64(self.read_u64(slot, 0)),
            Some(TypeCode::V128) => Value::V128(self.read_u64(slot, 0), self.read_u64(slot, 8)),
            Some(TypeCode::I31Ref) => Value::I31(((self.read_u64(slot, 0)) >> 1) as u32),
            Some(code) if code.is_reference_group() => {
                let bits = self.read_u64(slot, 0);
                if bits == 0 {
                    Value::Ref(None)
                } else if bits & 1 != 0 {
                    Value::I31(((bits) >> 1) as u32)
                } else {
                    let ptr = std::ptr::NonNull::new(bits as *mut u8).expect("nonzero checked above");
                    Value::Ref(Some(unsafe { GcRef::from_raw(ptr) }))
                }
            }
            _ => unreachable!("untagged decode must supply expected type"),
        }
    }

    /// Decrements `vsp` by one slot and verifies the tag against `expected`
    /// in tagged mode. A mismatch is an engine bug (spec §4.1): it is
    /// reported as [`InternalError::UnexpectedTag`], not a Wasm trap.
    pub fn pop(&mut self, expected: Type) -> Result<Value, InternalError> {
        if self.is_empty() {
            return Err(InternalError::StackHeightMismatch { expected: 1, found: 0 });
        }
        self.vsp = unsafe { self.vsp.sub(self.rep.slot_size) };
        let slot = self.vsp;

        if self.rep.tagged {
            let tag = self.read_tag(slot);
            let ok = match (expected, tag) {
                (Type::Ref, Some(code)) => code.is_reference_group(),
                (ty, Some(code)) => TypeCode::for_scalar_type(ty) == Some(code),
                (_, None) => false,
            };
            if !ok {
                let byte = unsafe { self.slot_tag_ptr(slot).read() };
                return Err(InternalError::UnexpectedTag(byte));
            }
            Ok(self.decode_at(slot, tag))
        } else {
            // Untagged mode: only the JIT, which knows static types, may
            // pop without a tag check; we still decode using `expected`.
            Ok(match expected {
                Type::I32 => Value::I32(self.read_u64(slot, 0) as u32),
                Type::I64 => Value::I64(self.read_u64(slot, 0)),
                Type::F32 => Value::F32(self.read_u64(slot, 0) as u32),
                Type::F64 => Value::F64(self.read_u64(slot, 0)),
                Type::V128 => Value::V128(self.read_u64(slot, 0), self.read_u64(slot, 8)),
                Type::Ref => {
                    let bits = self.read_u64(slot, 0);
                    if bits == 0 {
                        Value::Ref(None)
                    } else if bits & 1 != 0 {
                        Value::I31((bits >> 1) as u32)
                    } else {
                        let ptr = std::ptr::NonNull::new(bits as *mut u8).unwrap();
                        Value::Ref(Some(unsafe { GcRef::from_raw(ptr) }))
                    }
                }
            })
        }
    }

    pub fn pop_u32(&mut self) -> Result<u32, InternalError> {
        match self.pop(Type::I32)? {
            Value::I32(x) => Ok(x),
            _ => unreachable!(),
        }
    }

    pub fn pop_u64(&mut self) -> Result<u64, InternalError> {
        match self.pop(Type::I64)? {
            Value::I64(x) => Ok(x),
            _ => unreachable!(),
        }
    }

    /// Inspects the top slot as a reference without popping it.
    pub fn peek_ref(&self) -> Result<Value, InternalError> {
        if self.is_empty() {
            return Err(InternalError::StackHeightMismatch { expected: 1, found: 0 });
        }
        let slot = unsafe { self.vsp.sub(self.rep.slot_size) };
        if self.rep.tagged {
            let tag = self.read_tag(slot);
            match tag {
                Some(code) if code.is_reference_group() => Ok(self.decode_at(slot, tag)),
                Some(code) => Err(InternalError::UnexpectedTag(code as u8)),
                None => Err(InternalError::UnexpectedTag(0)),
            }
        } else {
            Ok(self.decode_at(slot, None))
        }
    }

    /// Pops `types.len()` values, consuming right-to-left so the returned
    /// vector matches declaration (left-to-right) order.
    pub fn pop_n(&mut self, types: &[Type]) -> Result<SmallVec<[Value; 4]>, InternalError> {
        let mut out: SmallVec<[Value; 4]> = SmallVec::with_capacity(types.len());
        for ty in types.iter().rev() {
            out.push(self.pop(*ty)?);
        }
        out.reverse();
        Ok(out)
    }

    /// Iterates slots from `base` to `vsp`, yielding exactly the ones a
    /// precise GC would treat as roots: reference-tagged, non-null, and
    /// with the `i31` low bit clear.
    pub fn gc_roots(&self) -> impl Iterator<Item = GcRef> + '_ {
        let slot_size = self.rep.slot_size;
        let count = self.len_slots();
        let base = self.base;
        (0..count).filter_map(move |i| {
            let slot = unsafe { base.add(i * slot_size) };
            let tag = self.read_tag(slot)?;
            if !tag.is_reference_group() {
                return None;
            }
            let bits = self.read_u64(slot, 0);
            if bits == 0 || bits & 1 != 0 {
                return None;
            }
            let ptr = std::ptr::NonNull::new(bits as *mut u8)?;
            Some(unsafe { GcRef::from_raw(ptr) })
        })
    }

    /// Typed read of an arbitrary frame slot by index from `base`. Requires
    /// `tagged == true` (spec §4.1): untagged JIT frames have no type
    /// metadata a generic reader could check against.
    pub fn read_value(&self, slot_index: usize) -> Result<Value, InternalError> {
        if !self.rep.tagged {
            return Err(InternalError::Unsupported("readValue requires tagged mode"));
        }
        let slot = unsafe { self.base.add(slot_index * self.rep.slot_size) };
        let tag = self.read_tag(slot).ok_or(InternalError::UnexpectedTag(0))?;
        Ok(self.decode_at(slot, Some(tag)))
    }

    /// Typed write of an arbitrary frame slot. Reference-typed writes are
    /// unsupported until the GC write-barrier story is settled (spec §9
    /// open questions).
    pub fn write_value(&mut self, slot_index: usize, value: Value) -> Result<(), InternalError> {
        if !self.rep.tagged {
            return Err(InternalError::Unsupported("writeValue requires tagged mode"));
        }
        if matches!(value, Value::Ref(_) | Value::I31(_)) {
            return Err(InternalError::Unsupported("writeValue does not support reference types"));
        }
        let slot = unsafe { self.base.add(slot_index * self.rep.slot_size) };
        match value {
            Value::I32(x) => {
                self.write_tag(slot, TypeCode::I32);
                self.write_u64(slot, 0, x as u64);
            }
            Value::I64(x) => {
                self.write_tag(slot, TypeCode::I64);
                self.write_u64(slot, 0, x);
            }
            Value::F32(bits) => {
                self.write_tag(slot, TypeCode::F32);
                self.write_u64(slot, 0, bits as u64);
            }
            Value::F64(bits) => {
                self.write_tag(slot, TypeCode::F64);
                self.write_u64(slot, 0, bits);
            }
            Value::V128(lo, hi) => {
                self.write_tag(slot, TypeCode::V128);
                self.write_u64(slot, 0, lo);
                self.write_u64(slot, 8, hi);
            }
            Value::Ref(_) | Value::I31(_) => unreachable!("rejected above"),
        }
        Ok(())
    }
}
