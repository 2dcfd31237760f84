//! Wasm GC proposal heap objects and the root-scan contract.
//!
//! The collector itself is an external collaborator (spec §1); this module
//! only defines what a `struct`/`array` looks like in memory and how a
//! scanner finds the references inside one. Allocations here are
//! deliberately leaked (`Box::leak`) rather than freed by a tracing
//! collector — implementing reclamation is out of scope, so there is
//! nothing for this crate to call back into.

use std::ptr::NonNull;

use crate::value::{GcRef, Value};

/// `ARRAY_NEW`'s length bound: creating an array longer than this traps
/// `OOM` rather than attempting the allocation. Mirrors the conservative
/// fixed resource limits wasmtime applies to GC allocations absent an
/// embedder-supplied limiter.
pub const MAX_ARRAY_LENGTH: u32 = 1_000_000;

/// The declared shape of one field of a `struct`, or the element type of an
/// `array`. Packed (`i8`/`i16`) fields need sign/zero extension on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    I32,
    I64,
    F32,
    F64,
    V128,
    Ref,
    PackedI8,
    PackedI16,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub fields: Vec<FieldType>,
}

#[derive(Debug, Clone)]
pub struct ArrayDecl {
    pub elem: FieldType,
}

/// A declared GC type; indexed by `Instance.heaptypes`.
#[derive(Debug, Clone)]
pub enum HeapTypeDecl {
    Struct(StructDecl),
    Array(ArrayDecl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GcObjectKind {
    Struct,
    Array,
}

#[repr(C)]
struct GcHeader {
    kind: GcObjectKind,
}

#[repr(C)]
pub struct HeapStruct {
    header: GcHeader,
    pub decl_index: u32,
    pub fields: Vec<Value>,
}

#[repr(C)]
pub struct HeapArray {
    header: GcHeader,
    pub decl_index: u32,
    pub elems: Vec<Value>,
}

impl HeapStruct {
    /// Allocates a struct instance on the heap and returns a [`GcRef`] to
    /// it. The allocation is intentionally leaked; see the module doc.
    pub fn alloc(decl_index: u32, fields: Vec<Value>) -> GcRef {
        let boxed = Box::new(HeapStruct { header: GcHeader { kind: GcObjectKind::Struct }, decl_index, fields });
        let ptr = NonNull::new(Box::leak(boxed) as *mut HeapStruct as *mut u8).unwrap();
        unsafe { GcRef::from_raw(ptr) }
    }

    /// # Safety
    /// `r` must have come from [`HeapStruct::alloc`].
    pub unsafe fn from_ref(r: GcRef) -> &'static HeapStruct {
        unsafe { &*(r.as_ptr() as *const HeapStruct) }
    }

    /// # Safety
    /// `r` must have come from [`HeapStruct::alloc`], and the caller must
    /// hold the only live reference (no aliasing `&HeapStruct` elsewhere).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn from_ref_mut(r: GcRef) -> &'static mut HeapStruct {
        unsafe { &mut *(r.as_ptr() as *mut HeapStruct) }
    }
}

impl HeapArray {
    pub fn alloc(decl_index: u32, elems: Vec<Value>) -> GcRef {
        let boxed = Box::new(HeapArray { header: GcHeader { kind: GcObjectKind::Array }, decl_index, elems });
        let ptr = NonNull::new(Box::leak(boxed) as *mut HeapArray as *mut u8).unwrap();
        unsafe { GcRef::from_raw(ptr) }
    }

    /// # Safety
    /// `r` must have come from [`HeapArray::alloc`].
    pub unsafe fn from_ref(r: GcRef) -> &'static HeapArray {
        unsafe { &*(r.as_ptr() as *const HeapArray) }
    }

    /// # Safety
    /// `r` must have come from [`HeapArray::alloc`], with no aliasing
    /// `&HeapArray` live at the same time.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn from_ref_mut(r: GcRef) -> &'static mut HeapArray {
        unsafe { &mut *(r.as_ptr() as *mut HeapArray) }
    }
}

/// Visits every `Value::Ref`/`Value::I31` payload reachable from one heap
/// object's fields, the way a tracing collector would to find its children.
/// `GcRef`s for `I31` values never reach here: `ValueStack`'s scan (and this
/// one) both treat a low payload bit of 1 as "not a pointer" before calling
/// a visitor.
pub fn scan_struct_roots(s: &HeapStruct, mut visit: impl FnMut(GcRef)) {
    for v in &s.fields {
        if let Value::Ref(Some(r)) = v {
            visit(*r);
        }
    }
}

pub fn scan_array_roots(a: &HeapArray, mut visit: impl FnMut(GcRef)) {
    for v in &a.elems {
        if let Value::Ref(Some(r)) = v {
            visit(*r);
        }
    }
}
