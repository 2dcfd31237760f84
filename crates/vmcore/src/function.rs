//! Callable entities the dispatcher and stack-switch stubs hand control
//! between: interpreted Wasm functions, host callbacks, and their shared
//! signature type.
//!
//! Instruction decoding is out of scope for this crate (spec §1), so a
//! `WasmFunction`'s interpreter body is a boxed closure rather than raw
//! bytecode — the seam the spec draws between "the interpreter" and "the
//! runtime escape points it uses".

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::stack::{StackObject, ValueStack};
use crate::tiering::CompiledCode;
use crate::trap::Throwable;
use crate::value::{Type, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
}

impl Signature {
    pub fn new(params: Vec<Type>, results: Vec<Type>) -> Signature {
        Signature { params, results }
    }
}

/// The interpreter entry point for one Wasm function: pops nothing itself
/// (the caller, per spec §4.5, has already arranged for `params` to be on
/// top of the value stack), consumes exactly `|params|` slots, and leaves
/// exactly `|results|` slots. Takes the owning `StackObject` too, so the
/// dispatcher opcodes it calls (`TRAP`, `PROBE_instr`, `TIERUP`, ...) can
/// read and update the current call-frame record (spec §4.6).
pub type InterpBody = Arc<dyn Fn(&StackObject, &mut ValueStack) -> Option<Throwable> + Send + Sync>;

/// The mutable per-function declaration: tier-up state and (when present) a
/// pointer into compiled code. Shared by every call site of the function,
/// which is why `TIERUP` mutating it is externally visible to all callers
/// immediately.
pub struct FuncDecl {
    pub compiled: Mutex<Option<Arc<CompiledCode>>>,
}

impl fmt::Debug for FuncDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncDecl")
            .field("compiled", &self.compiled.lock().unwrap().is_some())
            .finish()
    }
}

impl Default for FuncDecl {
    fn default() -> Self {
        FuncDecl { compiled: Mutex::new(None) }
    }
}

struct WasmFunctionData {
    name: String,
    signature: Signature,
    decl: Arc<FuncDecl>,
    interp_body: InterpBody,
}

/// A cheap-to-clone handle to a Wasm function: its signature, its
/// interpreter body, and the (shared) declaration tier-up mutates.
#[derive(Clone)]
pub struct WasmFunction(Arc<WasmFunctionData>);

impl WasmFunction {
    pub fn new(name: impl Into<String>, signature: Signature, interp_body: InterpBody) -> WasmFunction {
        WasmFunction(Arc::new(WasmFunctionData {
            name: name.into(),
            signature,
            decl: Arc::new(FuncDecl::default()),
            interp_body,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    pub fn decl(&self) -> &Arc<FuncDecl> {
        &self.0.decl
    }

    pub fn interp_body(&self) -> &InterpBody {
        &self.0.interp_body
    }
}

impl fmt::Debug for WasmFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmFunction")
            .field("name", &self.0.name)
            .field("signature", &self.0.signature)
            .finish()
    }
}

impl PartialEq for WasmFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// What a host callback hands back to `runtime_callHost` (spec §4.5).
pub enum HostCallResult {
    Throw(Throwable),
    Value0,
    Value1(Value),
    ValueN(Vec<Value>),
    TailCall(Function, Vec<Value>),
}

type HostCallback = Box<dyn Fn(&[Value]) -> HostCallResult + Send + Sync>;

struct HostFunctionData {
    name: String,
    signature: Signature,
    callback: HostCallback,
}

#[derive(Clone)]
pub struct HostFunction(Arc<HostFunctionData>);

impl HostFunction {
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        callback: impl Fn(&[Value]) -> HostCallResult + Send + Sync + 'static,
    ) -> HostFunction {
        HostFunction(Arc::new(HostFunctionData {
            name: name.into(),
            signature,
            callback: Box::new(callback),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    pub fn call(&self, args: &[Value]) -> HostCallResult {
        (self.0.callback)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.0.name)
            .field("signature", &self.0.signature)
            .finish()
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Either a Wasm or a host function — what `StackObject.func` and the
/// host-call/tail-call protocol operate over.
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Wasm(WasmFunction),
    Host(HostFunction),
}

impl Function {
    pub fn signature(&self) -> &Signature {
        match self {
            Function::Wasm(f) => f.signature(),
            Function::Host(f) => f.signature(),
        }
    }
}
