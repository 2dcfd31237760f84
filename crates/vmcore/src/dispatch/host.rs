//! The host-call / tail-call opcodes (spec §4.5): `runtime_callHost` and the
//! tail-call loop that keeps host↔host and host↔Wasm tail calls from
//! growing the native call stack.
//!
//! Real hand-written machine code collapses a tail call into a jump; this
//! crate's interpreter bodies are ordinary Rust closures, so the same
//! non-growth property is reproduced with an explicit loop in
//! [`call`] rather than Rust-level recursion — a `TailCall` result unwinds
//! back to this loop instead of calling back into itself.

use crate::frame::FrameRecord;
use crate::function::{Function, HostCallResult};
use crate::stack::StackObject;
use crate::trap::Throwable;
use crate::value::Value;

/// Invokes `func` with `args` on `stack`, following any `TailCall` chain
/// iteratively. Ordinary (non-tail) nested calls still recurse through
/// Rust call frames normally — only `HostCallResult::TailCall` is handled
/// without growing the stack.
pub fn call(stack: &StackObject, func: Function, args: Vec<Value>) -> Result<Vec<Value>, Throwable> {
    let mut func = func;
    let mut args = args;
    loop {
        log::trace!("runtime_callHost: invoking {:?} with {} arg(s)", func, args.len());
        let result = match &func {
            Function::Host(h) => h.call(&args),
            Function::Wasm(w) => {
                {
                    let mut vs = stack.value_stack.borrow_mut();
                    for v in &args {
                        unsafe { vs.push(*v) };
                    }
                }
                let compiled = w.decl().compiled.lock().unwrap().clone();
                stack.push_frame(match &compiled {
                    Some(_) => FrameRecord::compiled(w.clone()),
                    None => FrameRecord::interpreter(w.clone()),
                });
                let trapped = {
                    let mut vs = stack.value_stack.borrow_mut();
                    match &compiled {
                        Some(code) => crate::tiering::invoke_compiled(code, stack, &mut vs),
                        None => (w.interp_body())(stack, &mut vs),
                    }
                };
                stack.pop_frame();
                if let Some(t) = trapped {
                    return Err(t);
                }
                let results = w.signature().results.clone();
                match stack.value_stack.borrow_mut().pop_n(&results) {
                    Ok(vs) => return Ok(vs.into_vec()),
                    Err(e) => return Err(Throwable::internal(e)),
                }
            }
        };
        match result {
            HostCallResult::Throw(t) => return Err(t),
            HostCallResult::Value0 => return Ok(Vec::new()),
            HostCallResult::Value1(v) => return Ok(vec![v]),
            HostCallResult::ValueN(vs) => return Ok(vs),
            HostCallResult::TailCall(next, next_args) => {
                log::trace!("runtime_callHost: tail call, native stack unchanged");
                func = next;
                args = next_args;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{HostFunction, Signature, WasmFunction};
    use crate::value::{Type, ValueRep};
    use std::sync::Arc;

    #[test]
    fn host_to_wasm_tail_call_reaches_the_wasm_result() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        let doubler = Function::Wasm(WasmFunction::new(
            "doubler",
            Signature::new(vec![Type::I32], vec![Type::I32]),
            Arc::new(|_stack, vs| {
                let x = vs.pop_u32().unwrap();
                unsafe { vs.push(Value::I32(x * 2)) };
                None
            }),
        ));
        let entry = Function::Host(HostFunction::new(
            "entry",
            Signature::new(vec![Type::I32], vec![Type::I32]),
            move |args| HostCallResult::TailCall(doubler.clone(), args.to_vec()),
        ));

        let results = call(&so, entry, vec![Value::I32(9)]).unwrap();
        assert_eq!(results, vec![Value::I32(18)]);
        assert!(so.value_stack.borrow().is_empty());
    }

    #[test]
    fn host_throw_propagates_without_a_trace() {
        let so = StackObject::new(ValueRep::tagged(), 256 * 1024).unwrap();
        let f = Function::Host(HostFunction::new("boom", Signature::new(vec![], vec![]), |_| {
            HostCallResult::Throw(Throwable::trap(crate::trap::TrapReason::Unreachable))
        }));
        let err = call(&so, f, vec![]).unwrap_err();
        assert!(matches!(err, Throwable::Trap(_)));
    }
}
