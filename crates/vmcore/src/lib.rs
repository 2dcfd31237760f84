//! `vmcore`: the execution core of an x86-64 Wasm engine — a tagged value
//! stack, guarded stack-switching, a runtime dispatcher for the opcodes an
//! interpreter or compiled tier can't express as pure arithmetic, frame
//! walking for trap traces, and interpreter-to-compiled-tier OSR.
//!
//! Module decoding, validation, and code generation are all out of scope
//! (see each module's doc comment for the exact seam); this crate starts
//! from an already-validated function body and a place to run it.

pub mod dispatch;
pub mod frame;
pub mod function;
pub mod gc_heap;
pub mod instance;
pub mod stack;
pub mod tiering;
pub mod trap;
pub mod value;

use std::sync::Arc;

use vmcore_unwinder::CodeRegistry;

use function::Function;
use stack::{ResumeOutcome, StackObject};
use tiering::TierUpGate;
use trap::Throwable;
use value::{Value, ValueRep};

/// Process-wide engine configuration (spec's ambient configuration
/// surface). `tagged`/`tag_size`/`slot_size` together pick a [`ValueRep`];
/// `stack_size` sizes every `StackObject`'s native mapping.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub stack_size: usize,
    pub tagged: bool,
    pub tiering_enabled: bool,
}

impl Config {
    fn value_rep(&self) -> ValueRep {
        if self.tagged { ValueRep::tagged() } else { ValueRep::untagged() }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config { stack_size: 256 * 1024, tagged: true, tiering_enabled: false }
    }
}

/// Result of [`Engine::run`]: either the function's return values, or the
/// throwable that escaped it (spec §7 — never a Rust panic).
pub type EngineResult = Result<Vec<Value>, Throwable>;

/// The embedder-facing handle: owns the tier-up gate and the code registry
/// frame walking consults. `StackObject`s are created per call rather than
/// pooled, matching the spec's silence on lifecycle beyond one `run()`.
pub struct Engine {
    config: Config,
    registry: CodeRegistry,
    tier_up: TierUpGate,
}

impl Engine {
    pub fn new(config: Config) -> anyhow::Result<Engine> {
        config.value_rep().validate().map_err(anyhow::Error::msg)?;
        let mut registry = CodeRegistry::new();
        stack::register_stub_regions(&mut registry);
        log::info!(
            "vmcore: engine initialized (stack_size={}, tagged={}, tiering_enabled={})",
            config.stack_size,
            config.tagged,
            config.tiering_enabled
        );
        Ok(Engine { config, registry, tier_up: TierUpGate::disabled() })
    }

    /// Installs a non-default tiering policy (spec §4.7). A no-op engine
    /// built with `tiering_enabled: false` should simply never call this.
    pub fn with_tiering_policy(mut self, policy: Arc<dyn tiering::TieringPolicy>) -> Engine {
        self.tier_up = TierUpGate::new(policy);
        self
    }

    pub fn code_registry(&self) -> &CodeRegistry {
        &self.registry
    }

    /// Runs `func(args)` to completion on a freshly allocated stack (spec
    /// §8's "return a constant" through "OSR" scenarios all go through this
    /// one entry point). Stack-neutral: the `StackObject` is `EMPTY` again
    /// before this returns, success or throw alike.
    pub fn run(&self, func: Function, args: &[Value]) -> EngineResult {
        let stack = StackObject::new(self.config.value_rep(), self.config.stack_size)
            .unwrap_or_else(|e| trap::fatal(e));

        stack.reset(func).map_err(Throwable::internal)?;
        stack.bind(args).map_err(Throwable::internal)?;

        match stack.resume() {
            ResumeOutcome::Value(results) => Ok(results),
            ResumeOutcome::Throw(t) => Err(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{HostFunction, Signature, WasmFunction};
    use crate::value::Type;

    #[test]
    fn run_a_constant_returning_host_function() {
        let engine = Engine::new(Config::default()).unwrap();
        let f = Function::Host(HostFunction::new("const", Signature::new(vec![], vec![Type::I32]), |_| {
            crate::function::HostCallResult::Value1(Value::I32(7))
        }));
        assert_eq!(engine.run(f, &[]).unwrap(), vec![Value::I32(7)]);
    }

    #[test]
    fn run_an_arithmetic_wasm_function() {
        let engine = Engine::new(Config::default()).unwrap();
        let f = Function::Wasm(WasmFunction::new(
            "add_one",
            Signature::new(vec![Type::I32], vec![Type::I32]),
            std::sync::Arc::new(|_stack, vs| {
                let x = vs.pop_u32().unwrap();
                unsafe { vs.push(Value::I32(x + 1)) };
                None
            }),
        ));
        assert_eq!(engine.run(f, &[Value::I32(41)]).unwrap(), vec![Value::I32(42)]);
    }

    #[test]
    fn a_trap_propagates_as_a_throw_not_a_panic() {
        let engine = Engine::new(Config::default()).unwrap();
        let f = Function::Wasm(WasmFunction::new(
            "trapper",
            Signature::new(vec![], vec![]),
            Arc::new(|stack, _vs| Some(dispatch::control::trap(stack, trap::TrapReason::Unreachable))),
        ));
        let err = engine.run(f, &[]).unwrap_err();
        assert!(matches!(err, Throwable::Trap(_)));
    }

    #[test]
    fn repeated_runs_on_fresh_stacks_are_independent() {
        let engine = Engine::new(Config::default()).unwrap();
        for i in 0..3u32 {
            let f = Function::Host(HostFunction::new(
                "id",
                Signature::new(vec![Type::I32], vec![Type::I32]),
                |args| crate::function::HostCallResult::Value1(args[0]),
            ));
            assert_eq!(engine.run(f, &[Value::I32(i)]).unwrap(), vec![Value::I32(i)]);
        }
    }
}
