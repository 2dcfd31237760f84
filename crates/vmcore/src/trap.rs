//! The error taxonomy described in spec §7: traps, host throws, and
//! internal-invariant failures, all funneled through one [`Throwable`] that
//! crosses the runtime ABI as the `runtime_*` return value.

use std::fmt;
use std::sync::Arc;

use crate::function::WasmFunction;

/// A specified Wasm failure condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrapReason {
    #[error("out of bounds memory access")]
    MemoryOob,
    #[error("out of bounds table access")]
    TableOob,
    #[error("undefined element")]
    Oob,
    #[error("null reference")]
    NullDeref,
    #[error("integer divide by zero")]
    DivZero,
    #[error("integer overflow")]
    IntOverflow,
    #[error("invalid conversion to integer")]
    InvalidConv,
    #[error("unreachable")]
    Unreachable,
    #[error("call stack exhausted")]
    StackOverflow,
    #[error("out of bounds array access")]
    ArrayIndexOob,
    #[error("out of memory")]
    Oom,
    #[error("cast failure")]
    CastFailure,
}

/// One entry in a trap's stack trace: the function and program counter of a
/// Wasm frame on the chain, deepest first once attached (built in reverse
/// by [`FrameWalker`](crate::frame::FrameWalker), then flipped).
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function: WasmFunction,
    pub pc: u32,
}

/// A materialized Wasm trap: a reason plus a lazily-attached stack trace.
#[derive(Debug, Clone)]
pub struct Trap {
    pub reason: TrapReason,
    pub trace: Vec<TraceFrame>,
    pub host_frame: Option<Arc<str>>,
}

impl Trap {
    pub fn new(reason: TrapReason) -> Trap {
        Trap { reason, trace: Vec::new(), host_frame: None }
    }

    pub fn with_trace(reason: TrapReason, trace: Vec<TraceFrame>) -> Trap {
        Trap { reason, trace, host_frame: None }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trap: {}", self.reason)
    }
}

/// An engine invariant violation: a bug in this crate or its caller, not a
/// Wasm-specified failure. Kept distinct from [`Trap`] so tests can assert
/// its absence (spec §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum InternalError {
    #[error("value stack height mismatch after call: expected {expected}, found {found}")]
    StackHeightMismatch { expected: usize, found: usize },
    #[error("unexpected tag byte {0:#x}")]
    UnexpectedTag(u8),
    #[error("malformed stack configuration: {0}")]
    MalformedConfig(&'static str),
    #[error("operation not implemented: {0}")]
    Unsupported(&'static str),
    #[error("bind received more arguments than the function still needs")]
    TooManyArguments,
    #[error("stack lifecycle violation: expected state {expected:?}, found {found:?}")]
    WrongState { expected: &'static str, found: &'static str },
}

/// The sum type that crosses the runtime ABI: every `runtime_*` routine
/// returns `Option<Throwable>` (`None` on success).
#[derive(Debug, Clone)]
pub enum Throwable {
    Trap(Trap),
    /// A throwable value returned unchanged from a host callback, with
    /// frames prepended as it propagates (spec §4.5).
    Host(Trap),
    Internal(InternalError),
}

impl Throwable {
    pub fn trap(reason: TrapReason) -> Throwable {
        Throwable::Trap(Trap::new(reason))
    }

    pub fn internal(err: InternalError) -> Throwable {
        Throwable::Internal(err)
    }

    /// Prepends `frame` to whichever trace this throwable carries, as the
    /// host-call protocol walks back out through Wasm frames.
    pub fn prepend_frame(&mut self, frame: TraceFrame) {
        match self {
            Throwable::Trap(t) | Throwable::Host(t) => t.trace.insert(0, frame),
            Throwable::Internal(_) => {}
        }
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Throwable::Trap(t) => write!(f, "{t}"),
            Throwable::Host(t) => write!(f, "host throw: {t}"),
            Throwable::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for Throwable {}

/// Unrecoverable failure at stack construction (spec §7's `Fatal` class):
/// logs and aborts rather than returning an error, since there is no stack
/// to unwind onto.
#[cold]
pub fn fatal(msg: impl fmt::Display) -> ! {
    log::error!("fatal vmcore error: {msg}");
    std::process::abort();
}
