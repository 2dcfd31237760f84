//! The stack-switching subsystem (spec §3, §4.2): value stacks, the
//! suspendable `StackObject` unit, and the native context-switch mechanics
//! tying them together.

pub mod object;
mod switch;
pub mod value_stack;

pub use object::{ResumeOutcome, StackObject, StackState};
pub use switch::register_stub_regions;
pub use value_stack::ValueStack;
