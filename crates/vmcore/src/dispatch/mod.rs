//! The Runtime Dispatcher (spec §4.3, §4.4, §4.5, §4.7): the set of escape
//! points a hand-rolled interpreter or SPC-compiled body calls into for
//! anything that isn't pure value-stack arithmetic — memory, table, global,
//! and GC-proposal operations, control/trap/tier-up probes, and the
//! host-call/tail-call protocol.

pub mod control;
pub mod gc;
pub mod global;
pub mod host;
pub mod memory;
pub mod table;
