//! Linear-scan register allocation (spec §4.3 / component G): liveness,
//! physical assignment, spilling, and move/swap planning.

pub mod context;
pub mod interval;
pub mod moveplan;
pub mod register_set;
pub mod workreg;

pub use context::{allocate, AllocConstraints, AllocOutput};
pub use moveplan::{plan_moves, MoveOp, PlannedMove};
pub use register_set::FreeRegSet;
pub use workreg::{LiveInterval, RaState, RaWorkReg, StackSlot};
