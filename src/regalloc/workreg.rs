//! The allocator's internal shadow of a [`VirtReg`](crate::virtreg::VirtReg)
//! (spec §3 `RAWorkReg`) and the [`LiveInterval`] it produces.
//!
//! Grounded on `cranelift-codegen`'s `regalloc::liveness::Liveness` tracking
//! a `LiveRange` per value, reshaped here to the single-pass `firstUse`/
//! `lastUse` fields spec §4.3 calls for instead of a full per-block range
//! map (this crate's node list has no basic blocks to range over).

use crate::operand::RegGroup;
use crate::virtreg::{StackSlotId, VirtRegId};

/// Where a work-reg currently sits in the allocation state machine (spec
/// §4.3): `Unassigned -> Allocated(phys) -> {Unassigned, Spilled(slot)}`,
/// `Spilled(slot) -> Allocated(phys')`. No other transitions exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaState {
    Unassigned,
    Allocated(u8),
    Spilled(StackSlotId),
}

/// Allocator-internal shadow of a `VirtReg`, one-to-one within a pass.
#[derive(Clone, Debug)]
pub struct RaWorkReg {
    pub virt: VirtRegId,
    pub group: RegGroup,
    pub first_use: Option<u32>,
    pub last_use: Option<u32>,
    /// The position of the `Invoke` return that defines this reg, if any
    /// (spec §4.3 Pass 2: "Invoke nodes additionally record the return's
    /// definition at their pos"). Used to detect a use recorded earlier
    /// than its defining position (`AllocError::InconsistentUse`).
    pub def_pos: Option<u32>,
    pub state: RaState,
}

impl RaWorkReg {
    pub fn new(virt: VirtRegId, group: RegGroup) -> Self {
        RaWorkReg {
            virt,
            group,
            first_use: None,
            last_use: None,
            def_pos: None,
            state: RaState::Unassigned,
        }
    }

    pub fn record_use(&mut self, pos: u32) {
        self.first_use = Some(self.first_use.map_or(pos, |f| f.min(pos)));
        self.last_use = Some(self.last_use.map_or(pos, |l| l.max(pos)));
    }

    pub fn record_def(&mut self, pos: u32) {
        self.def_pos = Some(self.def_pos.map_or(pos, |d| d.min(pos)));
        self.record_use(pos);
    }
}

/// A reservation on the caller's outgoing frame (spec §3 `StackSlot`);
/// offset is `index * slot_size`, 16-byte-aligned area size per slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackSlot {
    pub work: VirtRegId,
    pub index: u32,
    pub size: u8,
}

/// A live interval over the synthetic linear timeline built by Pass 1
/// (spec §3). Half-inclusive `[start, end]`; `intersects` matches the
/// spec's exact predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveInterval {
    pub work: VirtRegId,
    pub group: RegGroup,
    pub start: u32,
    pub end: u32,
}

impl LiveInterval {
    pub fn intersects(&self, other: &LiveInterval) -> bool {
        !(self.end < other.start || other.end < self.start)
    }
}
