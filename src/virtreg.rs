//! Virtual-register state owned by the compiler.
//!
//! Grounded on `cranelift-codegen`'s `regalloc::affinity::Affinity` (a
//! per-value allocation preference carried outside the value that wants
//! it) and `ir::entities`'s newtype-over-`u32` pattern, here provided by
//! `cranelift_entity::entity_impl!` instead of being hand-written.

use crate::operand::RegGroup;
use cranelift_entity::{entity_impl, PrimaryMap};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// An opaque reference to a [`VirtReg`], valid only within the
/// [`VirtRegPool`] (and, transitively, the compiler) that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct VirtRegId(u32);
entity_impl!(VirtRegId, "vreg");

/// The eventual home of a virtual register once the allocator has run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// Not yet processed by the allocator.
    Unassigned,
    /// Bound to a physical register encoding within its group.
    Phys(u8),
    /// Evicted to a stack slot.
    Spilled(StackSlotId),
}

/// An opaque reference to a [`crate::regalloc::workreg::StackSlot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StackSlotId(u32);
entity_impl!(StackSlotId, "slot");

/// A virtual register: created by the compiler (never directly by users,
/// beyond the named `new_*` helpers on `UniCompiler`), used only through
/// operand references until the allocator fills in its [`Assignment`].
#[derive(Clone, Debug)]
pub struct VirtReg {
    pub id: VirtRegId,
    pub group: RegGroup,
    pub width: u8,
    pub name_hint: Option<String>,
    pub assignment: Assignment,
}

/// The arena of virtual registers owned by a single compiler instance.
///
/// Monotonic ids; no interning across compilers (spec §3 "Ownership").
pub struct VirtRegPool {
    regs: PrimaryMap<VirtRegId, VirtReg>,
}

impl VirtRegPool {
    pub fn new() -> Self {
        VirtRegPool {
            regs: PrimaryMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.regs.clear();
    }

    pub fn create(&mut self, group: RegGroup, width: u8, name_hint: Option<&str>) -> VirtRegId {
        let id = self.regs.next_key();
        self.regs.push(VirtReg {
            id,
            group,
            width,
            name_hint: name_hint.map(str::to_owned),
            assignment: Assignment::Unassigned,
        });
        id
    }

    pub fn get(&self, id: VirtRegId) -> &VirtReg {
        &self.regs[id]
    }

    /// Whether `id` was created by this pool — the allocator checks this
    /// before shadowing a virtual register, surfacing a foreign or stale id
    /// as `AllocError::UnknownVirtReg` instead of panicking.
    pub fn contains(&self, id: VirtRegId) -> bool {
        self.regs.get(id).is_some()
    }

    pub fn get_mut(&mut self, id: VirtRegId) -> &mut VirtReg {
        &mut self.regs[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (VirtRegId, &VirtReg)> {
        self.regs.iter()
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }
}

impl Default for VirtRegPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ids() {
        let mut pool = VirtRegPool::new();
        let a = pool.create(RegGroup::Gp, 8, Some("x"));
        let b = pool.create(RegGroup::Gp, 4, None);
        assert_ne!(a, b);
        assert_eq!(pool.get(a).id, a);
        assert_eq!(pool.get(b).width, 4);
    }

    #[test]
    fn unassigned_until_allocated() {
        let mut pool = VirtRegPool::new();
        let a = pool.create(RegGroup::Vec, 16, None);
        assert_eq!(pool.get(a).assignment, Assignment::Unassigned);
        pool.get_mut(a).assignment = Assignment::Phys(3);
        assert_eq!(pool.get(a).assignment, Assignment::Phys(3));
    }
}
