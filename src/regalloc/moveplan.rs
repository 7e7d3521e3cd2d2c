//! Pass 6 (move plan): rewrite the planned move list from Pass 5 into swap
//! and move emission entries (spec §4.3).
//!
//! Grounded on `cranelift-codegen`'s `regalloc::reload::Reload` insertion
//! pass, which likewise turns allocation decisions into a concrete list of
//! move instructions to splice into the node stream; the swap-detection
//! step here has no teacher analogue (cranelift relies on SSA/parallel-copy
//! resolution instead) and is written directly from spec §4.3's "rewrites
//! move-pairs `A->B & B->A` into a single swap entry" rule.

use crate::error::{AllocError, CodegenResult};
use crate::operand::RegGroup;
use crate::regalloc::register_set::FreeRegSet;
use crate::virtreg::VirtRegId;

/// One `src -> dst` move the allocator decided it needs, before swap
/// folding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedMove {
    pub work: VirtRegId,
    pub group: RegGroup,
    pub src: u8,
    pub dst: u8,
}

/// A single emission entry after swap folding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOp {
    /// Lowers to `xchg` for GP registers, or three moves through `scratch`
    /// for vector registers (spec §4.3).
    Swap {
        group: RegGroup,
        a: u8,
        b: u8,
        work_a: VirtRegId,
        work_b: VirtRegId,
        /// `Some` for vector swaps (the scratch register to route the
        /// three-move sequence through); always `None` for GP swaps.
        scratch: Option<u8>,
    },
    Move {
        work: VirtRegId,
        group: RegGroup,
        src: u8,
        dst: u8,
    },
}

/// Fold `moves` into swaps where possible and return the emission-ordered
/// plan: swaps first, then the remaining moves (spec §4.3). `vec_free` is
/// the free-register pool for the vector group as it stands after
/// allocation, consulted for a scratch register whenever a vector swap is
/// folded.
pub fn plan_moves(moves: &[PlannedMove], vec_free: &FreeRegSet) -> CodegenResult<Vec<MoveOp>> {
    let mut consumed = vec![false; moves.len()];
    let mut swaps = Vec::new();
    let mut plain_moves = Vec::new();

    for i in 0..moves.len() {
        if consumed[i] {
            continue;
        }
        let mi = moves[i];
        let mut pair = None;
        for (j, mj) in moves.iter().enumerate().skip(i + 1) {
            if consumed[j] {
                continue;
            }
            if mj.group == mi.group && mj.src == mi.dst && mj.dst == mi.src {
                pair = Some(j);
                break;
            }
        }
        match pair {
            Some(j) => {
                consumed[i] = true;
                consumed[j] = true;
                let scratch = match mi.group {
                    RegGroup::Gp => None,
                    RegGroup::Vec | RegGroup::KMask => {
                        Some(vec_free.first_free().ok_or(AllocError::ScratchExhausted)?)
                    }
                };
                swaps.push(MoveOp::Swap {
                    group: mi.group,
                    a: mi.src,
                    b: mi.dst,
                    work_a: mi.work,
                    work_b: moves[j].work,
                    scratch,
                });
            }
            None => {}
        }
    }

    for (i, m) in moves.iter().enumerate() {
        if !consumed[i] {
            plain_moves.push(MoveOp::Move {
                work: m.work,
                group: m.group,
                src: m.src,
                dst: m.dst,
            });
        }
    }

    swaps.extend(plain_moves);
    Ok(swaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtreg::VirtRegPool;

    #[test]
    fn move_pair_folds_to_single_swap() {
        let mut pool = VirtRegPool::new();
        let a = pool.create(RegGroup::Gp, 8, None);
        let b = pool.create(RegGroup::Gp, 8, None);
        let moves = vec![
            PlannedMove {
                work: a,
                group: RegGroup::Gp,
                src: 0,
                dst: 1,
            },
            PlannedMove {
                work: b,
                group: RegGroup::Gp,
                src: 1,
                dst: 0,
            },
        ];
        let plan = plan_moves(&moves, &FreeRegSet::new(16)).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan[0], MoveOp::Swap { scratch: None, .. }));
    }

    #[test]
    fn unpaired_move_stays_a_plain_move() {
        let mut pool = VirtRegPool::new();
        let a = pool.create(RegGroup::Gp, 8, None);
        let moves = vec![PlannedMove {
            work: a,
            group: RegGroup::Gp,
            src: 0,
            dst: 1,
        }];
        let plan = plan_moves(&moves, &FreeRegSet::new(16)).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan[0], MoveOp::Move { .. }));
    }

    #[test]
    fn vector_swap_needs_a_scratch_register() {
        let mut pool = VirtRegPool::new();
        let a = pool.create(RegGroup::Vec, 16, None);
        let b = pool.create(RegGroup::Vec, 16, None);
        let moves = vec![
            PlannedMove {
                work: a,
                group: RegGroup::Vec,
                src: 0,
                dst: 1,
            },
            PlannedMove {
                work: b,
                group: RegGroup::Vec,
                src: 1,
                dst: 0,
            },
        ];
        let plan = plan_moves(&moves, &FreeRegSet::new(4)).unwrap();
        assert!(matches!(
            plan[0],
            MoveOp::Swap {
                scratch: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn vector_swap_with_no_free_scratch_fails() {
        let mut pool = VirtRegPool::new();
        let a = pool.create(RegGroup::Vec, 16, None);
        let b = pool.create(RegGroup::Vec, 16, None);
        let moves = vec![
            PlannedMove {
                work: a,
                group: RegGroup::Vec,
                src: 0,
                dst: 1,
            },
            PlannedMove {
                work: b,
                group: RegGroup::Vec,
                src: 1,
                dst: 0,
            },
        ];
        let err = plan_moves(&moves, &FreeRegSet::empty()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CodegenError::Alloc(AllocError::ScratchExhausted)
        ));
    }
}
