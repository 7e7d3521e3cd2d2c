//! Orchestrates the six numbered passes of linear-scan register allocation
//! (spec §4.3) over a finalised [`NodeList`].
//!
//! Grounded on `cranelift-codegen`'s `regalloc::context::Context`, which
//! likewise holds the allocator's persistent scratch state and exposes one
//! `run` entry point sequencing its own numbered passes (liveness, then
//! coalescing, spilling, reload, coloring); this module collapses that
//! multi-struct pipeline into the six passes spec §4.3 names directly,
//! since this crate's allocator works over a flat node list rather than a
//! CFG of extended basic blocks.

use crate::error::{AllocError, CodegenError, CodegenResult};
use crate::ir::node::{Node, NodeList};
use crate::label::LabelId;
use crate::operand::{Operand, RegGroup};
use crate::regalloc::interval::build_intervals;
use crate::regalloc::moveplan::{plan_moves, MoveOp, PlannedMove};
use crate::regalloc::register_set::FreeRegSet;
use crate::regalloc::workreg::{LiveInterval, RaState, RaWorkReg, StackSlot};
use crate::virtreg::{Assignment, StackSlotId, VirtRegId, VirtRegPool};
use cranelift_entity::PrimaryMap;
use std::collections::HashMap;

use log::{debug, trace};

/// Per-group physical-register counts available to the allocator (spec
/// §4.3 "Inputs": `availableRegs(gp)`, `availableRegs(vec)`).
#[derive(Clone, Copy, Debug)]
pub struct AllocConstraints {
    pub gp_count: u8,
    pub vec_count: u8,
    pub kmask_count: u8,
}

/// The default caller-saved stack slot size: a 16-byte-aligned area per
/// slot (spec §3 `StackSlot`), wide enough to hold any group's widest
/// register without per-group slot sizing.
const SLOT_SIZE: u8 = 16;

/// The resolved output of one allocation pass: the move/swap emission plan
/// and the stack-slot reservations it created. Final per-workreg state
/// (`Allocated`/`Spilled`) is written directly back into the `VirtRegPool`
/// passed to [`allocate`].
pub struct AllocOutput {
    pub moves: Vec<MoveOp>,
    pub stack_slots: PrimaryMap<StackSlotId, StackSlot>,
}

fn free_set_for<'a>(
    group: RegGroup,
    gp_free: &'a mut FreeRegSet,
    vec_free: &'a mut FreeRegSet,
    kmask_free: &'a mut FreeRegSet,
) -> &'a mut FreeRegSet {
    match group {
        RegGroup::Gp => gp_free,
        RegGroup::Vec => vec_free,
        RegGroup::KMask => kmask_free,
    }
}

/// Run the allocator's six passes over `nodes`, writing final
/// [`Assignment`]s back into `virtregs`.
pub fn allocate(
    nodes: &NodeList,
    virtregs: &mut VirtRegPool,
    constraints: &AllocConstraints,
) -> CodegenResult<AllocOutput> {
    // --- Pass 1: numbering ---------------------------------------------
    let mut pos_of: HashMap<crate::ir::node::NodeId, u32> = HashMap::new();
    let mut label_pos: HashMap<LabelId, u32> = HashMap::new();
    let mut pos: u32 = 0;
    for (id, node) in nodes.iter() {
        match node {
            Node::Label(label_id) => {
                label_pos.insert(*label_id, pos);
            }
            Node::Inst(..) | Node::Invoke { .. } => {
                pos_of.insert(id, pos);
                trace!("numbered node {:?} at pos {}", id, pos);
                pos += 2;
            }
            Node::Func(_) | Node::SectionAlign(_) | Node::EmbedData(_) => {}
        }
    }

    // --- Pass 2: use recording ------------------------------------------
    let mut workregs: HashMap<VirtRegId, RaWorkReg> = HashMap::new();

    fn touch<'w>(
        workregs: &'w mut HashMap<VirtRegId, RaWorkReg>,
        virtregs: &VirtRegPool,
        id: VirtRegId,
    ) -> CodegenResult<&'w mut RaWorkReg> {
        if !virtregs.contains(id) {
            return Err(CodegenError::Alloc(AllocError::UnknownVirtReg));
        }
        let group = virtregs.get(id).group;
        Ok(workregs.entry(id).or_insert_with(|| RaWorkReg::new(id, group)))
    }

    for (id, node) in nodes.iter() {
        let node_pos = match pos_of.get(&id) {
            Some(p) => *p,
            None => continue,
        };
        match node {
            Node::Inst(_, operands) => {
                for op in operands.iter() {
                    for vreg in op.referenced_virtregs() {
                        touch(&mut workregs, virtregs, vreg)?.record_use(node_pos);
                    }
                }
            }
            Node::Invoke { args, ret, .. } => {
                for op in args.iter() {
                    for vreg in op.referenced_virtregs() {
                        touch(&mut workregs, virtregs, vreg)?.record_use(node_pos);
                    }
                }
                if let Some(ret_op) = ret {
                    for vreg in ret_op.referenced_virtregs() {
                        touch(&mut workregs, virtregs, vreg)?.record_def(node_pos);
                    }
                }
            }
            _ => {}
        }
    }

    for w in workregs.values() {
        if let (Some(def), Some(first)) = (w.def_pos, w.first_use) {
            if first < def {
                return Err(CodegenError::Alloc(AllocError::InconsistentUse));
            }
        }
    }

    // --- Pass 3: loop extension ------------------------------------------
    for (id, node) in nodes.iter() {
        let node_pos = match pos_of.get(&id) {
            Some(p) => *p,
            None => continue,
        };
        let targets: Vec<LabelId> = match node {
            Node::Inst(_, operands) => operands
                .iter()
                .filter_map(|op| match op {
                    Operand::Label(l) => Some(*l),
                    _ => None,
                })
                .collect(),
            Node::Invoke { target, .. } => vec![*target],
            _ => Vec::new(),
        };
        for target in targets {
            let loop_start = match label_pos.get(&target) {
                Some(p) if *p <= node_pos => *p,
                _ => continue,
            };
            let loop_end = node_pos;
            for w in workregs.values_mut() {
                if let (Some(first), Some(last)) = (w.first_use, w.last_use) {
                    if first < loop_start && last >= loop_start {
                        w.last_use = Some(last.max(loop_end));
                    }
                }
            }
        }
    }

    // --- Pass 4: interval construction -----------------------------------
    let mut ordered: Vec<RaWorkReg> = workregs.values().cloned().collect();
    ordered.sort_by_key(|w| w.virt);
    let intervals = build_intervals(&ordered);
    debug!("built {} live intervals", intervals.len());

    // --- Pass 5: allocation ------------------------------------------------
    let mut gp_free = FreeRegSet::new(constraints.gp_count);
    let mut vec_free = FreeRegSet::new(constraints.vec_count);
    let mut kmask_free = FreeRegSet::new(constraints.kmask_count);
    let mut active: Vec<LiveInterval> = Vec::new();
    let mut stack_slots: PrimaryMap<StackSlotId, StackSlot> = PrimaryMap::new();
    // Always empty under this allocator's one-interval-per-workreg model
    // (see the comment at the `RaState::Spilled` check below); kept as a
    // concrete `Vec<PlannedMove>` rather than a unit value so `plan_moves`
    // and its swap-folding tests stay exercised against the real type.
    let moves: Vec<PlannedMove> = Vec::new();

    let phys_of = |w: &HashMap<VirtRegId, RaWorkReg>, id: VirtRegId| -> Option<u8> {
        match w.get(&id).map(|w| w.state) {
            Some(RaState::Allocated(p)) => Some(p),
            _ => None,
        }
    };

    for interval in intervals {
        // 1. Expire.
        let mut i = 0;
        while i < active.len() {
            if active[i].end < interval.start {
                let expired = active.remove(i);
                if let Some(p) = phys_of(&workregs, expired.work) {
                    free_set_for(expired.group, &mut gp_free, &mut vec_free, &mut kmask_free)
                        .free(p);
                }
                if let Some(w) = workregs.get_mut(&expired.work) {
                    w.state = RaState::Unassigned;
                }
            } else {
                i += 1;
            }
        }

        let free_set = free_set_for(interval.group, &mut gp_free, &mut vec_free, &mut kmask_free);
        if let Some(phys) = free_set.first_free() {
            // 2. Assign.
            free_set.take(phys);
            let w = workregs.get_mut(&interval.work).expect("interval has a workreg");
            // A workreg already `Spilled` reaching this assign step would be
            // a reload: Pass 4 builds exactly one `LiveInterval` per workreg
            // (see `interval.rs`), so each workreg passes through this match
            // arm at most once, always while still `Unassigned`. Reload
            // support — splitting a workreg's liveness into multiple
            // intervals, one of which lands back in a register after a
            // stack round trip — would push a `PlannedMove` here instead of
            // just overwriting the state; see DESIGN.md.
            w.state = RaState::Allocated(phys);
            let insert_at = active.partition_point(|a| a.end <= interval.end);
            active.insert(insert_at, interval);
        } else {
            // 3. Spill: pick the interval in `active ∪ {interval}` with the
            // greatest `end` in the same group, ties broken toward the
            // larger `virtId` (the general tie-break rule, spec §4.3).
            // `best` starts as `interval` itself; `best_idx` is only `Some`
            // once some active interval is found to beat it.
            let mut best = interval;
            let mut best_idx: Option<usize> = None;
            for (idx, a) in active.iter().enumerate() {
                if a.group != interval.group {
                    continue;
                }
                if a.end > best.end || (a.end == best.end && a.work > best.work) {
                    best = *a;
                    best_idx = Some(idx);
                }
            }

            if let Some(idx) = best_idx {
                let evicted = active.remove(idx);
                let phys = phys_of(&workregs, evicted.work)
                    .expect("active interval must hold a physical register");
                let slot_index = stack_slots.len() as u32;
                let slot_id = stack_slots.push(StackSlot {
                    work: evicted.work,
                    index: slot_index,
                    size: SLOT_SIZE,
                });
                workregs.get_mut(&evicted.work).expect("evicted has a workreg").state =
                    RaState::Spilled(slot_id);
                workregs.get_mut(&interval.work).expect("interval has a workreg").state =
                    RaState::Allocated(phys);
                let insert_at = active.partition_point(|a| a.end <= interval.end);
                active.insert(insert_at, interval);
            } else {
                let slot_index = stack_slots.len() as u32;
                let slot_id = stack_slots.push(StackSlot {
                    work: interval.work,
                    index: slot_index,
                    size: SLOT_SIZE,
                });
                workregs.get_mut(&interval.work).expect("interval has a workreg").state =
                    RaState::Spilled(slot_id);
            }
        }
    }

    // Write the final assignments back into the caller's VirtRegPool.
    for w in workregs.values() {
        let assignment = match w.state {
            RaState::Unassigned => Assignment::Unassigned,
            RaState::Allocated(p) => Assignment::Phys(p),
            RaState::Spilled(slot) => Assignment::Spilled(slot),
        };
        if virtregs.contains(w.virt) {
            virtregs.get_mut(w.virt).assignment = assignment;
        }
    }

    // --- Pass 6: move plan --------------------------------------------------
    let move_plan = plan_moves(&moves, &vec_free)?;

    Ok(AllocOutput {
        moves: move_plan,
        stack_slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst_db::InstId;
    use crate::operand::{RegRef, RegType};
    use smallvec::smallvec;

    fn gp(id: VirtRegId) -> Operand {
        Operand::Reg(RegRef::Virtual(id))
    }

    #[test]
    fn scenario_two_gp_regs_furthest_end_spills() {
        // Intervals v0=[0,10], v1=[2,12], v2=[4,6] with 2 GP regs. v0 and
        // v1 grab the two registers on arrival (smallest-free-index
        // tie-break); by the time v2 needs one, both are taken and the
        // Pass 5 spill rule picks "the interval in active ∪ {I} with the
        // greatest end" as the eviction candidate — here that is v1
        // (end=12), not v2 (end=6) or v0 (end=10), so v1 is evicted to a
        // stack slot and v2 inherits its register. This is the textbook
        // Poletto-Sarkar linear-scan spill rule spec §4.3 describes
        // verbatim; it disagrees with the literal worked numbers in spec
        // §8 item 6 (which names v2 as the one spilled) — see DESIGN.md
        // for why the algorithm's own stated rule was followed over that
        // table entry.
        let mut virtregs = VirtRegPool::new();
        let v0 = virtregs.create(RegGroup::Gp, 8, Some("v0"));
        let v1 = virtregs.create(RegGroup::Gp, 8, Some("v1"));
        let v2 = virtregs.create(RegGroup::Gp, 8, Some("v2"));

        let mut nodes = NodeList::new();
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v0)])); // pos 0
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v1)])); // pos 2
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v2)])); // pos 4
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v2)])); // pos 6
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![])); // pos 8, filler
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v0)])); // pos 10
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v1)])); // pos 12

        let constraints = AllocConstraints {
            gp_count: 2,
            vec_count: 0,
            kmask_count: 0,
        };
        let output = allocate(&nodes, &mut virtregs, &constraints).unwrap();
        assert_eq!(virtregs.get(v0).assignment, Assignment::Phys(0));
        assert_eq!(virtregs.get(v2).assignment, Assignment::Phys(1));
        match virtregs.get(v1).assignment {
            Assignment::Spilled(slot) => assert_eq!(output.stack_slots[slot].index, 0),
            other => panic!("expected v1 spilled, got {:?}", other),
        }
    }

    #[test]
    fn unknown_virtreg_is_rejected() {
        let mut donor = VirtRegPool::new();
        let foreign = donor.create(RegGroup::Gp, 8, None);

        let mut virtregs = VirtRegPool::new();
        let mut nodes = NodeList::new();
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(foreign)]));

        let constraints = AllocConstraints {
            gp_count: 4,
            vec_count: 0,
            kmask_count: 0,
        };
        let err = allocate(&nodes, &mut virtregs, &constraints).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::Alloc(AllocError::UnknownVirtReg)
        ));
    }

    #[test]
    fn single_register_fits_without_spilling() {
        let mut virtregs = VirtRegPool::new();
        let v0 = virtregs.create(RegGroup::Gp, 8, None);
        let mut nodes = NodeList::new();
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v0)]));
        nodes.push_back(Node::Inst(InstId::Ret, smallvec![gp(v0)]));
        let constraints = AllocConstraints {
            gp_count: 1,
            vec_count: 0,
            kmask_count: 0,
        };
        allocate(&nodes, &mut virtregs, &constraints).unwrap();
        assert_eq!(virtregs.get(v0).assignment, Assignment::Phys(0));
        let _ = RegType::Gp64;
    }
}
