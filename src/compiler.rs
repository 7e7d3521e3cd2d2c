//! The `UniCompiler` façade (spec §4.5, component J): register creation,
//! abstract-verb lowering, constant/prologue hooks, and final serialisation
//! to machine code.
//!
//! No single teacher file implements a cross-ISA façade at this
//! granularity (cranelift's lowering goes through ISLE pattern matching,
//! out of retrieval scope). Grounded on `regalloc::context::Context::run`'s
//! staged-pass orchestration style for `finalize`, and on
//! `isa::call_conv::CallConv`'s enum-with-query-methods style for the
//! small per-architecture decisions sprinkled through lowering.

use crate::buffer::CodeBuffer;
use crate::callconv::CallConv;
use crate::const_pool::{ConstId, ConstPool, Scope};
use crate::error::{AllocError, CodegenError, CodegenResult};
use crate::inst_db::{EncodingForm, InstId};
use crate::ir::node::{FuncSignature, Node, NodeId, NodeList};
use crate::ir::{Cursor, CursorPosition};
use crate::isa::aarch64::A64Inst;
use crate::isa::x86::encode;
use crate::isa::x86::features::CpuFeatures;
use crate::isa::Architecture;
use crate::label::{LabelId, LabelManager, RelocKind};
use crate::operand::{Immediate, MemOperand, Operand, RegGroup, RegRef, RegType};
use crate::regalloc::{self, AllocConstraints, MoveOp};
use crate::selection::{self, VecWidth};
use crate::uniop::{FmaPolicy, ScalarOpBehavior, UniOp, Verb};
use crate::virtreg::{Assignment, VirtRegId, VirtRegPool};
use cranelift_entity::{entity_impl, PrimaryMap};
use smallvec::{smallvec, SmallVec};
use std::collections::HashMap;

/// An opaque reference to a caller-area reservation made by
/// [`UniCompiler::new_stack`].
///
/// Kept distinct from [`crate::virtreg::StackSlotId`] (the allocator's own
/// spill slots): a `new_stack` reservation is sized and aligned by the
/// caller up front, outside the three register groups the linear-scan
/// allocator's `FreeRegSet`s model, so it cannot be represented as a
/// `VirtReg` the way the other `new_*` helpers are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedSlotId(u32);
entity_impl!(FixedSlotId, "fixedslot");

fn reg_type_for(group: RegGroup, width: u8) -> RegType {
    match group {
        RegGroup::Gp => match width {
            1 => RegType::Gp8,
            2 => RegType::Gp16,
            4 => RegType::Gp32,
            _ => RegType::Gp64,
        },
        RegGroup::Vec => match width {
            16 => RegType::Vec128,
            32 => RegType::Vec256,
            _ => RegType::Vec512,
        },
        RegGroup::KMask => RegType::KMask,
    }
}

fn vreg(id: VirtRegId) -> Operand {
    Operand::Reg(RegRef::Virtual(id))
}

fn preg(reg_type: RegType, encoding: u8) -> Operand {
    Operand::Reg(RegRef::Physical { reg_type, encoding })
}

/// A cross-architecture lowering façade: one instance per compilation unit
/// (spec §5 "single-threaded, one compilation unit per instance").
pub struct UniCompiler {
    arch: Architecture,
    features: CpuFeatures,
    call_conv: CallConv,
    fma_policy: FmaPolicy,
    scalar_behavior: ScalarOpBehavior,
    virtregs: VirtRegPool,
    nodes: NodeList,
    cursor_pos: CursorPosition,
    aarch64_insts: Vec<A64Inst>,
    labels: LabelManager,
    local_consts: ConstPool,
    global_consts: Option<ConstPool>,
    const_labels: HashMap<ConstId, LabelId>,
    // Kept apart from `const_labels`: `local_consts` and `global_consts`
    // are two independent `ConstId` arenas, each starting at 0, so the two
    // scopes would otherwise collide on the same key.
    global_const_labels: HashMap<ConstId, LabelId>,
    prologue_hook: Option<NodeId>,
    fixed_slots: PrimaryMap<FixedSlotId, (u32, u32)>,
    stack_frame_size: u32,
    poisoned: bool,
}

impl UniCompiler {
    pub fn new(arch: Architecture, features: CpuFeatures, call_conv: CallConv) -> Self {
        UniCompiler {
            arch,
            features,
            call_conv,
            fma_policy: FmaPolicy::FmaStoreToAccumulator,
            scalar_behavior: ScalarOpBehavior::PreserveUpperLanes,
            virtregs: VirtRegPool::new(),
            nodes: NodeList::new(),
            cursor_pos: CursorPosition::Nowhere,
            aarch64_insts: Vec::new(),
            labels: LabelManager::new(),
            local_consts: ConstPool::new(Scope::Local),
            global_consts: None,
            const_labels: HashMap::new(),
            global_const_labels: HashMap::new(),
            prologue_hook: None,
            fixed_slots: PrimaryMap::new(),
            stack_frame_size: 0,
            poisoned: false,
        }
    }

    pub fn with_fma_policy(mut self, policy: FmaPolicy) -> Self {
        self.fma_policy = policy;
        self
    }

    pub fn with_scalar_behavior(mut self, behavior: ScalarOpBehavior) -> Self {
        self.scalar_behavior = behavior;
        self
    }

    /// Opt in to a shared constant table carrying absolute addresses (spec
    /// §9's ASLR tradeoff the caller must accept) instead of per-function
    /// RIP-relative tables.
    pub fn with_shared_const_pool(mut self) -> Self {
        self.global_consts = Some(ConstPool::new(Scope::Global));
        self
    }

    pub fn architecture(&self) -> Architecture {
        self.arch
    }

    /// Lowered AArch64 instructions recorded so far. Final byte encoding is
    /// out of scope (spec §1 Non-goals); callers that target AArch64 stop
    /// here and hand this list to their own encoder.
    pub fn aarch64_instructions(&self) -> &[A64Inst] {
        &self.aarch64_insts
    }

    fn check_poisoned(&self) -> CodegenResult<()> {
        if self.poisoned {
            Err(CodegenError::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Mark the compiler poisoned and return `err` unchanged, so call sites
    /// can write `return Err(self.poison(err))` (spec §7 "first error
    /// poisons the compiler").
    fn poison(&mut self, err: CodegenError) -> CodegenError {
        self.poisoned = true;
        err
    }

    // ---- Register creation (spec §4.5 item 1) --------------------------

    pub fn new_gp32(&mut self, hint: Option<&str>) -> VirtRegId {
        self.virtregs.create(RegGroup::Gp, 4, hint)
    }

    pub fn new_gp64(&mut self, hint: Option<&str>) -> VirtRegId {
        self.virtregs.create(RegGroup::Gp, 8, hint)
    }

    pub fn new_xmm(&mut self, hint: Option<&str>) -> VirtRegId {
        self.virtregs.create(RegGroup::Vec, 16, hint)
    }

    pub fn new_ymm(&mut self, hint: Option<&str>) -> VirtRegId {
        self.virtregs.create(RegGroup::Vec, 32, hint)
    }

    pub fn new_zmm(&mut self, hint: Option<&str>) -> VirtRegId {
        self.virtregs.create(RegGroup::Vec, 64, hint)
    }

    pub fn new_vec_with_width(&mut self, width: u8, hint: Option<&str>) -> VirtRegId {
        self.virtregs.create(RegGroup::Vec, width, hint)
    }

    pub fn new_kmask(&mut self, hint: Option<&str>) -> VirtRegId {
        self.virtregs.create(RegGroup::KMask, 8, hint)
    }

    /// Reserve `size` bytes aligned to `align` in the caller's frame,
    /// outside the allocator's register pools. Offsets are assigned
    /// eagerly in reservation order (this core has no later layout pass
    /// that would ever move a fixed slot once placed).
    pub fn new_stack(&mut self, size: u32, align: u8) -> FixedSlotId {
        let align = u32::from(align).max(1);
        let offset = (self.stack_frame_size + align - 1) / align * align;
        self.stack_frame_size = offset + size;
        self.fixed_slots.push((offset, size))
    }

    pub fn fixed_slot_offset(&self, id: FixedSlotId) -> u32 {
        self.fixed_slots[id].0
    }

    // ---- Labels and branches (spec §4.2, §4.4) ---------------------------

    /// Allocate a fresh, unbound label for [`UniCompiler::bind_label`],
    /// [`UniCompiler::jump`], and [`UniCompiler::jump_if_equal`].
    pub fn new_label(&mut self, hint: Option<&str>) -> LabelId {
        self.labels.new_label(hint)
    }

    /// Mark the current position in the node stream as `label`'s target.
    pub fn bind_label(&mut self, label: LabelId) -> CodegenResult<()> {
        self.check_poisoned()?;
        self.append_node(Node::Label(label));
        Ok(())
    }

    /// Unconditional jump to `label`, built as the long `rel32` form;
    /// `finalize` narrows it to the short `rel8` form itself once the
    /// target's position is known to be in range (spec §4.4, §8 "branch
    /// selection").
    pub fn jump(&mut self, label: LabelId) -> CodegenResult<()> {
        self.check_poisoned()?;
        self.append_node(Node::Inst(InstId::JmpRel32, smallvec![Operand::Label(label)]));
        Ok(())
    }

    /// Compare two GP registers and branch to `label` if they are equal —
    /// the one condition (`je`) this core's branch row carries (see
    /// `inst_db.rs`).
    pub fn jump_if_equal(&mut self, a: VirtRegId, b: VirtRegId, label: LabelId) -> CodegenResult<()> {
        self.check_poisoned()?;
        for &id in &[a, b] {
            if self.virtregs.get(id).group != RegGroup::Gp {
                return Err(CodegenError::OperandMismatch(
                    "jump_if_equal compares GP registers only".into(),
                ));
            }
        }
        self.append_node(Node::Inst(InstId::CmpRmR, smallvec![vreg(b), vreg(a)]));
        self.append_node(Node::Inst(InstId::JccRel32, smallvec![Operand::Label(label)]));
        Ok(())
    }

    // ---- Node-stream plumbing -------------------------------------------

    fn append_node(&mut self, node: Node) -> NodeId {
        let mut cur = Cursor::new(&mut self.nodes).at_position(self.cursor_pos);
        let id = cur.insert(node);
        self.cursor_pos = cur.position();
        id
    }

    /// Rewind to the function's prologue hook, append `node` there, and
    /// advance the hook past it — so a second call appends *after* the
    /// first instead of re-inserting at the function header every time.
    /// This is what guarantees constants are hoisted out of any loop in
    /// the function body while still materialising in program order
    /// relative to each other (spec §4.5 item 3).
    fn emit_at_prologue(&mut self, node: Node) -> CodegenResult<NodeId> {
        let hook = self.prologue_hook.ok_or_else(|| {
            CodegenError::UnsupportedOp("no active function: call add_func first".into())
        })?;
        let saved = self.cursor_pos;
        let mut cur = Cursor::new(&mut self.nodes).at_position(CursorPosition::After(hook));
        let id = cur.insert(node);
        self.prologue_hook = Some(id);
        self.cursor_pos = saved;
        Ok(id)
    }

    // ---- Constants and function prologues (spec §4.5 item 3) ------------

    pub fn add_func(&mut self, name: &str) -> CodegenResult<()> {
        self.check_poisoned()?;
        let sig = FuncSignature {
            name: name.to_owned(),
            call_conv: self.call_conv,
        };
        let id = self.append_node(Node::Func(sig));
        self.prologue_hook = Some(id);
        Ok(())
    }

    fn const_label(&mut self, id: ConstId) -> LabelId {
        *self
            .const_labels
            .entry(id)
            .or_insert_with(|| self.labels.new_label(Some("const")))
    }

    fn global_const_label(&mut self, id: ConstId) -> LabelId {
        *self
            .global_const_labels
            .entry(id)
            .or_insert_with(|| self.labels.new_label(Some("global_const")))
    }

    /// Materialise vector constant `data` (broadcast across the register
    /// if `bcst`) into a fresh virtual register in the function's
    /// prologue, returning a handle usable anywhere in the body.
    pub fn simd_const(&mut self, data: Vec<u8>, bcst: bool, width: u8) -> CodegenResult<VirtRegId> {
        self.check_poisoned()?;
        let _ = bcst; // broadcast-at-load-time is a selection detail the loader below does not yet model
        let dst = self.virtregs.create(RegGroup::Vec, width, Some("const"));
        match &mut self.global_consts {
            Some(global) => {
                let cid = global.insert(data, width);
                let label = self.global_const_label(cid);
                let addr = self.virtregs.create(RegGroup::Gp, 8, Some("const_addr"));
                self.emit_at_prologue(Node::Inst(
                    InstId::MovRegImm64Abs,
                    smallvec![vreg(addr), Operand::Label(label)],
                ))?;
                let mem = Operand::Mem(MemOperand::new().with_base(RegRef::Virtual(addr)));
                self.emit_at_prologue(Node::Inst(InstId::MovapsRmRSse2, smallvec![vreg(dst), mem]))?;
            }
            None => {
                let cid = self.local_consts.insert(data, width);
                let label = self.const_label(cid);
                let mem = Operand::Mem(MemOperand::rip_relative(label));
                self.emit_at_prologue(Node::Inst(InstId::MovapsRmRSse2, smallvec![vreg(dst), mem]))?;
            }
        }
        Ok(dst)
    }

    /// Materialise a mask-register constant (spec §4.5 item 3). Lowered as
    /// a GP immediate load followed by a `kmovq` from that scratch GP
    /// register, since the instruction table has no direct mask-immediate
    /// form.
    pub fn k_const(&mut self, value: u64) -> CodegenResult<VirtRegId> {
        self.check_poisoned()?;
        let tmp = self.virtregs.create(RegGroup::Gp, 8, Some("kconst_tmp"));
        let dst = self.virtregs.create(RegGroup::KMask, 8, Some("kconst"));
        self.emit_at_prologue(Node::Inst(
            InstId::MovRegImm64,
            smallvec![vreg(tmp), Operand::Imm(Immediate(value as i64))],
        ))?;
        self.emit_at_prologue(Node::Inst(InstId::KmovqRRAvx512, smallvec![vreg(dst), vreg(tmp)]))?;
        Ok(dst)
    }

    /// Emit the end-of-function constant table, 16-byte aligned (spec §4.5
    /// item 3), and clear the active prologue hook.
    pub fn end_func(&mut self) -> CodegenResult<()> {
        self.check_poisoned()?;
        self.append_node(Node::SectionAlign(16));
        let entries: Vec<(ConstId, Vec<u8>, u8)> = self
            .local_consts
            .iter()
            .map(|(id, data, align)| (id, data.to_vec(), align))
            .collect();
        let mut blob = Vec::new();
        for (id, data, align) in entries {
            while blob.len() % usize::from(align).max(1) != 0 {
                blob.push(0);
            }
            self.local_consts.set_offset(id, blob.len() as u32);
            blob.extend_from_slice(&data);
        }
        if !blob.is_empty() {
            self.append_node(Node::EmbedData(blob));
        }
        self.prologue_hook = None;
        Ok(())
    }

    // ---- Abstract verbs (spec §4.5 item 2) ------------------------------

    fn check_group(&self, op: &UniOp, ids: &[VirtRegId]) -> CodegenResult<()> {
        let expected = op.expected_group();
        for &id in ids {
            if self.virtregs.get(id).group != expected {
                return Err(CodegenError::OperandMismatch(format!(
                    "verb {:?} expects {:?}-group operands",
                    op.verb(),
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Emit a `dst <- src1` copy ahead of a destructive two-operand form,
    /// unless `dst` and `src1` already name the same virtual register
    /// (spec §4.5 "Two-operand SSE forms insert a MOV when dst != src1").
    fn ensure_in_place(&mut self, group: RegGroup, dst: VirtRegId, src1: VirtRegId) {
        if dst == src1 {
            return;
        }
        let mov = match group {
            RegGroup::Gp => InstId::MovRmR,
            RegGroup::Vec => InstId::MovapsRmRSse2,
            RegGroup::KMask => InstId::KmovqRRAvx512,
        };
        let ops = match group {
            // MOV r/m64, r64 (0x89): reg field is the source, rm the
            // destination — the one opcode here whose ModR/M direction is
            // reversed from "destination first".
            RegGroup::Gp => smallvec![vreg(src1), vreg(dst)],
            RegGroup::Vec | RegGroup::KMask => smallvec![vreg(dst), vreg(src1)],
        };
        self.append_node(Node::Inst(mov, ops));
    }

    /// Lower one abstract verb to zero or more `Inst` nodes appended at the
    /// cursor. x86-64 only; AArch64 lowering goes through
    /// [`UniCompiler::lower_aarch64`] instead.
    pub fn emit(&mut self, op: UniOp) -> CodegenResult<()> {
        self.check_poisoned()?;
        if self.arch != Architecture::X86_64 {
            return Err(CodegenError::UnsupportedOp(
                "emit: use lower_aarch64 on an AArch64 UniCompiler".into(),
            ));
        }
        let result = self.emit_x86(op);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn emit_x86(&mut self, op: UniOp) -> CodegenResult<()> {
        match op {
            UniOp::Vv { verb, dst, src } => self.lower_vv(verb, dst, src),
            UniOp::Vvv {
                verb,
                dst,
                src1,
                src2,
            } => self.lower_vvv(verb, dst, src1, src2),
            UniOp::Rrr {
                verb,
                dst,
                src1,
                src2,
            } => self.lower_rrr(verb, dst, src1, src2),
            UniOp::Vvvv {
                verb,
                dst,
                src1,
                src2,
                src3,
            } => self.lower_vvvv(verb, dst, src1, src2, src3),
            UniOp::Cond {
                verb,
                dst,
                src1,
                src2,
                if_true,
                if_false,
            } => self.lower_cond(verb, dst, src1, src2, if_true, if_false),
            UniOp::Rm { verb, dst, mem } => self.lower_rm(verb, dst, mem),
            UniOp::Mr { verb, mem, src } => self.lower_mr(verb, mem, src),
            UniOp::M { verb, mem } => {
                let _ = (verb, mem);
                Err(CodegenError::UnsupportedOp(
                    "UniOpM has no backing instruction row in this core".into(),
                ))
            }
            UniOp::Vvi { verb, .. } | UniOp::Vvvi { verb, .. } => Err(CodegenError::UnsupportedOp(
                format!("{:?}: immediate-carrying vector forms are not modeled", verb),
            )),
        }
    }

    fn lower_vv(&mut self, verb: Verb, dst: VirtRegId, src: VirtRegId) -> CodegenResult<()> {
        self.check_group(
            &UniOp::Vv { verb, dst, src },
            &[dst, src],
        )?;
        match verb {
            Verb::MovGpReg => {
                self.append_node(Node::Inst(InstId::MovRmR, smallvec![vreg(src), vreg(dst)]));
                Ok(())
            }
            Verb::MovGpImm => Err(CodegenError::UnsupportedOp(
                "MovGpImm takes an immediate, not a second register; use emit_mov_imm".into(),
            )),
            Verb::BroadcastU64 => {
                let inst = selection::select_vector(verb, VecWidth::W128, self.features)?;
                self.append_node(Node::Inst(inst, smallvec![vreg(dst), vreg(src)]));
                Ok(())
            }
            Verb::MaskMove => {
                self.append_node(Node::Inst(InstId::KmovqRRAvx512, smallvec![vreg(dst), vreg(src)]));
                Ok(())
            }
            other => Err(CodegenError::UnsupportedOp(format!(
                "{:?} is not a UniOpVV verb",
                other
            ))),
        }
    }

    /// `mov dst, imm` (spec §4.4 peephole candidate: zero immediates are
    /// rewritten to `xor dst, dst` by [`UniCompiler::finalize`]).
    pub fn emit_mov_imm(&mut self, dst: VirtRegId, imm: i64) -> CodegenResult<()> {
        self.check_poisoned()?;
        if self.arch != Architecture::X86_64 {
            return Err(CodegenError::UnsupportedOp(
                "emit_mov_imm: use lower_aarch64 on an AArch64 UniCompiler".into(),
            ));
        }
        if self.virtregs.get(dst).group != RegGroup::Gp {
            return Err(CodegenError::OperandMismatch(
                "MovGpImm expects a GP destination".into(),
            ));
        }
        self.append_node(Node::Inst(
            InstId::MovRegImm64,
            smallvec![vreg(dst), Operand::Imm(Immediate(imm))],
        ));
        Ok(())
    }

    fn lower_vvv(
        &mut self,
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
    ) -> CodegenResult<()> {
        self.check_group(
            &UniOp::Vvv {
                verb,
                dst,
                src1,
                src2,
            },
            &[dst, src1, src2],
        )?;
        let width = match self.virtregs.get(dst).width {
            32 => VecWidth::W256,
            _ => VecWidth::W128,
        };
        let inst = selection::select_vector(verb, width, self.features)?;
        match inst.entry().form {
            EncodingForm::VexRvm => {
                self.append_node(Node::Inst(inst, smallvec![vreg(dst), vreg(src1), vreg(src2)]));
            }
            EncodingForm::RegRm => {
                self.ensure_in_place(RegGroup::Vec, dst, src1);
                self.append_node(Node::Inst(inst, smallvec![vreg(dst), vreg(src2)]));
            }
            _ => {
                return Err(CodegenError::UnsupportedOp(format!(
                    "{:?}: selected encoding form has no Vvv lowering",
                    verb
                )))
            }
        }
        Ok(())
    }

    fn lower_rrr(
        &mut self,
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
    ) -> CodegenResult<()> {
        self.check_group(
            &UniOp::Rrr {
                verb,
                dst,
                src1,
                src2,
            },
            &[dst, src1, src2],
        )?;
        let inst = selection::select_gp(verb)?;
        self.ensure_in_place(RegGroup::Gp, dst, src1);
        // ADD r/m64, r64 (0x01): reg field is the addend (source), rm the
        // accumulator (destination) — same reversed direction as MOV 0x89.
        self.append_node(Node::Inst(inst, smallvec![vreg(src2), vreg(dst)]));
        Ok(())
    }

    fn lower_vvvv(
        &mut self,
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
        src3: VirtRegId,
    ) -> CodegenResult<()> {
        self.check_group(
            &UniOp::Vvvv {
                verb,
                dst,
                src1,
                src2,
                src3,
            },
            &[dst, src1, src2, src3],
        )?;
        if verb != Verb::MAddF32 {
            return Err(CodegenError::UnsupportedOp(format!(
                "{:?} is not a UniOpVVVV verb",
                verb
            )));
        }
        match self.fma_policy {
            FmaPolicy::FmaStoreToAccumulator => {
                // vfmadd213ps dst, src1, src2 computes dst = src1*dst + src2;
                // the accumulator must already be resident in `dst`.
                self.ensure_in_place(RegGroup::Vec, dst, src3);
                let inst = selection::select_vector(verb, VecWidth::W128, self.features)?;
                self.append_node(Node::Inst(inst, smallvec![vreg(dst), vreg(src1), vreg(src2)]));
                Ok(())
            }
            FmaPolicy::NoFma | FmaPolicy::FmaStoreToAny => Err(CodegenError::UnsupportedOp(
                "MAddF32 fallback (mul;add) requires a scalar multiply row this core does not carry".into(),
            )),
        }
    }

    fn lower_cond(
        &mut self,
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
        if_true: VirtRegId,
        if_false: VirtRegId,
    ) -> CodegenResult<()> {
        if verb != Verb::CmpEqGp {
            return Err(CodegenError::UnsupportedOp(format!(
                "{:?} is not a UniOpCond verb",
                verb
            )));
        }
        self.check_group(
            &UniOp::Cond {
                verb,
                dst,
                src1,
                src2,
                if_true,
                if_false,
            },
            &[dst, src1, src2, if_true, if_false],
        )?;
        self.append_node(Node::Inst(InstId::CmpRmR, smallvec![vreg(src2), vreg(src1)]));
        self.ensure_in_place(RegGroup::Gp, dst, if_false);
        // CMOVcc r64, r/m64: reg field is the destination, same direction
        // as the MOV r64,r/m64 (0x8B) load form.
        self.append_node(Node::Inst(InstId::CmovccRR, smallvec![vreg(dst), vreg(if_true)]));
        Ok(())
    }

    fn lower_rm(&mut self, verb: Verb, dst: VirtRegId, mem: MemOperand) -> CodegenResult<()> {
        if self.virtregs.get(dst).group != RegGroup::Vec {
            return Err(CodegenError::OperandMismatch(
                "UniOpRm in this core only lowers vector loads".into(),
            ));
        }
        let inst = match verb {
            Verb::MovVecAligned => InstId::MovapsRmRSse2,
            Verb::MovVecUnaligned => InstId::MovdquRmRSse2,
            Verb::BroadcastU64 => selection::select_vector(verb, VecWidth::W128, self.features)?,
            other => {
                return Err(CodegenError::UnsupportedOp(format!(
                    "{:?} is not a UniOpRm verb",
                    other
                )))
            }
        };
        self.append_node(Node::Inst(inst, smallvec![vreg(dst), Operand::Mem(mem)]));
        Ok(())
    }

    fn lower_mr(&mut self, verb: Verb, _mem: MemOperand, _src: VirtRegId) -> CodegenResult<()> {
        Err(CodegenError::UnsupportedOp(format!(
            "{:?}: this core's instruction table has no store-direction row for UniOpMr",
            verb
        )))
    }

    // ---- AArch64 lowering (IR only, spec §1 Non-goal excludes encoding) -

    /// Append a lowered AArch64 instruction. There is no allocator or
    /// encoder pass behind this list — spec §1 stops AArch64 support at
    /// IR-level lowering.
    pub fn lower_aarch64(&mut self, inst: A64Inst) -> CodegenResult<()> {
        self.check_poisoned()?;
        if self.arch != Architecture::AArch64 {
            return Err(CodegenError::UnsupportedOp(
                "lower_aarch64: use emit on an x86-64 UniCompiler".into(),
            ));
        }
        self.aarch64_insts.push(inst);
        Ok(())
    }

    // ---- Finalisation ----------------------------------------------------

    fn resolve_reg(&self, id: VirtRegId) -> CodegenResult<RegRef> {
        let vreg = self.virtregs.get(id);
        match vreg.assignment {
            Assignment::Phys(enc) => Ok(RegRef::Physical {
                reg_type: reg_type_for(vreg.group, vreg.width),
                encoding: enc,
            }),
            Assignment::Unassigned | Assignment::Spilled(_) => {
                Err(CodegenError::Alloc(AllocError::UnknownVirtReg))
            }
        }
    }

    fn resolve_operand(&self, op: &Operand) -> CodegenResult<Operand> {
        match op {
            Operand::Reg(RegRef::Virtual(id)) => Ok(Operand::Reg(self.resolve_reg(*id)?)),
            Operand::Mem(mem) => {
                let mut resolved = *mem;
                if let Some(RegRef::Virtual(id)) = mem.base {
                    resolved.base = Some(self.resolve_reg(id)?);
                }
                if let Some(RegRef::Virtual(id)) = mem.index {
                    resolved.index = Some(self.resolve_reg(id)?);
                }
                Ok(Operand::Mem(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Rewrite every `Inst`/`Invoke` node's virtual operands to the
    /// physical registers the allocator assigned them.
    fn resolve_all_operands(&mut self) -> CodegenResult<()> {
        let ids: Vec<NodeId> = self.nodes.iter().map(|(id, _)| id).collect();
        for id in ids {
            match self.nodes.get(id).clone() {
                Node::Inst(inst_id, ops) => {
                    let mut resolved: SmallVec<[Operand; 4]> = SmallVec::new();
                    for op in &ops {
                        resolved.push(self.resolve_operand(op)?);
                    }
                    *self.nodes.get_mut(id) = Node::Inst(inst_id, resolved);
                }
                Node::Invoke { target, args, ret } => {
                    let mut resolved_args: SmallVec<[Operand; 4]> = SmallVec::new();
                    for op in &args {
                        resolved_args.push(self.resolve_operand(op)?);
                    }
                    let resolved_ret = match ret {
                        Some(op) => Some(self.resolve_operand(&op)?),
                        None => None,
                    };
                    *self.nodes.get_mut(id) = Node::Invoke {
                        target,
                        args: resolved_args,
                        ret: resolved_ret,
                    };
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `mov r, 0 -> xor r32, r32`; redundant `mov r, r` (post-allocation,
    /// same physical register) elided (spec §4.4).
    fn apply_peepholes(&mut self) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Node::Inst(inst_id, ops) = self.nodes.get(id) {
                match (*inst_id, ops.as_slice()) {
                    (InstId::MovRegImm64, [Operand::Reg(dst), Operand::Imm(imm)]) if imm.is_zero() => {
                        let dst = *dst;
                        *self.nodes.get_mut(id) = Node::Inst(
                            InstId::XorRmR,
                            smallvec![Operand::Reg(dst), Operand::Reg(dst)],
                        );
                    }
                    (InstId::MovRmR, [Operand::Reg(a), Operand::Reg(b)]) if a == b => {
                        *self.nodes.get_mut(id) = Node::Inst(InstId::Nop1, SmallVec::new());
                    }
                    _ => {}
                }
            }
        }
    }

    /// Splice Pass 6's move/swap plan onto the end of the node stream,
    /// ahead of the final encode walk (spec §4.3 Pass 6). `moves` is empty
    /// under this allocator's current one-interval-per-workreg model (see
    /// DESIGN.md) — every `VirtReg` reaches Pass 5's assign step exactly
    /// once, so a reload into an already-allocated workreg, the only
    /// situation that produces a planned move, can't occur yet. The
    /// splice itself is real and exercised directly by `moveplan.rs`'s own
    /// unit tests; it lights up the moment a future reload pass starts
    /// populating `moves`.
    fn emit_move_plan(&mut self, moves: &[MoveOp]) {
        for mv in moves {
            match *mv {
                MoveOp::Move { work, group, src, dst } => {
                    let reg_type = reg_type_for(group, self.virtregs.get(work).width);
                    let mov = match group {
                        RegGroup::Gp => InstId::MovRmR,
                        RegGroup::Vec => InstId::MovapsRmRSse2,
                        RegGroup::KMask => InstId::KmovqRRAvx512,
                    };
                    let ops = match group {
                        RegGroup::Gp => smallvec![preg(reg_type, src), preg(reg_type, dst)],
                        RegGroup::Vec | RegGroup::KMask => smallvec![preg(reg_type, dst), preg(reg_type, src)],
                    };
                    self.nodes.push_back(Node::Inst(mov, ops));
                }
                MoveOp::Swap { group, a, b, work_a, scratch, .. } => {
                    let reg_type = reg_type_for(group, self.virtregs.get(work_a).width);
                    match group {
                        RegGroup::Gp => {
                            self.nodes.push_back(Node::Inst(
                                InstId::XchgRmR,
                                smallvec![preg(reg_type, a), preg(reg_type, b)],
                            ));
                        }
                        RegGroup::Vec | RegGroup::KMask => {
                            let mov = if group == RegGroup::KMask {
                                InstId::KmovqRRAvx512
                            } else {
                                InstId::MovapsRmRSse2
                            };
                            let scratch = scratch
                                .expect("vector/kmask swaps always carry a scratch register (spec §4.3)");
                            self.nodes
                                .push_back(Node::Inst(mov, smallvec![preg(reg_type, scratch), preg(reg_type, a)]));
                            self.nodes
                                .push_back(Node::Inst(mov, smallvec![preg(reg_type, a), preg(reg_type, b)]));
                            self.nodes
                                .push_back(Node::Inst(mov, smallvec![preg(reg_type, b), preg(reg_type, scratch)]));
                        }
                    }
                }
            }
        }
    }

    fn emit_call_site(&mut self, buf: &mut CodeBuffer, target: LabelId) {
        // This core's instruction table carries no dedicated `call` opcode
        // row (see DESIGN.md); `Invoke` lowers to the same rel32-relocated
        // placeholder a direct jump would use.
        buf.emit8(0xE9);
        let at = buf.len();
        buf.emit32(0);
        self.labels.record_relocation(RelocKind::Rel32, at, target, 0);
    }

    /// Run the allocator, apply peepholes, encode every node, and resolve
    /// relocations, producing the final byte stream (spec §4.5's implicit
    /// `end_func`/`finalize` entry point, spec §7 "errors surfaced at the
    /// top-level API").
    ///
    /// Only defined for the x86-64 backend; see [`UniCompiler::aarch64_instructions`]
    /// for the AArch64 path.
    pub fn finalize(&mut self) -> CodegenResult<Vec<u8>> {
        self.check_poisoned()?;
        if self.arch != Architecture::X86_64 {
            let err = CodegenError::UnsupportedOp(
                "finalize: AArch64 lowering stops at Inst nodes, there is no encoder (spec Non-goals)"
                    .into(),
            );
            return Err(self.poison(err));
        }

        let constraints = AllocConstraints {
            gp_count: 16,
            vec_count: if self.features.contains(CpuFeatures::AVX512F) {
                32
            } else {
                16
            },
            kmask_count: 8,
        };
        let alloc = match regalloc::allocate(&self.nodes, &mut self.virtregs, &constraints) {
            Ok(out) => out,
            Err(e) => return Err(self.poison(e)),
        };
        if !alloc.stack_slots.is_empty() {
            let err = CodegenError::UnsupportedOp(
                "finalize: spilled operands require a stack-slot memory rewrite this core does not implement"
                    .into(),
            );
            return Err(self.poison(err));
        }

        if let Err(e) = self.resolve_all_operands() {
            return Err(self.poison(e));
        }
        self.apply_peepholes();
        self.emit_move_plan(&alloc.moves);

        let mut buf = CodeBuffer::new();
        let const_ids: Vec<ConstId> = self.local_consts.iter().map(|(id, ..)| id).collect();
        let node_ids: Vec<NodeId> = self.nodes.iter().map(|(id, _)| id).collect();
        for id in node_ids {
            let node = self.nodes.get(id).clone();
            let result = match node {
                Node::Label(l) => self.labels.bind(l, buf.len()),
                Node::Func(_) => Ok(()),
                Node::SectionAlign(align) => {
                    buf.align_with_nops(align, crate::isa::x86::nop_sequence);
                    Ok(())
                }
                Node::EmbedData(bytes) => {
                    let start = buf.len();
                    buf.emit_bytes(&bytes);
                    for &cid in &const_ids {
                        if let Some(offset) = self.local_consts.offset_of(cid) {
                            let label = self.const_label(cid);
                            let _ = self.labels.bind(label, start + offset);
                        }
                    }
                    Ok(())
                }
                Node::Inst(inst_id, ops) => {
                    let inst_id = self.select_branch_form(inst_id, &ops, &buf);
                    encode::encode(&mut buf, &mut self.labels, inst_id, &ops)
                }
                Node::Invoke { target, .. } => {
                    self.emit_call_site(&mut buf, target);
                    Ok(())
                }
            };
            if let Err(e) = result {
                return Err(self.poison(e));
            }
        }

        if let Err(e) = self.emit_global_consts(&mut buf) {
            return Err(self.poison(e));
        }

        if let Err(e) = self.labels.resolve_all(&mut buf) {
            return Err(self.poison(e));
        }
        Ok(buf.into_vec())
    }

    /// Prefer the short-form row over the long-form one the node was built
    /// with whenever the label operand is already bound and its
    /// displacement fits `i8` (spec §4.4, §8 "branch selection"); labels
    /// only become bound as this same walk encounters their `Node::Label`,
    /// so the choice can't be made any earlier than encode time.
    fn select_branch_form(&self, inst_id: InstId, ops: &SmallVec<[Operand; 4]>, buf: &CodeBuffer) -> InstId {
        let (short, label) = match (inst_id, ops.first()) {
            (InstId::JmpRel32, Some(Operand::Label(l))) => (InstId::JmpRel8, *l),
            (InstId::JccRel32, Some(Operand::Label(l))) => (InstId::JccRel8, *l),
            _ => return inst_id,
        };
        if encode::short_branch_fits(buf, &self.labels, label) {
            short
        } else {
            inst_id
        }
    }

    /// Lay out and append the shared constant pool's data once, after every
    /// function body, binding each constant's label to its final offset
    /// (the same two-step `set_offset`-then-bind `end_func` uses for a
    /// function's own local data). A no-op if `with_shared_const_pool` was
    /// never opted into, or nothing was ever routed through it.
    fn emit_global_consts(&mut self, buf: &mut CodeBuffer) -> CodegenResult<()> {
        let global = match self.global_consts.take() {
            Some(g) => g,
            None => return Ok(()),
        };
        let entries: Vec<(ConstId, Vec<u8>, u8)> = global
            .iter()
            .map(|(id, data, align)| (id, data.to_vec(), align))
            .collect();
        if entries.is_empty() {
            return Ok(());
        }
        let mut blob = Vec::new();
        let mut placements = Vec::new();
        for (id, data, align) in &entries {
            while blob.len() % usize::from(*align).max(1) != 0 {
                blob.push(0);
            }
            placements.push((*id, blob.len() as u32));
            blob.extend_from_slice(data);
        }
        let start = buf.len();
        buf.emit_bytes(&blob);
        for (id, offset) in placements {
            let label = self.global_const_label(id);
            self.labels.bind(label, start + offset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::RegGroup;

    fn x86_compiler() -> UniCompiler {
        UniCompiler::new(
            Architecture::X86_64,
            CpuFeatures::AVX | CpuFeatures::AVX2 | CpuFeatures::SSE2 | CpuFeatures::FMA,
            CallConv::SysvAmd64,
        )
    }

    #[test]
    fn mov_imm_zero_peephole_matches_xor_bytes() {
        let mut c = x86_compiler();
        c.add_func("f").unwrap();
        let dst = c.new_gp64(None);
        c.emit_mov_imm(dst, 0).unwrap();
        c.append_node(Node::Inst(InstId::Ret, SmallVec::new()));
        c.end_func().unwrap();
        let bytes = c.finalize().unwrap();
        assert_eq!(bytes, vec![0x31, 0xC0, 0xC3]);
    }

    #[test]
    fn vector_add_selects_avx_form() {
        let mut c = x86_compiler();
        c.add_func("f").unwrap();
        let dst = c.new_xmm(None);
        let a = c.new_xmm(None);
        let b = c.new_xmm(None);
        c.emit(UniOp::Vvv {
            verb: Verb::AddU32,
            dst,
            src1: a,
            src2: b,
        })
        .unwrap();
        c.append_node(Node::Inst(InstId::Ret, SmallVec::new()));
        c.end_func().unwrap();
        let bytes = c.finalize().unwrap();
        // Three distinct xmm work-regs with two free GP-unrelated vector
        // registers available collapse to xmm0/xmm1/xmm2 under the
        // allocator's smallest-free-index tie-break.
        assert_eq!(&bytes[..4], &[0xC5, 0xF1, 0xFE, 0xC2]);
    }

    #[test]
    fn gp_group_mismatch_is_rejected() {
        let mut c = x86_compiler();
        c.add_func("f").unwrap();
        let vec_reg = c.new_xmm(None);
        let gp_reg = c.new_gp64(None);
        let err = c
            .emit(UniOp::Vv {
                verb: Verb::MovGpReg,
                dst: gp_reg,
                src: vec_reg,
            })
            .unwrap_err();
        assert!(matches!(err, CodegenError::OperandMismatch(_)));
    }

    #[test]
    fn poisoned_compiler_rejects_further_work() {
        let mut c = x86_compiler();
        c.add_func("f").unwrap();
        let vec_reg = c.new_xmm(None);
        let gp_reg = c.new_gp64(None);
        let _ = c.emit(UniOp::Vv {
            verb: Verb::MovGpReg,
            dst: gp_reg,
            src: vec_reg,
        });
        let err = c.emit_mov_imm(gp_reg, 1).unwrap_err();
        assert!(matches!(err, CodegenError::Poisoned));
    }

    #[test]
    fn new_stack_assigns_aligned_nonoverlapping_offsets() {
        let mut c = x86_compiler();
        let a = c.new_stack(4, 4);
        let b = c.new_stack(8, 8);
        assert_eq!(c.fixed_slot_offset(a), 0);
        assert_eq!(c.fixed_slot_offset(b), 8);
    }

    #[test]
    fn aarch64_compiler_rejects_x86_emit() {
        let mut c = UniCompiler::new(Architecture::AArch64, CpuFeatures::BASELINE, CallConv::Aapcs64);
        c.add_func("f").unwrap();
        let dst = c.new_gp64(None);
        let err = c.emit_mov_imm(dst, 0).unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedOp(_)));
    }

    #[test]
    fn move_plan_swap_emits_xchg_bytes() {
        // Pass 6's own allocator path never populates `moves` today (see
        // DESIGN.md), so this drives `emit_move_plan` directly to prove the
        // splice itself — as opposed to the allocator feeding it — works.
        let mut c = x86_compiler();
        c.add_func("f").unwrap();
        let work_a = c.new_gp64(None);
        let work_b = c.new_gp64(None);
        c.emit_move_plan(&[MoveOp::Swap {
            group: RegGroup::Gp,
            a: 0,
            b: 1,
            work_a,
            work_b,
            scratch: None,
        }]);
        c.append_node(Node::Inst(InstId::Ret, SmallVec::new()));
        c.end_func().unwrap();
        let bytes = c.finalize().unwrap();
        assert!(bytes.iter().any(|&b| b == 0x87), "expected an xchg byte in {:?}", bytes);
    }

    #[test]
    fn move_plan_vector_swap_routes_through_the_scratch_register() {
        let mut c = x86_compiler();
        c.add_func("f").unwrap();
        let work_a = c.new_xmm(None);
        let work_b = c.new_xmm(None);
        c.emit_move_plan(&[MoveOp::Swap {
            group: RegGroup::Vec,
            a: 0,
            b: 1,
            work_a,
            work_b,
            scratch: Some(2),
        }]);
        c.append_node(Node::Inst(InstId::Ret, SmallVec::new()));
        c.end_func().unwrap();
        let bytes = c.finalize().unwrap();
        // Three `movaps` (0F 28) round trips through xmm2, not one `xchg`:
        // there is no vector exchange opcode to fall back on.
        assert_eq!(bytes.windows(2).filter(|w| *w == [0x0F, 0x28]).count(), 3);
    }

    #[test]
    fn group_check_uses_expected_group_helper() {
        let mut c = x86_compiler();
        let a = c.new_gp64(None);
        let b = c.new_gp64(None);
        assert_eq!(
            UniOp::Vv {
                verb: Verb::MovGpReg,
                dst: a,
                src: b
            }
            .expected_group(),
            RegGroup::Gp
        );
    }
}
