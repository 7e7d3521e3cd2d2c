//! Abstract verbs lowered by [`crate::compiler::UniCompiler`] (spec §4.5
//! item 2, component J).
//!
//! No teacher file implements a cross-ISA verb cascade at this
//! granularity — cranelift's own lowering goes through ISLE pattern
//! matching, out of retrieval scope. The families below follow spec §4.5's
//! enumeration directly; the builder-enum-of-fixed-arity-variants shape
//! mirrors the `Operand` tagged union in `operand.rs` rather than an
//! inheritance hierarchy.

use crate::operand::{Immediate, MemOperand, RegGroup};
use crate::virtreg::VirtRegId;

/// A language-neutral instruction intent. Each is lowered to one or more
/// concrete machine instructions by the selection table (spec §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// 32-bit lane-wise integer add on a vector register.
    AddU32,
    /// 32-bit lane-wise float add on a vector register.
    AddF32,
    /// Scalar 64-bit GP add.
    AddGp64,
    /// Per-byte shuffle driven by a control vector (`pshufb`-shaped).
    ShuffleBytesU8,
    /// 32-bit lane-wise integer multiply.
    MulI32,
    /// Broadcast a 64-bit lane across the whole vector register.
    BroadcastU64,
    /// `dst = a*b + c`, fused where the target/feature set allows it
    /// (spec §4.5 "FMA policy").
    MAddF32,
    /// Move a vector register, aligned addressing assumed legal.
    MovVecAligned,
    /// Move a vector register via an addressing mode that tolerates
    /// misalignment.
    MovVecUnaligned,
    /// Move a mask register (AVX-512 `kmovq`-shaped).
    MaskMove,
    /// `dst = src` (GP, register-to-register).
    MovGpReg,
    /// `dst = imm`; the immediate-zero case is peephole-rewritten to
    /// `xor dst, dst` before serialisation (spec §4.4).
    MovGpImm,
    /// `dst = a == b` as a GP compare, exposed to [`UniOp::Cond`] through
    /// a `setcc`/`cmovcc` pair.
    CmpEqGp,
}

/// `ScalarOpBehavior` (spec §4.5): whether a scalar vector op zeroes the
/// untouched lanes of the destination or preserves whatever `dst` already
/// held. Affects cross-architecture parity since AArch64 scalar forms
/// always preserve by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarOpBehavior {
    ZeroUpperLanes,
    PreserveUpperLanes,
}

/// `FMAddOpBehavior` (spec §4.5): how `mAddF32` is realised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FmaPolicy {
    /// Always lower to separate multiply and add instructions.
    NoFma,
    /// Use a fused multiply-add when available, storing the result to
    /// whichever operand the selector finds cheapest.
    FmaStoreToAny,
    /// Use a fused multiply-add that must write back into the
    /// accumulator operand (matches AArch64 `fmadd`'s fixed destination).
    FmaStoreToAccumulator,
}

/// One abstract instruction awaiting lowering. Variant names match the
/// `UniOp*` family names spec §4.5 enumerates; each fixes the arity and
/// operand kinds (register vs. memory vs. immediate) that family allows.
#[derive(Clone, Debug)]
pub enum UniOp {
    /// `dst, src` — one register operand in, one out.
    Vv {
        verb: Verb,
        dst: VirtRegId,
        src: VirtRegId,
    },
    /// `dst, src1, src2` — the common three-register vector shape.
    Vvv {
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
    },
    /// `dst, src, imm`.
    Vvi {
        verb: Verb,
        dst: VirtRegId,
        src: VirtRegId,
        imm: Immediate,
    },
    /// `dst, src1, src2, imm`.
    Vvvi {
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
        imm: Immediate,
    },
    /// `dst, src1, src2, src3` — fused multiply-add shape.
    Vvvv {
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
        src3: VirtRegId,
    },
    /// Register destination, memory source (load-shaped).
    Rm {
        verb: Verb,
        dst: VirtRegId,
        mem: MemOperand,
    },
    /// Memory destination, register source (store-shaped).
    Mr {
        verb: Verb,
        mem: MemOperand,
        src: VirtRegId,
    },
    /// Memory-only operand (e.g. a prefetch or a fence).
    M { verb: Verb, mem: MemOperand },
    /// `dst, src1, src2` over the GP group (kept distinct from `Vvv`,
    /// which is always the vector group, so the selector never has to
    /// infer the group from context).
    Rrr {
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
    },
    /// A predicated select: `dst = cond(src1, src2) ? a : b`, lowered via
    /// compare + `setcc`/`cmovcc` on x86, `ccmp`/`csel` on AArch64.
    Cond {
        verb: Verb,
        dst: VirtRegId,
        src1: VirtRegId,
        src2: VirtRegId,
        if_true: VirtRegId,
        if_false: VirtRegId,
    },
}

impl UniOp {
    /// The allocation group this op's register operands belong to, used by
    /// the selector to reject a GP verb routed through a vector-shaped
    /// `UniOp` variant (or vice versa) as `OperandMismatch` rather than
    /// silently emitting nonsense.
    pub fn expected_group(&self) -> RegGroup {
        match self.verb() {
            Verb::AddGp64 | Verb::MovGpReg | Verb::MovGpImm | Verb::CmpEqGp => RegGroup::Gp,
            Verb::MaskMove => RegGroup::KMask,
            _ => RegGroup::Vec,
        }
    }

    pub fn verb(&self) -> Verb {
        match *self {
            UniOp::Vv { verb, .. }
            | UniOp::Vvv { verb, .. }
            | UniOp::Vvi { verb, .. }
            | UniOp::Vvvi { verb, .. }
            | UniOp::Vvvv { verb, .. }
            | UniOp::Rm { verb, .. }
            | UniOp::Mr { verb, .. }
            | UniOp::M { verb, .. }
            | UniOp::Rrr { verb, .. }
            | UniOp::Cond { verb, .. } => verb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtreg::VirtRegPool;

    #[test]
    fn expected_group_matches_verb_kind() {
        let mut pool = VirtRegPool::new();
        let a = pool.create(RegGroup::Vec, 16, None);
        let b = pool.create(RegGroup::Vec, 16, None);
        let c = pool.create(RegGroup::Vec, 16, None);
        let op = UniOp::Vvv {
            verb: Verb::AddU32,
            dst: a,
            src1: b,
            src2: c,
        };
        assert_eq!(op.expected_group(), RegGroup::Vec);

        let g0 = pool.create(RegGroup::Gp, 8, None);
        let g1 = pool.create(RegGroup::Gp, 8, None);
        let mov = UniOp::Vv {
            verb: Verb::MovGpReg,
            dst: g0,
            src: g1,
        };
        assert_eq!(mov.expected_group(), RegGroup::Gp);
    }
}
