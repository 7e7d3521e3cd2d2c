//! AArch64 IR-level lowering only.
//!
//! Spec §1 explicitly excludes "the AArch64 assembler byte-encoder...only
//! the IR-level lowering is specified." This module therefore stops at
//! producing [`A64Inst`] values — abstract instruction descriptors with
//! resolved operand encodings — and does not serialize them to bytes.
//! Grounded on the teacher's `isa::arm64::registers` register-encoding
//! layout (X0-X30/SP, V0-V31) adapted to this crate's flat `RegType` model.

use crate::operand::{Operand, RegRef};

/// An AArch64 mnemonic family the selector can lower a `UniOp*` verb to.
/// Kept abstract (no immediate-field packing, no byte layout) since final
/// encoding is out of scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum A64Mnemonic {
    Add,
    Sub,
    Mov,
    Mvn,
    Ldr,
    Str,
    FaddV,
    FmlaV,
    // `ext` operand order is flagged in spec §9 as underspecified in the
    // source ("needs verification against ARM ARM"); not implemented.
}

/// A single lowered AArch64 instruction: mnemonic plus resolved operands.
/// The allocator and the caller's serializer treat this the same way an
/// x86 `Inst` node's operand list is treated, just without a byte encoder
/// behind it.
#[derive(Clone, Debug)]
pub struct A64Inst {
    pub mnemonic: A64Mnemonic,
    pub operands: Vec<Operand>,
}

impl A64Inst {
    pub fn new(mnemonic: A64Mnemonic, operands: Vec<Operand>) -> Self {
        A64Inst { mnemonic, operands }
    }

    pub fn referenced_virtregs(&self) -> Vec<crate::virtreg::VirtRegId> {
        self.operands
            .iter()
            .flat_map(Operand::referenced_virtregs)
            .collect()
    }
}

/// AArch64 general-purpose register encodings 0..=30, plus 31 meaning
/// SP/XZR depending on instruction context (the source ISA, not this
/// crate, disambiguates).
pub const XZR_OR_SP: u8 = 31;

/// Is `encoding` one of the AAPCS64 callee-saved GP registers (X19-X28)?
pub fn is_callee_saved_gp(encoding: u8) -> bool {
    (19..=28).contains(&encoding)
}

/// Is `encoding` one of the AAPCS64 callee-saved vector registers
/// (the bottom 64 bits of V8-V15)?
pub fn is_callee_saved_vec(encoding: u8) -> bool {
    (8..=15).contains(&encoding)
}

fn regref_encoding(r: RegRef) -> Option<u8> {
    r.physical_encoding()
}
