//! Static instruction tables keyed by a monotonic instruction id.
//!
//! Spec §6 describes the entry layout as a bit-packed struct (`opcode: u16`,
//! `prefix: u8`, `map: u8`, `w: u1`, `l: u2`, `features: u32`). Rather than
//! the teacher's build-script-generated `include!(concat!(env!("OUT_DIR"),
//! ...))` table (`isa/x86/registers.rs`), this is hand-maintained: the
//! spec's own inventory of instructions is small enough that generating it
//! from a meta-crate DSL (the way `cranelift/assembler-x64/meta` does)
//! would be a net loss of legibility.

use crate::isa::x86::features::CpuFeatures;

/// The opcode-map selector carried in a table entry's `map` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpcodeMap {
    Legacy,
    Of0F,
    Of0F38,
    Of0F3A,
}

/// The mandatory legacy/VEX prefix carried in a table entry's `prefix` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MandatoryPrefix {
    None,
    P66,
    PF3,
    PF2,
}

/// Vector length, where applicable (`l` field): 128/256/512-bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VecLen {
    L128,
    L256,
    L512,
}

/// Which instruction-encoding family a table entry belongs to; determines
/// how the x86 encoder (`isa::x86::encode`) reads the remaining operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodingForm {
    /// No ModR/M byte at all (e.g. `ret`, `nop`).
    ZeroOp,
    /// `op reg, imm` using the opcode-plus-register-in-low-3-bits form.
    OpReg,
    /// Standard `ModR/M(reg, rm)` two-operand form, legacy or REX-prefixed.
    RegRm,
    /// `ModR/M(reg, rm)` with a VEX-encoded non-destructive source (`vvvv`).
    VexRvm,
    /// `ModR/M(reg, rm)` with a VEX-encoded source and no `vvvv` (unary).
    VexRm,
    /// A near `jmp`/`jcc` carrying a 32-bit relative displacement to a
    /// label operand, emitted as a zero placeholder plus a deferred
    /// `rel32` relocation (spec §4.4 "Label operands").
    Rel32,
    /// A short `jmp`/`jcc` carrying an 8-bit relative displacement,
    /// selected only once its target label is already bound and the
    /// displacement fits `i8` (spec §4.4, §8 "branch selection").
    Rel8,
}

/// One row of the instruction table: everything the encoder needs to know
/// about an instruction besides its concrete operands.
#[derive(Clone, Copy, Debug)]
pub struct InstEntry {
    pub mnemonic: &'static str,
    pub opcode: u16,
    pub prefix: MandatoryPrefix,
    pub map: OpcodeMap,
    pub w: bool,
    pub l: Option<VecLen>,
    pub form: EncodingForm,
    pub features: CpuFeatures,
}

macro_rules! inst_table {
    ($( $variant:ident => $entry:expr ),+ $(,)?) => {
        /// A monotonic instruction id, dense-indexed into [`TABLE`].
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        pub enum InstId {
            $($variant,)+
        }

        impl InstId {
            pub fn entry(self) -> &'static InstEntry {
                &TABLE[self as usize]
            }
        }

        static TABLE: &[InstEntry] = &[
            $($entry,)+
        ];
    };
}

inst_table! {
    // Zero-operand / control flow.
    Ret => InstEntry { mnemonic: "ret", opcode: 0xC3, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: false, l: None, form: EncodingForm::ZeroOp, features: CpuFeatures::BASELINE },
    Nop1 => InstEntry { mnemonic: "nop", opcode: 0x90, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: false, l: None, form: EncodingForm::ZeroOp, features: CpuFeatures::BASELINE },
    JmpRel32 => InstEntry { mnemonic: "jmp", opcode: 0xE9, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: false, l: None, form: EncodingForm::Rel32, features: CpuFeatures::BASELINE },
    JmpRel8 => InstEntry { mnemonic: "jmp", opcode: 0xEB, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: false, l: None, form: EncodingForm::Rel8, features: CpuFeatures::BASELINE },
    // `jcc` only ever carries the one condition code (`equal`, /4) this
    // core's `UniOp::Cond` lowering produces; a second condition would need
    // its own opcode-low-nibble parameter threaded through `InstEntry`.
    JccRel32 => InstEntry { mnemonic: "je", opcode: 0x0F84, prefix: MandatoryPrefix::None, map: OpcodeMap::Of0F, w: false, l: None, form: EncodingForm::Rel32, features: CpuFeatures::BASELINE },
    JccRel8 => InstEntry { mnemonic: "je", opcode: 0x74, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: false, l: None, form: EncodingForm::Rel8, features: CpuFeatures::BASELINE },

    // GP moves and arithmetic (legacy/REX encodings).
    MovRegImm32 => InstEntry { mnemonic: "mov", opcode: 0xB8, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: false, l: None, form: EncodingForm::OpReg, features: CpuFeatures::BASELINE },
    // Same `B8+r` opcode as `MovRegImm32`, `w: true` switches the operand
    // the `OpReg` arm reads from a 32-bit immediate to a relocatable
    // 64-bit one (spec §9 "globally shared tables carry absolute
    // addresses baked into the code").
    MovRegImm64Abs => InstEntry { mnemonic: "mov", opcode: 0xB8, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::OpReg, features: CpuFeatures::BASELINE },
    MovRegImm64 => InstEntry { mnemonic: "mov", opcode: 0xC7, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    MovRmR => InstEntry { mnemonic: "mov", opcode: 0x89, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    MovRRm => InstEntry { mnemonic: "mov", opcode: 0x8B, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    XorRmR => InstEntry { mnemonic: "xor", opcode: 0x31, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: false, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    LeaRM => InstEntry { mnemonic: "lea", opcode: 0x8D, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    XchgRmR => InstEntry { mnemonic: "xchg", opcode: 0x87, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    AddRmR => InstEntry { mnemonic: "add", opcode: 0x01, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    CmpRmR => InstEntry { mnemonic: "cmp", opcode: 0x39, prefix: MandatoryPrefix::None, map: OpcodeMap::Legacy, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    SetccRm => InstEntry { mnemonic: "setcc", opcode: 0x0F90, prefix: MandatoryPrefix::None, map: OpcodeMap::Of0F, w: false, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },
    CmovccRR => InstEntry { mnemonic: "cmovcc", opcode: 0x0F40, prefix: MandatoryPrefix::None, map: OpcodeMap::Of0F, w: true, l: None, form: EncodingForm::RegRm, features: CpuFeatures::BASELINE },

    // SSE2 baseline vector integer add/move.
    PadddRmRSse2 => InstEntry { mnemonic: "paddd", opcode: 0x0FFE, prefix: MandatoryPrefix::P66, map: OpcodeMap::Of0F, w: false, l: Some(VecLen::L128), form: EncodingForm::RegRm, features: CpuFeatures::SSE2 },
    MovdquRmRSse2 => InstEntry { mnemonic: "movdqu", opcode: 0x0F6F, prefix: MandatoryPrefix::PF3, map: OpcodeMap::Of0F, w: false, l: Some(VecLen::L128), form: EncodingForm::RegRm, features: CpuFeatures::SSE2 },
    AddpsRmRSse2 => InstEntry { mnemonic: "addps", opcode: 0x0F58, prefix: MandatoryPrefix::None, map: OpcodeMap::Of0F, w: false, l: Some(VecLen::L128), form: EncodingForm::RegRm, features: CpuFeatures::SSE2 },
    MovapsRmRSse2 => InstEntry { mnemonic: "movaps", opcode: 0x0F28, prefix: MandatoryPrefix::None, map: OpcodeMap::Of0F, w: false, l: Some(VecLen::L128), form: EncodingForm::RegRm, features: CpuFeatures::SSE2 },

    // SSSE3/SSE4.1 forms a cascade may prefer over plain SSE2.
    PshufbRmRSsse3 => InstEntry { mnemonic: "pshufb", opcode: 0x0F3800, prefix: MandatoryPrefix::P66, map: OpcodeMap::Of0F38, w: false, l: Some(VecLen::L128), form: EncodingForm::RegRm, features: CpuFeatures::SSSE3 },
    PmulldRmRSse41 => InstEntry { mnemonic: "pmulld", opcode: 0x0F3840, prefix: MandatoryPrefix::P66, map: OpcodeMap::Of0F38, w: false, l: Some(VecLen::L128), form: EncodingForm::RegRm, features: CpuFeatures::SSE41 },

    // AVX/AVX2 three-operand VEX forms.
    VpadddVexRvmAvx => InstEntry { mnemonic: "vpaddd", opcode: 0x0FFE, prefix: MandatoryPrefix::P66, map: OpcodeMap::Of0F, w: false, l: Some(VecLen::L128), form: EncodingForm::VexRvm, features: CpuFeatures::AVX },
    VpadddVexRvmAvx2 => InstEntry { mnemonic: "vpaddd", opcode: 0x0FFE, prefix: MandatoryPrefix::P66, map: OpcodeMap::Of0F, w: false, l: Some(VecLen::L256), form: EncodingForm::VexRvm, features: CpuFeatures::AVX2 },
    VaddpsVexRvmAvx => InstEntry { mnemonic: "vaddps", opcode: 0x0F58, prefix: MandatoryPrefix::None, map: OpcodeMap::Of0F, w: false, l: Some(VecLen::L128), form: EncodingForm::VexRvm, features: CpuFeatures::AVX },
    VbroadcastqVexRmAvx2 => InstEntry { mnemonic: "vpbroadcastq", opcode: 0x0F3859, prefix: MandatoryPrefix::P66, map: OpcodeMap::Of0F38, w: false, l: Some(VecLen::L128), form: EncodingForm::VexRm, features: CpuFeatures::AVX2 },

    // FMA.
    VfmaddVexRvmFma => InstEntry { mnemonic: "vfmadd213ps", opcode: 0x0F38A8, prefix: MandatoryPrefix::P66, map: OpcodeMap::Of0F38, w: false, l: Some(VecLen::L128), form: EncodingForm::VexRvm, features: CpuFeatures::FMA },

    // Mask register moves (AVX-512).
    KmovqRRAvx512 => InstEntry { mnemonic: "kmovq", opcode: 0x0F90, prefix: MandatoryPrefix::None, map: OpcodeMap::Of0F, w: true, l: None, form: EncodingForm::VexRm, features: CpuFeatures::AVX512F },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lookup_matches_variant() {
        assert_eq!(InstId::Ret.entry().mnemonic, "ret");
        assert_eq!(InstId::VpadddVexRvmAvx.entry().mnemonic, "vpaddd");
    }

    #[test]
    fn mov_imm64_row_matches_spec_scenario() {
        let e = InstId::MovRegImm64.entry();
        assert_eq!(e.opcode, 0xC7);
        assert!(e.w);
    }

    #[test]
    fn avx_cascade_ordering_features() {
        let avx2 = InstId::VpadddVexRvmAvx2.entry().features;
        let avx = InstId::VpadddVexRvmAvx.entry().features;
        let sse2 = InstId::PadddRmRSse2.entry().features;
        assert!(avx2.contains(CpuFeatures::AVX2));
        assert!(avx.contains(CpuFeatures::AVX));
        assert!(sse2.contains(CpuFeatures::SSE2));
    }
}
