//! ModR/M and SIB addressing-mode selection.
//!
//! Implements the decision table in spec §4.4: given a [`MemOperand`] whose
//! base/index are already resolved to physical encodings, picks the
//! shortest legal `mod` field and emits the accompanying SIB/displacement
//! bytes. This is pure decision logic with no teacher analogue (the
//! teacher's old `cranelift-codegen` left ModR/M synthesis to a
//! build-script-generated recipe table); it follows the same byte-level
//! style as [`super::rex`] and [`super::vex`], both adapted from
//! `cranelift/assembler-x64`.

use crate::buffer::CodeBuffer;
use crate::isa::x86::rex::{encode_modrm, encode_sib};
use crate::operand::{MemOperand, RegRef};

/// RSP/R12 always require a SIB byte in `rm` position (mod != 11), because
/// encoding 100 there is the SIB escape, not a register.
const RSP_OR_R12: u8 = 4;
/// RBP/R13 in `rm` position with `mod = 00` is the RIP-relative escape, not
/// "no displacement" — encode as `mod = 01, disp8 = 0` instead.
const RBP_OR_R13: u8 = 5;
/// No-base SIB form uses base field 101 paired with index field 100 (no
/// index) to mean "disp32, no base, no index".
const NONE_INDEX: u8 = 4;

fn enc_of(r: Option<RegRef>) -> Option<u8> {
    r.and_then(RegRef::physical_encoding)
}

/// Emit the ModR/M (+ SIB + displacement) bytes addressing `mem` with
/// `reg_field` in the ModR/M.reg slot. Returns the byte offset of the
/// embedded `disp32`, if any, so the caller can register a RIP-relative or
/// absolute relocation against it.
pub fn encode_mem(buf: &mut CodeBuffer, reg_field: u8, mem: &MemOperand) -> Option<u32> {
    if mem.is_rip_relative() {
        // `mod=00, rm=101` is the RIP-relative escape; the disp32 is filled
        // in later by the label relocation.
        buf.emit8(encode_modrm(0b00, reg_field, 0b101));
        let at = buf.len();
        buf.emit32(0);
        return Some(at);
    }

    let base_enc = enc_of(mem.base);
    let index_enc = enc_of(mem.index);

    match (base_enc, index_enc) {
        (None, None) => {
            // Absolute address: SIB escape with no base, no index.
            buf.emit8(encode_modrm(0b00, reg_field, 0b100));
            buf.emit8(encode_sib(mem.scale.sib_bits(), NONE_INDEX, 0b101));
            let at = buf.len();
            buf.emit32(mem.disp as u32);
            Some(at)
        }
        (Some(base), index) => {
            let base_low = base & 7;
            let needs_sib = base_low == RSP_OR_R12 || index.is_some();
            let force_disp8 = base_low == RBP_OR_R13 && mem.disp == 0;

            let m0d = if mem.disp == 0 && !force_disp8 {
                0b00
            } else if i8::try_from(mem.disp).is_ok() || force_disp8 {
                0b01
            } else {
                0b10
            };

            let rm_field = if needs_sib { 0b100 } else { base_low };
            buf.emit8(encode_modrm(m0d, reg_field, rm_field));

            if needs_sib {
                let idx_low = index.unwrap_or(NONE_INDEX) & 7;
                let idx_field = if index.is_some() { idx_low } else { NONE_INDEX };
                buf.emit8(encode_sib(mem.scale.sib_bits(), idx_field, base_low));
            }

            match m0d {
                0b01 => {
                    buf.emit8(mem.disp as i8 as u8);
                    None
                }
                0b10 => {
                    buf.emit32(mem.disp as u32);
                    None
                }
                _ => None,
            }
        }
        (None, Some(_)) => {
            // Index with no base still needs the SIB escape for base=101
            // plus an explicit disp32 (there's no "base" to omit it from).
            buf.emit8(encode_modrm(0b00, reg_field, 0b100));
            let idx_low = index_enc.unwrap() & 7;
            buf.emit8(encode_sib(mem.scale.sib_bits(), idx_low, 0b101));
            let at = buf.len();
            buf.emit32(mem.disp as u32);
            Some(at)
        }
    }
}

/// Encode a register-register ModR/M byte: `mod=11, reg=reg_field,
/// rm=rm_field`.
pub fn encode_reg_reg(buf: &mut CodeBuffer, reg_field: u8, rm_field: u8) {
    buf.emit8(encode_modrm(0b11, reg_field, rm_field));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{RegType, Scale};

    fn gp(encoding: u8) -> RegRef {
        RegRef::Physical {
            reg_type: RegType::Gp64,
            encoding,
        }
    }

    #[test]
    fn no_base_no_index_is_sib_disp32() {
        let mem = MemOperand::new().with_disp(0x1000);
        let mut buf = CodeBuffer::new();
        encode_mem(&mut buf, 0, &mem);
        assert_eq!(buf.data()[0], 0b0000_0100); // mod=00 reg=0 rm=100
        assert_eq!(buf.data()[1], 0b0010_0101); // scale=0 idx=100 base=101
    }

    #[test]
    fn base_only_zero_disp_uses_mod00() {
        let mem = MemOperand::new().with_base(gp(1)); // rcx
        let mut buf = CodeBuffer::new();
        encode_mem(&mut buf, 0, &mem);
        assert_eq!(buf.data(), &[0b0000_0001]);
    }

    #[test]
    fn rbp_base_zero_disp_forces_disp8() {
        let mem = MemOperand::new().with_base(gp(5)); // rbp
        let mut buf = CodeBuffer::new();
        encode_mem(&mut buf, 0, &mem);
        assert_eq!(buf.data()[0] >> 6, 0b01);
        assert_eq!(buf.data().len(), 2);
        assert_eq!(buf.data()[1], 0);
    }

    #[test]
    fn rsp_base_always_needs_sib() {
        let mem = MemOperand::new().with_base(gp(4)); // rsp
        let mut buf = CodeBuffer::new();
        encode_mem(&mut buf, 0, &mem);
        assert_eq!(buf.data()[0] & 0b111, 0b100);
        assert_eq!(buf.data()[1], encode_sib(0, NONE_INDEX, 4));
    }

    #[test]
    fn disp_in_i8_range_uses_mod01() {
        let mem = MemOperand::new().with_base(gp(1)).with_disp(100);
        let mut buf = CodeBuffer::new();
        encode_mem(&mut buf, 0, &mem);
        assert_eq!(buf.data()[0] >> 6, 0b01);
        assert_eq!(buf.data()[1] as i8, 100);
    }

    #[test]
    fn disp_out_of_i8_range_uses_mod10() {
        let mem = MemOperand::new().with_base(gp(1)).with_disp(1000);
        let mut buf = CodeBuffer::new();
        encode_mem(&mut buf, 0, &mem);
        assert_eq!(buf.data()[0] >> 6, 0b10);
        assert_eq!(i32::from_le_bytes(buf.data()[1..5].try_into().unwrap()), 1000);
    }

    #[test]
    fn base_plus_scaled_index() {
        let mem = MemOperand::new()
            .with_base(gp(1))
            .with_index(gp(2), Scale::X4);
        let mut buf = CodeBuffer::new();
        encode_mem(&mut buf, 0, &mem);
        assert_eq!(buf.data()[0] & 0b111, 0b100); // SIB escape
        assert_eq!(buf.data()[1], encode_sib(0b10, 2, 1));
    }

    #[test]
    fn reg_reg_form() {
        let mut buf = CodeBuffer::new();
        encode_reg_reg(&mut buf, 0, 3);
        assert_eq!(buf.data(), &[0b1100_0011]);
    }
}
