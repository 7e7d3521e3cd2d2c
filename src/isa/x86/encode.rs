//! The x86-64 machine encoder: turns a fully-resolved `Inst` node (all
//! operands physical or memory, per spec §4.4) into bytes.

use crate::buffer::CodeBuffer;
use crate::error::{CodegenError, CodegenResult};
use crate::inst_db::{EncodingForm, InstId, MandatoryPrefix, OpcodeMap, VecLen};
use crate::isa::x86::modrm::{encode_mem, encode_reg_reg};
use crate::isa::x86::rex::RexFlags;
use crate::isa::x86::vex::{VexPrefix, MMMMM_0F, MMMMM_0F38, MMMMM_0F3A, PP_66, PP_F2, PP_F3, PP_NONE};
use crate::label::{LabelManager, RelocKind};
use crate::operand::{Immediate, Operand, RegRef};

fn reg_encoding(op: &Operand) -> CodegenResult<u8> {
    match op {
        Operand::Reg(RegRef::Physical { encoding, .. }) => Ok(*encoding),
        _ => Err(CodegenError::Encoding(
            "expected a resolved physical register operand in this ModR/M slot".into(),
        )),
    }
}

fn pp_for(prefix: MandatoryPrefix) -> u8 {
    match prefix {
        MandatoryPrefix::None => PP_NONE,
        MandatoryPrefix::P66 => PP_66,
        MandatoryPrefix::PF3 => PP_F3,
        MandatoryPrefix::PF2 => PP_F2,
    }
}

fn legacy_prefix_byte(prefix: MandatoryPrefix) -> Option<u8> {
    match prefix {
        MandatoryPrefix::None => None,
        MandatoryPrefix::P66 => Some(0x66),
        MandatoryPrefix::PF3 => Some(0xF3),
        MandatoryPrefix::PF2 => Some(0xF2),
    }
}

fn mmmmm_for(map: OpcodeMap) -> u8 {
    match map {
        OpcodeMap::Legacy | OpcodeMap::Of0F => MMMMM_0F,
        OpcodeMap::Of0F38 => MMMMM_0F38,
        OpcodeMap::Of0F3A => MMMMM_0F3A,
    }
}

fn emit_legacy_opcode(buf: &mut CodeBuffer, map: OpcodeMap, opcode: u16) {
    match map {
        OpcodeMap::Legacy => buf.emit8(opcode as u8),
        OpcodeMap::Of0F => {
            buf.emit8(0x0F);
            buf.emit8(opcode as u8);
        }
        OpcodeMap::Of0F38 => {
            buf.emit8(0x0F);
            buf.emit8(0x38);
            buf.emit8(opcode as u8);
        }
        OpcodeMap::Of0F3A => {
            buf.emit8(0x0F);
            buf.emit8(0x3A);
            buf.emit8(opcode as u8);
        }
    }
}

fn l_bit(l: Option<VecLen>) -> u8 {
    match l {
        Some(VecLen::L256) => 1,
        _ => 0,
    }
}

/// Encode `inst_id` applied to `operands` (already allocator-resolved to
/// physical registers/memory) into `buf`. `labels` receives any relocation
/// produced by a label operand.
pub fn encode(
    buf: &mut CodeBuffer,
    labels: &mut LabelManager,
    inst_id: InstId,
    operands: &[Operand],
) -> CodegenResult<()> {
    let entry = inst_id.entry();
    match entry.form {
        EncodingForm::ZeroOp => {
            emit_legacy_opcode(buf, entry.map, entry.opcode);
            Ok(())
        }
        EncodingForm::OpReg => {
            let dst = reg_encoding(&operands[0])?;
            let mut rex = if entry.w { RexFlags::set_w() } else { RexFlags::clear_w() };
            rex.emit_one_op(buf, dst);
            buf.emit8((entry.opcode as u8).wrapping_add(dst & 7));
            if entry.w {
                // `REX.W + B8+r` takes a full 64-bit immediate rather than
                // the 32-bit one the non-REX.W form takes; a label operand
                // here means "the address isn't known yet", so record a
                // deferred `Abs64` relocation over the 8-byte placeholder
                // instead of reading a literal value.
                match operands.get(1) {
                    Some(Operand::Imm(Immediate(v))) => buf.emit64(*v as u64),
                    Some(Operand::Label(l)) => {
                        labels.record_relocation(RelocKind::Abs64, buf.len(), *l, 0);
                        buf.emit64(0);
                    }
                    _ => {
                        return Err(CodegenError::Encoding(
                            "OpReg w64 form requires an immediate or label second operand".into(),
                        ))
                    }
                }
            } else {
                let imm = match operands.get(1) {
                    Some(Operand::Imm(Immediate(v))) => *v as u32,
                    _ => 0,
                };
                buf.emit32(imm);
            }
            Ok(())
        }
        EncodingForm::RegRm => encode_reg_rm(buf, labels, entry, operands),
        EncodingForm::VexRvm | EncodingForm::VexRm => encode_vex(buf, entry, operands),
        EncodingForm::Rel32 => encode_rel32(buf, labels, entry, operands),
        EncodingForm::Rel8 => encode_rel8(buf, labels, entry, operands),
    }
}

/// Whether `label`'s short-form displacement fits `i8` if the short
/// opcode (one legacy byte + one disp8 byte, the only shape any `Rel8`
/// row in this table uses) were emitted starting at `buf.len()` right
/// now. `false` if the label isn't bound yet — a forward branch always
/// takes the long form (spec §4.4, no relaxation pass).
pub fn short_branch_fits(buf: &CodeBuffer, labels: &LabelManager, label: crate::label::LabelId) -> bool {
    match labels.resolve(label) {
        Some(bound) => {
            let end = buf.len() + 2;
            let disp = i64::from(bound) - i64::from(end);
            (i64::from(i8::MIN)..=i64::from(i8::MAX)).contains(&disp)
        }
        None => false,
    }
}

/// Near `jmp`/`jcc`: opcode bytes, then a zero placeholder plus a deferred
/// `rel32` relocation over the label operand (spec §4.4 "Label operands").
fn encode_rel32(
    buf: &mut CodeBuffer,
    labels: &mut LabelManager,
    entry: &crate::inst_db::InstEntry,
    operands: &[Operand],
) -> CodegenResult<()> {
    let label = match operands.first() {
        Some(Operand::Label(l)) => *l,
        _ => {
            return Err(CodegenError::Encoding(
                "Rel32 form requires a label operand".into(),
            ))
        }
    };
    emit_legacy_opcode(buf, entry.map, entry.opcode);
    let at = buf.len();
    buf.emit32(0);
    labels.record_relocation(RelocKind::Rel32, at, label, 0);
    Ok(())
}

/// Short `jmp`/`jcc`: only legal once the target is already bound (spec
/// §4.4 "selected only when the target is already bound and its
/// displacement fits in an i8"); the displacement is patched immediately,
/// no relocation is recorded.
fn encode_rel8(
    buf: &mut CodeBuffer,
    labels: &LabelManager,
    entry: &crate::inst_db::InstEntry,
    operands: &[Operand],
) -> CodegenResult<()> {
    let label = match operands.first() {
        Some(Operand::Label(l)) => *l,
        _ => {
            return Err(CodegenError::Encoding(
                "Rel8 form requires a label operand".into(),
            ))
        }
    };
    let bound = labels
        .resolve(label)
        .ok_or_else(|| CodegenError::Encoding("Rel8 form requires an already-bound label".into()))?;
    emit_legacy_opcode(buf, entry.map, entry.opcode);
    let end = buf.len() + 1;
    let disp = i64::from(bound) - i64::from(end);
    if !(i64::from(i8::MIN)..=i64::from(i8::MAX)).contains(&disp) {
        return Err(CodegenError::Encoding(
            "short branch displacement does not fit in i8".into(),
        ));
    }
    buf.emit8(disp as i8 as u8);
    Ok(())
}

fn encode_reg_rm(
    buf: &mut CodeBuffer,
    labels: &mut LabelManager,
    entry: &crate::inst_db::InstEntry,
    operands: &[Operand],
) -> CodegenResult<()> {
    if let Some(p) = legacy_prefix_byte(entry.prefix) {
        buf.emit8(p);
    }

    let reg_field = reg_encoding(&operands[0])?;

    match &operands[1] {
        Operand::Imm(Immediate(v)) => {
            // `op r/m, imm32` forms (e.g. MOV r/m64, imm32 / C7 /0): the
            // ModR/M.reg field is a fixed opcode-extension digit, and
            // operands[0] — the only register here — is the rm target.
            let rm = reg_field;
            let reg_field = 0u8;
            let mut rex = if entry.w { RexFlags::set_w() } else { RexFlags::clear_w() };
            rex.always_emit_if_8bit_needed(rm);
            rex.emit_two_op(buf, reg_field, rm);
            emit_legacy_opcode(buf, entry.map, entry.opcode);
            encode_reg_reg(buf, reg_field, rm);
            buf.emit32(*v as u32);
            Ok(())
        }
        Operand::Reg(RegRef::Physical { encoding: rm, .. }) => {
            let mut rex = if entry.w { RexFlags::set_w() } else { RexFlags::clear_w() };
            rex.always_emit_if_8bit_needed(reg_field);
            rex.always_emit_if_8bit_needed(*rm);
            rex.emit_two_op(buf, reg_field, *rm);
            emit_legacy_opcode(buf, entry.map, entry.opcode);
            encode_reg_reg(buf, reg_field, *rm);
            if let Some(Operand::Imm(Immediate(v))) = operands.get(2) {
                buf.emit32(*v as u32);
            }
            Ok(())
        }
        Operand::Mem(mem) => {
            let base_enc = mem.base.and_then(RegRef::physical_encoding).unwrap_or(0);
            let index_enc = mem.index.and_then(RegRef::physical_encoding);
            let mut rex = if entry.w { RexFlags::set_w() } else { RexFlags::clear_w() };
            match index_enc {
                Some(idx) => rex.emit_three_op(buf, reg_field, idx, base_enc),
                None => rex.emit_two_op(buf, reg_field, base_enc),
            }
            emit_legacy_opcode(buf, entry.map, entry.opcode);
            let disp_at = encode_mem(buf, reg_field, mem);
            if let (Some(at), Some(label)) = (disp_at, mem.label_ref) {
                // RIP-relative addend is -4: the displacement is measured
                // from the end of the instruction, and exactly one disp32
                // field follows the ModR/M byte here.
                labels.record_relocation(RelocKind::Rel32, at, label, 0);
            }
            Ok(())
        }
        _ => Err(CodegenError::Encoding(
            "RegRm form requires a register or memory second operand".into(),
        )),
    }
}

fn encode_vex(
    buf: &mut CodeBuffer,
    entry: &crate::inst_db::InstEntry,
    operands: &[Operand],
) -> CodegenResult<()> {
    let pp = pp_for(entry.prefix);
    let mmmmm = mmmmm_for(entry.map);
    let l = l_bit(entry.l);

    let (reg_field, vvvv, rm_op) = match entry.form {
        EncodingForm::VexRvm => {
            let dst = reg_encoding(&operands[0])?;
            let src1 = reg_encoding(&operands[1])?;
            (dst, src1, &operands[2])
        }
        EncodingForm::VexRm => {
            let dst = reg_encoding(&operands[0])?;
            (dst, 0, &operands[1])
        }
        _ => unreachable!(),
    };

    match rm_op {
        Operand::Reg(RegRef::Physical { encoding: rm, .. }) => {
            let prefix = VexPrefix::three_op(reg_field, vvvv, *rm, None, l, pp, mmmmm, entry.w);
            prefix.emit(buf);
            emit_opcode_after_vex(buf, entry.map, entry.opcode);
            encode_reg_reg(buf, reg_field, *rm);
            Ok(())
        }
        Operand::Mem(mem) => {
            let base_enc = mem.base.and_then(RegRef::physical_encoding).unwrap_or(0);
            let index_enc = mem.index.and_then(RegRef::physical_encoding);
            let prefix =
                VexPrefix::three_op(reg_field, vvvv, base_enc, index_enc, l, pp, mmmmm, entry.w);
            prefix.emit(buf);
            emit_opcode_after_vex(buf, entry.map, entry.opcode);
            encode_mem(buf, reg_field, mem);
            Ok(())
        }
        _ => Err(CodegenError::Encoding(
            "VEX form requires a register or memory rm operand".into(),
        )),
    }
}

fn emit_opcode_after_vex(buf: &mut CodeBuffer, map: OpcodeMap, opcode: u16) {
    // The opcode map's escape bytes (0F, 0F38, 0F3A) are already encoded in
    // VEX.mmmmm; only the final opcode byte follows in the instruction
    // stream.
    let _ = map;
    buf.emit8(opcode as u8);
}
