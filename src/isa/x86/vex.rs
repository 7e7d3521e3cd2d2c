//! VEX prefix synthesis.
//!
//! Ported near-verbatim from `cranelift/assembler-x64`'s `vex.rs`
//! (`VexPrefix::{two_op, three_op}`, the 2-vs-3-byte selection rule), since
//! that logic is pure bit-twiddling independent of the teacher's `CodeSink`
//! abstraction.

use crate::buffer::CodeBuffer;

/// A constructed VEX prefix, two or three bytes including the leading `C5`
/// / `C4` escape.
pub enum VexPrefix {
    TwoByte(u8),
    ThreeByte(u8, u8),
}

#[inline(always)]
fn invert_top_bit(enc: u8) -> u8 {
    (!(enc >> 3)) & 1
}

fn use_2byte_prefix(x: u8, b: u8, w: bool, mmmmm: u8) -> bool {
    // `x`/`b` are already the inverted top bits, so `1` means "register
    // not extended" — the 3-byte form is only needed when either operand
    // is extended, `w` is set, or the opcode map isn't plain 0F.
    b == 1 && x == 1 && !w && !(mmmmm == 0b10 || mmmmm == 0b11)
}

impl VexPrefix {
    /// Construct a VEX prefix for a ternary (non-destructive three-operand)
    /// instruction: `reg` is the ModR/M.reg field, `vvvv` the second source,
    /// `rm_enc`/`index_enc` the (optional) extended-register bits of the
    /// `rm` operand, `l` the vector length bit, `pp` the mandatory-prefix
    /// encoding, `mmmmm` the opcode-map encoding, `w` the REX.W-equivalent.
    pub fn three_op(
        reg: u8,
        vvvv: u8,
        rm_enc: u8,
        index_enc: Option<u8>,
        l: u8,
        pp: u8,
        mmmmm: u8,
        w: bool,
    ) -> Self {
        let r = invert_top_bit(reg);
        let b = invert_top_bit(rm_enc);
        let x = invert_top_bit(index_enc.unwrap_or(0));

        if use_2byte_prefix(x, b, w, mmmmm) {
            let last = (r << 7) | ((!vvvv & 0b1111) << 3) | ((l & 1) << 2) | (pp & 0b11);
            VexPrefix::TwoByte(last)
        } else {
            let second = (r << 7) | (x << 6) | (b << 5) | (mmmmm & 0b1_1111);
            let last = ((w as u8) << 7) | ((!vvvv & 0b1111) << 3) | ((l & 1) << 2) | (pp & 0b11);
            VexPrefix::ThreeByte(second, last)
        }
    }

    /// Construct a VEX prefix for a binary (two-operand) instruction:
    /// equivalent to `three_op` with `vvvv = 0`.
    pub fn two_op(reg: u8, rm_enc: u8, index_enc: Option<u8>, l: u8, pp: u8, mmmmm: u8, w: bool) -> Self {
        Self::three_op(reg, 0, rm_enc, index_enc, l, pp, mmmmm, w)
    }

    pub fn emit(&self, buf: &mut CodeBuffer) {
        match *self {
            VexPrefix::TwoByte(last) => {
                buf.emit8(0xC5);
                buf.emit8(last);
            }
            VexPrefix::ThreeByte(second, last) => {
                buf.emit8(0xC4);
                buf.emit8(second);
                buf.emit8(last);
            }
        }
    }
}

/// Mandatory-prefix encodings for the VEX `pp` field.
pub const PP_NONE: u8 = 0b00;
pub const PP_66: u8 = 0b01;
pub const PP_F3: u8 = 0b10;
pub const PP_F2: u8 = 0b11;

/// Opcode-map encodings for the VEX `mmmmm` field.
pub const MMMMM_0F: u8 = 0b00001;
pub const MMMMM_0F38: u8 = 0b00010;
pub const MMMMM_0F3A: u8 = 0b00011;
