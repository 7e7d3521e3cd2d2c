//! Shared, architecture-neutral register description.
//!
//! The teacher's `isa::registers` module (`RegBank`/`RegClass`/`RegInfo`)
//! exists to describe overlapping sub-register classes generated by a
//! build script from a per-ISA register bank definition. This spec has no
//! such aliasing to model (xmm/ymm/zmm are already handled directly by
//! [`crate::operand::RegType`]), so this module is flattened to just a
//! name table per architecture, used for `Display` and diagnostics.

use crate::operand::RegType;

/// A named physical register, used only to pretty-print operands; encoding
/// is carried separately on [`crate::operand::RegRef::Physical`].
pub struct RegInfo {
    names: &'static [&'static str],
}

impl RegInfo {
    pub const fn new(names: &'static [&'static str]) -> Self {
        RegInfo { names }
    }

    pub fn name(&self, encoding: u8) -> &'static str {
        self.names.get(encoding as usize).copied().unwrap_or("?")
    }
}

/// General-purpose 64-bit register names in encoding order (0..=15).
pub static X86_GP64_NAMES: RegInfo = RegInfo::new(&[
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
]);

/// Vector register names (xmm/ymm/zmm share encodings; the printed prefix
/// depends on the operand's [`RegType`]).
pub static X86_VEC_NAMES: RegInfo = RegInfo::new(&[
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16",
    "17", "18", "19", "20", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30", "31",
]);

/// AArch64 general-purpose register names (0..=30, plus 31 for sp/zr).
pub static AARCH64_GP_NAMES: RegInfo = RegInfo::new(&[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "x29", "x30", "sp",
]);

/// Render a physical register for diagnostics, given its type and encoding.
pub fn display_name(reg_type: RegType, encoding: u8) -> String {
    match reg_type {
        RegType::Gp8 | RegType::Gp16 | RegType::Gp32 | RegType::Gp64 => {
            X86_GP64_NAMES.name(encoding).to_string()
        }
        RegType::Vec128 => format!("xmm{}", X86_VEC_NAMES.name(encoding)),
        RegType::Vec256 => format!("ymm{}", X86_VEC_NAMES.name(encoding)),
        RegType::Vec512 => format!("zmm{}", X86_VEC_NAMES.name(encoding)),
        RegType::KMask => format!("k{}", encoding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gp64_encoding_matches_sdm_order() {
        assert_eq!(X86_GP64_NAMES.name(0), "rax");
        assert_eq!(X86_GP64_NAMES.name(3), "rbx");
        assert_eq!(X86_GP64_NAMES.name(8), "r8");
    }

    #[test]
    fn vector_name_carries_width_prefix() {
        assert_eq!(display_name(RegType::Vec128, 2), "xmm2");
        assert_eq!(display_name(RegType::Vec256, 2), "ymm2");
        assert_eq!(display_name(RegType::KMask, 1), "k1");
    }
}
