//! Calling-convention identifiers recognised at function creation.
//!
//! Adapted from `cranelift-codegen`'s `isa::call_conv::CallConv` (same
//! `triple_default` dispatch over `target_lexicon::Triple`, same
//! `Display`/`FromStr` pair) but cut down to the three conventions this
//! core actually lowers prologues for (spec §6).

use core::fmt;
use core::str;
use target_lexicon::{CallingConvention, Triple};

/// Calling convention identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// Windows x64 fastcall: RCX,RDX,R8,R9, 32-byte shadow space,
    /// XMM6-XMM15 callee-saved.
    Win64,
    /// System V AMD64 ABI: RDI,RSI,RDX,RCX,R8,R9, 128-byte red zone,
    /// XMM0-XMM15 caller-saved.
    SysvAmd64,
    /// AAPCS64: X0-X7, V0-V7.
    Aapcs64,
}

impl CallConv {
    /// The default calling convention for the given target triple.
    pub fn triple_default(triple: &Triple) -> Self {
        match triple.default_calling_convention() {
            Ok(CallingConvention::WindowsFastcall) => CallConv::Win64,
            Ok(CallingConvention::SystemV) | Err(()) => CallConv::SysvAmd64,
            Ok(CallingConvention::AppleAarch64) => CallConv::Aapcs64,
            #[allow(unreachable_patterns)]
            Ok(unimp) => unimplemented!("calling convention: {:?}", unimp),
        }
    }

    /// Integer argument registers in order, as x86-64/AArch64 encodings.
    pub fn int_arg_regs(self) -> &'static [u8] {
        match self {
            CallConv::Win64 => &[1, 2, 8, 9],         // RCX,RDX,R8,R9
            CallConv::SysvAmd64 => &[7, 6, 2, 1, 8, 9], // RDI,RSI,RDX,RCX,R8,R9
            CallConv::Aapcs64 => &[0, 1, 2, 3, 4, 5, 6, 7], // X0-X7
        }
    }

    /// Vector argument registers in order.
    pub fn vec_arg_regs(self) -> &'static [u8] {
        match self {
            CallConv::Win64 => &[0, 1, 2, 3],
            CallConv::SysvAmd64 => &[0, 1, 2, 3, 4, 5, 6, 7],
            CallConv::Aapcs64 => &[0, 1, 2, 3, 4, 5, 6, 7],
        }
    }

    /// Bytes of stack reserved below the return address before the callee
    /// may touch the stack (shadow space on Windows, red zone on SysV).
    pub fn reserved_stack_bytes(self) -> u32 {
        match self {
            CallConv::Win64 => 32,
            CallConv::SysvAmd64 => 128,
            CallConv::Aapcs64 => 0,
        }
    }

    /// Is this an x86-64 convention?
    pub fn is_x86_64(self) -> bool {
        matches!(self, CallConv::Win64 | CallConv::SysvAmd64)
    }
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            CallConv::Win64 => "win64",
            CallConv::SysvAmd64 => "sysv_amd64",
            CallConv::Aapcs64 => "aapcs64",
        })
    }
}

impl str::FromStr for CallConv {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win64" => Ok(CallConv::Win64),
            "sysv_amd64" => Ok(CallConv::SysvAmd64),
            "aapcs64" => Ok(CallConv::Aapcs64),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrip() {
        for cc in [CallConv::Win64, CallConv::SysvAmd64, CallConv::Aapcs64] {
            let s = cc.to_string();
            assert_eq!(s.parse::<CallConv>().unwrap(), cc);
        }
    }

    #[test]
    fn sysv_arg_regs_match_abi() {
        assert_eq!(CallConv::SysvAmd64.int_arg_regs(), &[7, 6, 2, 1, 8, 9]);
    }

    #[test]
    fn shadow_space_vs_red_zone() {
        assert_eq!(CallConv::Win64.reserved_stack_bytes(), 32);
        assert_eq!(CallConv::SysvAmd64.reserved_stack_bytes(), 128);
        assert_eq!(CallConv::Aapcs64.reserved_stack_bytes(), 0);
    }
}
