//! The CPU-feature bitfield consumed (not detected — feature detection is
//! out of scope, spec §1) by instruction selection.
//!
//! Grounded on `cranelift/assembler-x64`'s `Features` boolean-term idea
//! (features gate instruction availability) but simplified to the flat
//! bitfield spec §6 actually calls for, using the same `bitflags!` idiom
//! `metta-systems-vesper` uses for its page-table entry flags.

use bitflags::bitflags;

bitflags! {
    /// A snapshot of which CPU features the target is assumed to support.
    /// Supplied by the caller (detection lives outside this crate).
    pub struct CpuFeatures: u32 {
        const SSE2        = 1 << 0;
        const SSSE3       = 1 << 1;
        const SSE41       = 1 << 2;
        const AVX         = 1 << 3;
        const AVX2        = 1 << 4;
        const AVX512F     = 1 << 5;
        const AVX512VL    = 1 << 6;
        const BMI1        = 1 << 7;
        const BMI2        = 1 << 8;
        const ADX         = 1 << 9;
        const LZCNT       = 1 << 10;
        const POPCNT      = 1 << 11;
        const FMA         = 1 << 12;
        const F16C        = 1 << 13;
        const VPCLMULQDQ  = 1 << 14;
        const GFNI        = 1 << 15;
        const PCLMULQDQ   = 1 << 16;

        /// Always available: plain legacy-encoded instructions need no
        /// CPUID check (x86-64 baseline ISA includes SSE2, but `BASELINE`
        /// is kept distinct from `SSE2` for instructions with no vector
        /// form at all, e.g. `ret`/`mov`/`lea`).
        const BASELINE    = 0;
    }
}

impl Default for CpuFeatures {
    fn default() -> Self {
        CpuFeatures::BASELINE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_membership() {
        let caps = CpuFeatures::AVX2 | CpuFeatures::SSE2;
        assert!(caps.contains(CpuFeatures::AVX2));
        assert!(caps.contains(CpuFeatures::SSE2));
        assert!(!caps.contains(CpuFeatures::AVX512F));
    }

    #[test]
    fn baseline_is_always_satisfied() {
        let caps = CpuFeatures::empty();
        assert!(caps.contains(CpuFeatures::BASELINE));
    }
}
