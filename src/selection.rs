//! The x86-64 selection table (spec §4.5 "Selection rules (x86)" / §9
//! "Feature-guarded selection"): maps a [`Verb`](crate::uniop::Verb) plus
//! vector width to an ordered cascade of candidate instructions, picking
//! the first whose required features the caller's [`CpuFeatures`] satisfy.
//!
//! No teacher file builds a table shaped exactly like this (cranelift
//! lowers through ISLE term-rewriting instead), but the idea — "replace
//! the if/else cascade with a table of `(requirements, strategy)` entries,
//! pick the first satisfied one" — is spec §9's own design note, applied
//! directly against the rows already present in [`crate::inst_db`].

use crate::error::{CodegenError, CodegenResult};
use crate::inst_db::InstId;
use crate::isa::x86::features::CpuFeatures;
use crate::uniop::Verb;

/// Vector register width a cascade entry targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VecWidth {
    W128,
    W256,
}

struct Candidate {
    inst: InstId,
    requires: CpuFeatures,
}

/// Pick the first legal encoding for `verb` at `width` given the assumed
/// `features`, following the cascade order named in spec §4.5: AVX-512 →
/// AVX2 → AVX → SSE4.1 → SSSE3 → SSE2. Candidate lists below are listed in
/// that same order; the scan takes the first whose requirement is met.
pub fn select_vector(verb: Verb, width: VecWidth, features: CpuFeatures) -> CodegenResult<InstId> {
    let cascade: &[Candidate] = match (verb, width) {
        (Verb::AddU32, VecWidth::W256) => &[Candidate {
            inst: InstId::VpadddVexRvmAvx2,
            requires: CpuFeatures::AVX2,
        }],
        (Verb::AddU32, VecWidth::W128) => &[
            Candidate {
                inst: InstId::VpadddVexRvmAvx,
                requires: CpuFeatures::AVX,
            },
            Candidate {
                inst: InstId::PadddRmRSse2,
                requires: CpuFeatures::SSE2,
            },
        ],
        (Verb::AddF32, VecWidth::W128) => &[
            Candidate {
                inst: InstId::VaddpsVexRvmAvx,
                requires: CpuFeatures::AVX,
            },
            Candidate {
                inst: InstId::AddpsRmRSse2,
                requires: CpuFeatures::SSE2,
            },
        ],
        (Verb::ShuffleBytesU8, VecWidth::W128) => &[Candidate {
            inst: InstId::PshufbRmRSsse3,
            requires: CpuFeatures::SSSE3,
        }],
        (Verb::MulI32, VecWidth::W128) => &[Candidate {
            inst: InstId::PmulldRmRSse41,
            requires: CpuFeatures::SSE41,
        }],
        (Verb::BroadcastU64, VecWidth::W128) => &[Candidate {
            inst: InstId::VbroadcastqVexRmAvx2,
            requires: CpuFeatures::AVX2,
        }],
        (Verb::MAddF32, VecWidth::W128) => &[Candidate {
            inst: InstId::VfmaddVexRvmFma,
            requires: CpuFeatures::FMA,
        }],
        (Verb::MovVecAligned, VecWidth::W128) => &[Candidate {
            inst: InstId::MovapsRmRSse2,
            requires: CpuFeatures::SSE2,
        }],
        (Verb::MovVecUnaligned, VecWidth::W128) => &[Candidate {
            inst: InstId::MovdquRmRSse2,
            requires: CpuFeatures::SSE2,
        }],
        (Verb::MaskMove, _) => &[Candidate {
            inst: InstId::KmovqRRAvx512,
            requires: CpuFeatures::AVX512F,
        }],
        _ => &[],
    };

    cascade
        .iter()
        .find(|c| features.contains(c.requires))
        .map(|c| c.inst)
        .ok_or_else(|| {
            CodegenError::UnsupportedOp(format!(
                "no legal encoding for {:?} at {:?} with features {:?}",
                verb, width, features
            ))
        })
}

/// GP-group verbs have a single encoding regardless of feature set — no
/// cascade to walk, just a direct table.
pub fn select_gp(verb: Verb) -> CodegenResult<InstId> {
    match verb {
        Verb::AddGp64 => Ok(InstId::AddRmR),
        Verb::MovGpReg => Ok(InstId::MovRmR),
        Verb::MovGpImm => Ok(InstId::MovRegImm64),
        Verb::CmpEqGp => Ok(InstId::CmpRmR),
        other => Err(CodegenError::UnsupportedOp(format!(
            "{:?} is not a GP-group verb",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avx2_preferred_over_avx_when_both_present() {
        let features = CpuFeatures::AVX | CpuFeatures::AVX2 | CpuFeatures::SSE2;
        let inst = select_vector(Verb::AddU32, VecWidth::W128, features).unwrap();
        assert_eq!(inst, InstId::VpadddVexRvmAvx);
    }

    #[test]
    fn falls_back_to_sse2_when_no_avx() {
        let inst = select_vector(Verb::AddU32, VecWidth::W128, CpuFeatures::SSE2).unwrap();
        assert_eq!(inst, InstId::PadddRmRSse2);
    }

    #[test]
    fn missing_feature_is_unsupported_op() {
        let err = select_vector(Verb::AddU32, VecWidth::W128, CpuFeatures::empty()).unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedOp(_)));
    }

    #[test]
    fn fma_requires_fma_feature_with_no_fallback_row() {
        let err = select_vector(Verb::MAddF32, VecWidth::W128, CpuFeatures::AVX2).unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedOp(_)));
        let ok = select_vector(Verb::MAddF32, VecWidth::W128, CpuFeatures::FMA).unwrap();
        assert_eq!(ok, InstId::VfmaddVexRvmFma);
    }

    #[test]
    fn gp_verbs_are_feature_independent() {
        assert_eq!(select_gp(Verb::AddGp64).unwrap(), InstId::AddRmR);
        assert_eq!(select_gp(Verb::MovGpReg).unwrap(), InstId::MovRmR);
    }
}
