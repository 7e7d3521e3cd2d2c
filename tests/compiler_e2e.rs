//! End-to-end scenarios driving `UniCompiler` from register creation
//! through `finalize`, the concrete instruction table's worked examples
//! exercised through the façade rather than against a single opcode.

use jitforge::{Architecture, CallConv, CpuFeatures, FmaPolicy, UniOp, Verb};

#[test]
fn gp_add_emits_a_nonempty_buffer_ending_in_no_unresolved_labels() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64);
    c.add_func("add_two").unwrap();
    let dst = c.new_gp64(None);
    let src1 = c.new_gp64(None);
    let src2 = c.new_gp64(None);
    c.emit(UniOp::Rrr {
        verb: Verb::AddGp64,
        dst,
        src1,
        src2,
    })
    .unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    assert!(!code.is_empty());
}

#[test]
fn vector_add_without_avx_falls_back_to_sse2_path() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64);
    c.add_func("vadd").unwrap();
    let dst = c.new_xmm(None);
    let src1 = c.new_xmm(None);
    let src2 = c.new_xmm(None);
    c.emit(UniOp::Vvv {
        verb: Verb::AddU32,
        dst,
        src1,
        src2,
    })
    .unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    // paddd's 0F FE opcode, with a mandatory 0x66 prefix, must appear
    // somewhere in the encoded stream once a legacy-SSE2-only feature set
    // rules out every VEX-encoded candidate in the cascade.
    assert!(code.windows(3).any(|w| w == [0x66, 0x0F, 0xFE]));
}

#[test]
fn fma_requires_accumulator_policy_and_feature_together() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::AVX2, CallConv::SysvAmd64)
        .with_fma_policy(FmaPolicy::FmaStoreToAccumulator);
    c.add_func("madd").unwrap();
    let dst = c.new_xmm(None);
    let src1 = c.new_xmm(None);
    let src2 = c.new_xmm(None);
    let src3 = c.new_xmm(None);
    let err = c
        .emit(UniOp::Vvvv {
            verb: Verb::MAddF32,
            dst,
            src1,
            src2,
            src3,
        })
        .unwrap_err();
    assert!(matches!(err, jitforge::CodegenError::UnsupportedOp(_)));
    assert!(c.finalize().is_err(), "a poisoned compiler must never hand back bytes");
}

#[test]
fn fma_succeeds_once_the_fma_feature_and_policy_line_up() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::FMA, CallConv::SysvAmd64)
        .with_fma_policy(FmaPolicy::FmaStoreToAccumulator);
    c.add_func("madd").unwrap();
    let dst = c.new_xmm(None);
    let src1 = c.new_xmm(None);
    let src2 = c.new_xmm(None);
    c.emit(UniOp::Vvvv {
        verb: Verb::MAddF32,
        dst,
        src1,
        src2,
        src3: dst,
    })
    .unwrap();
    c.end_func().unwrap();
    assert!(c.finalize().is_ok());
}

#[test]
fn simd_const_participates_in_a_later_op_and_emits_a_trailing_data_blob() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64);
    c.add_func("const_add").unwrap();
    let k = c.simd_const(vec![0u8; 16], false, 16).unwrap();
    let dst = c.new_xmm(None);
    c.emit(UniOp::Vvv {
        verb: Verb::AddU32,
        dst,
        src1: k,
        src2: k,
    })
    .unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    // the constant's 16 zero bytes must show up somewhere past the code,
    // not just be silently dropped by `end_func`.
    assert!(code.len() >= 16);
}

#[test]
fn shared_const_pool_loads_through_an_absolute_address() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64)
        .with_shared_const_pool();
    c.add_func("const_add_global").unwrap();
    let k = c.simd_const(vec![0u8; 16], false, 16).unwrap();
    let dst = c.new_xmm(None);
    c.emit(UniOp::Vvv {
        verb: Verb::AddU32,
        dst,
        src1: k,
        src2: k,
    })
    .unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    // `mov r64, imm64` (REX.W + 0xB8+r) loading the constant's relocated
    // absolute address, ahead of the 16 zero bytes the pool lays out once
    // at the end of the buffer.
    assert!(code.windows(2).any(|w| w == [0x48, 0xB8]));
    assert!(code.len() >= 16);
}

#[test]
fn cond_select_lowers_through_compare_and_cmov() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64);
    c.add_func("select").unwrap();
    let dst = c.new_gp64(None);
    let a = c.new_gp64(None);
    let b = c.new_gp64(None);
    let if_true = c.new_gp64(None);
    let if_false = c.new_gp64(None);
    c.emit(UniOp::Cond {
        verb: Verb::CmpEqGp,
        dst,
        src1: a,
        src2: b,
        if_true,
        if_false,
    })
    .unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    // cmp r/m64,r64 (0x39) followed somewhere later by a cmovcc (0x0F 0x4x).
    assert!(code.iter().any(|&b| b == 0x39));
    assert!(code.windows(2).any(|w| w[0] == 0x0F && (0x40..=0x4F).contains(&w[1])));
}

#[test]
fn backward_jump_to_a_nearby_label_takes_the_short_form() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64);
    c.add_func("loop_tail").unwrap();
    let counter = c.new_gp64(None);
    let top = c.new_label(Some("loop_top"));
    c.bind_label(top).unwrap();
    c.emit_mov_imm(counter, 0).unwrap();
    c.jump(top).unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    // The backward jump lands only a few bytes behind itself, well within
    // `i8` range, so `finalize` must narrow it to `jmp rel8` (0xEB) rather
    // than leave the long `jmp rel32` (0xE9) form it was built with.
    assert!(code.iter().any(|&b| b == 0xEB));
    assert!(!code.iter().any(|&b| b == 0xE9));
}

#[test]
fn jump_if_equal_emits_a_compare_and_a_conditional_branch() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64);
    c.add_func("branch_eq").unwrap();
    let a = c.new_gp64(None);
    let b = c.new_gp64(None);
    let target = c.new_label(Some("eq_target"));
    c.jump_if_equal(a, b, target).unwrap();
    c.bind_label(target).unwrap();
    c.emit_mov_imm(a, 1).unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    assert!(code.iter().any(|&byte| byte == 0x39), "expected a cmp byte");
    // `je` forward to a not-yet-bound label can't be proven short, so it
    // must stay the long `0F 84` form.
    assert!(code.windows(2).any(|w| w == [0x0F, 0x84]));
}

#[test]
fn mov_immediate_zero_is_peephole_rewritten_in_a_real_program() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::SSE2, CallConv::SysvAmd64);
    c.add_func("zero").unwrap();
    let dst = c.new_gp64(None);
    c.emit_mov_imm(dst, 0).unwrap();
    c.end_func().unwrap();
    let code = c.finalize().unwrap();
    // `mov reg, 0` (0xC7 /0 imm32) must never appear verbatim; the
    // zero-immediate peephole always rewrites it to `xor reg, reg` first.
    assert!(!code.windows(1).any(|w| w == [0xC7]));
}

#[test]
fn aarch64_compiler_collects_instructions_without_an_encoder() {
    let mut c = jitforge::UniCompiler::new(Architecture::AArch64, CpuFeatures::empty(), CallConv::Aapcs64);
    let err = c.finalize();
    assert!(err.is_err(), "AArch64 has no byte-level encoder behind it");
}

#[test]
fn poisoned_compiler_never_yields_partial_machine_code() {
    let mut c = jitforge::UniCompiler::new(Architecture::X86_64, CpuFeatures::empty(), CallConv::SysvAmd64);
    c.add_func("broken").unwrap();
    let dst = c.new_xmm(None);
    let src1 = c.new_xmm(None);
    let src2 = c.new_xmm(None);
    // no SSE2 in the feature set at all: every vector candidate in the
    // cascade is unavailable, so this must fail and poison the compiler.
    let result = c.emit(UniOp::Vvv {
        verb: Verb::AddU32,
        dst,
        src1,
        src2,
    });
    assert!(result.is_err());
    assert!(c.finalize().is_err());
}
