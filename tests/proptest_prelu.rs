//! Property-based tests for the PReLU JIT.
//!
//! - Register plan budget and tail arithmetic for all sizes
//! - JIT output equals the scalar reference (f32 and bf16)
//! - Nothing outside `compute_size` is written

#![cfg(target_arch = "x86_64")]
#![cfg(feature = "jit-x86")]

use proptest::prelude::*;

use half::bf16;

use gllm_prelu_jit::compiler::RegisterPlan;
use gllm_prelu_jit::{
    host_features, prelu_forward_ref, CallParams, DType, GeneratedKernel, IsaVariant, JitConfig,
    KernelDescriptor, TailPolicy, WeightMode,
};

fn arb_isa() -> impl Strategy<Value = IsaVariant> {
    prop::sample::select(IsaVariant::DESCENDING.to_vec())
}

fn arb_mode() -> impl Strategy<Value = WeightMode> {
    prop_oneof![Just(WeightMode::Scalar), Just(WeightMode::PerChannel)]
}

fn arb_dtype() -> impl Strategy<Value = DType> {
    prop_oneof![Just(DType::F32), Just(DType::BF16)]
}

/// Finite values, including subnormals and normals near the underflow
/// threshold.
fn arb_value() -> impl Strategy<Value = f32> {
    prop_oneof![
        -1.0e6f32..1.0e6,
        -4.0f32..4.0,
        -1.0e-37f32..1.0e-37,
        prop::num::f32::POSITIVE | prop::num::f32::NEGATIVE | prop::num::f32::SUBNORMAL,
        Just(0.0f32),
        Just(-0.0f32),
    ]
}

/// A host variant able to run `dtype`, if any.
fn host_isa(dtype: DType) -> Option<IsaVariant> {
    IsaVariant::DESCENDING
        .into_iter()
        .find(|&isa| isa.supports_dtype(dtype) && host_features().supports(isa))
}

fn kernel(n: usize, dtype: DType, mode: WeightMode, isa: IsaVariant) -> GeneratedKernel {
    let desc = KernelDescriptor::new(n, dtype, mode).with_isa(isa);
    GeneratedKernel::create_with(desc, host_features(), &JitConfig::default()).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
// 1. Register plan and tail arithmetic
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn prop_plan_within_budget(
        n in 0usize..100_000,
        isa in arb_isa(),
        dtype in arb_dtype(),
        mode in arb_mode(),
    ) {
        let desc = KernelDescriptor::new(n, dtype, mode);
        match RegisterPlan::new(&desc, isa) {
            Ok(plan) => {
                prop_assert!(isa.supports_dtype(dtype));
                prop_assert!(plan.unroll_factor >= 1);
                prop_assert!(plan.unroll_factor <= plan.max_unroll_factor);
                prop_assert!(plan.registers_used() <= plan.total_registers);
                prop_assert_eq!(
                    plan.available_compute_registers,
                    plan.total_registers - plan.reserved_constant_registers
                );
            }
            Err(_) => prop_assert!(!isa.supports_dtype(dtype)),
        }
    }

    #[test]
    fn prop_tail_covers_remainder(n in 0usize..1_000_000, isa in arb_isa()) {
        let vw = isa.vector_width();
        let tail = TailPolicy::new(n, vw);
        prop_assert!(tail.tail_size < vw);
        prop_assert_eq!(tail.requires_mask, tail.tail_size > 0);
        prop_assert_eq!(TailPolicy::full_elements(n, vw) + tail.tail_size, n);
        prop_assert_eq!(TailPolicy::full_elements(n, vw) % vw, 0);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// 2. JIT equals reference
// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_f32_matches_reference(
        src in prop::collection::vec(arb_value(), 0..300),
        w in prop::collection::vec(-2.0f32..2.0, 300),
        mode in arb_mode(),
    ) {
        let Some(isa) = host_isa(DType::F32) else { return Ok(()); };
        let n = src.len();
        let w = &w[..mode.weights_len(n)];
        let k = kernel(n, DType::F32, mode, isa);

        let mut got = vec![0.0f32; n];
        let mut want = vec![0.0f32; n];
        k.forward(&src, w, &mut got).unwrap();
        prelu_forward_ref(&src, w, mode, &mut want);
        let got: Vec<u32> = got.iter().map(|v| v.to_bits()).collect();
        let want: Vec<u32> = want.iter().map(|v| v.to_bits()).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn prop_bf16_matches_reference(
        src in prop::collection::vec(arb_value(), 0..300),
        w in prop::collection::vec(-2.0f32..2.0, 300),
        mode in arb_mode(),
    ) {
        let Some(isa) = host_isa(DType::BF16) else { return Ok(()); };
        let n = src.len();
        let src: Vec<bf16> = src.iter().map(|&v| bf16::from_f32(v)).collect();
        let w: Vec<bf16> = w[..mode.weights_len(n)].iter().map(|&v| bf16::from_f32(v)).collect();
        let k = kernel(n, DType::BF16, mode, isa);

        let mut got = vec![bf16::ZERO; n];
        let mut want = vec![bf16::ZERO; n];
        k.forward(&src, &w, &mut got).unwrap();
        prelu_forward_ref(&src, &w, mode, &mut want);
        let got: Vec<u16> = got.iter().map(|v| v.to_bits()).collect();
        let want: Vec<u16> = want.iter().map(|v| v.to_bits()).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn prop_no_write_past_compute_size(n in 0usize..200, slack in 1usize..40) {
        let Some(isa) = host_isa(DType::F32) else { return Ok(()); };
        let k = kernel(n, DType::F32, WeightMode::PerChannel, isa);
        let src = vec![-1.0f32; n + slack];
        let w = vec![3.0f32; n + slack];
        let mut dst = vec![f32::MAX; n + slack];
        let params = CallParams {
            src: src.as_ptr().cast(),
            weights: w.as_ptr().cast(),
            dst: dst.as_mut_ptr().cast(),
            compute_size: n,
        };
        unsafe { k.invoke(&params) };
        prop_assert!(dst[..n].iter().all(|&v| v == -3.0));
        prop_assert!(dst[n..].iter().all(|&v| v == f32::MAX));
    }
}
