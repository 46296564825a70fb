//! PReLU forward: `dst = src >= 0 ? src : src * w`.
//!
//! `prelu_forward_ref` is the scalar definition the JIT kernels are tested
//! against; `PreluForward` picks the JIT when the host and dtype allow and
//! falls back to the reference otherwise.

use crate::compiler::GeneratedKernel;
use crate::types::{KernelDescriptor, PreluElement, PreluError, PreluResult, WeightMode};

/// Scalar PReLU over `src.len()` elements, computed in f32.
///
/// NaN inputs stay NaN, `-0.0` stays `-0.0`. Reduced-precision outputs are
/// rounded to nearest even.
#[inline]
pub fn prelu_forward_ref<T: PreluElement>(
    src: &[T],
    weights: &[T],
    weight_mode: WeightMode,
    dst: &mut [T],
) {
    debug_assert_eq!(src.len(), dst.len());
    debug_assert_eq!(weights.len(), weight_mode.weights_len(src.len()));

    match weight_mode {
        WeightMode::Scalar => {
            let w = weights[0].to_f32();
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = T::from_f32(prelu_scalar(s.to_f32(), w));
            }
        }
        WeightMode::PerChannel => {
            for ((d, &s), &w) in dst.iter_mut().zip(src).zip(weights) {
                *d = T::from_f32(prelu_scalar(s.to_f32(), w.to_f32()));
            }
        }
    }
}

#[inline(always)]
fn prelu_scalar(x: f32, w: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        x * w
    }
}

/// PReLU forward executor: JIT kernel or scalar fallback.
#[derive(Debug)]
pub enum PreluForward {
    Jit(GeneratedKernel),
    Reference(KernelDescriptor),
}

impl PreluForward {
    /// Compile a kernel for `desc`, falling back to the reference path when
    /// no variant can serve it. Other failures are returned.
    pub fn new(desc: KernelDescriptor) -> PreluResult<Self> {
        match GeneratedKernel::create(desc) {
            Ok(kernel) => Ok(PreluForward::Jit(kernel)),
            Err(PreluError::Unsupported(reason)) => {
                log::debug!("prelu: using scalar reference ({reason})");
                Ok(PreluForward::Reference(desc))
            }
            Err(err) => Err(err),
        }
    }

    pub fn is_jit(&self) -> bool {
        matches!(self, PreluForward::Jit(_))
    }

    pub fn descriptor(&self) -> &KernelDescriptor {
        match self {
            PreluForward::Jit(kernel) => kernel.descriptor(),
            PreluForward::Reference(desc) => desc,
        }
    }

    pub fn forward<T: PreluElement>(&self, src: &[T], weights: &[T], dst: &mut [T]) -> PreluResult<()> {
        match self {
            PreluForward::Jit(kernel) => kernel.forward(src, weights, dst),
            PreluForward::Reference(desc) => {
                check_reference_args::<T>(desc, src.len(), weights.len(), dst.len())?;
                prelu_forward_ref(src, weights, desc.weight_mode(), dst);
                Ok(())
            }
        }
    }

    /// Parallel variant; the reference path runs on the calling thread.
    pub fn forward_parallel<T: PreluElement>(
        &self,
        src: &[T],
        weights: &[T],
        dst: &mut [T],
    ) -> PreluResult<()> {
        match self {
            PreluForward::Jit(kernel) => kernel.forward_parallel(src, weights, dst),
            PreluForward::Reference(_) => self.forward(src, weights, dst),
        }
    }
}

fn check_reference_args<T: PreluElement>(
    desc: &KernelDescriptor,
    n: usize,
    weights: usize,
    dst: usize,
) -> PreluResult<()> {
    if T::DTYPE != desc.dtype() {
        return Err(PreluError::DTypeMismatch {
            expected: desc.dtype(),
            got: T::DTYPE,
        });
    }
    if n > desc.element_count() {
        return Err(PreluError::ShapeMismatch {
            operand: "src",
            expected: desc.element_count(),
            got: n,
        });
    }
    if dst != n {
        return Err(PreluError::ShapeMismatch {
            operand: "dst",
            expected: n,
            got: dst,
        });
    }
    let expected = desc.weight_mode().weights_len(n);
    if weights != expected {
        return Err(PreluError::ShapeMismatch {
            operand: "weights",
            expected,
            got: weights,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;
    use half::{bf16, f16};

    #[test]
    fn test_ref_scalar_weight() {
        let src = [3.0f32, -3.0];
        let mut dst = [0.0f32; 2];
        prelu_forward_ref(&src, &[-2.0], WeightMode::Scalar, &mut dst);
        assert_eq!(dst, [3.0, 6.0]);
    }

    #[test]
    fn test_ref_per_channel() {
        let src = [1.0f32, -1.0, -4.0, 0.0];
        let w = [0.5f32, 0.25, 0.5, 9.0];
        let mut dst = [0.0f32; 4];
        prelu_forward_ref(&src, &w, WeightMode::PerChannel, &mut dst);
        assert_eq!(dst, [1.0, -0.25, -2.0, 0.0]);
    }

    #[test]
    fn test_ref_special_values() {
        let src = [f32::NAN, -0.0, f32::NEG_INFINITY];
        let mut dst = [0.0f32; 3];
        prelu_forward_ref(&src, &[0.1], WeightMode::Scalar, &mut dst);
        assert!(dst[0].is_nan());
        assert_eq!(dst[1].to_bits(), (-0.0f32).to_bits());
        assert_eq!(dst[2], f32::NEG_INFINITY);
    }

    #[test]
    fn test_ref_bf16_rounds_to_nearest_even() {
        let src = [bf16::from_f32(-1.0), bf16::from_f32(2.0)];
        let w = [bf16::from_f32(0.1)];
        let mut dst = [bf16::ZERO; 2];
        prelu_forward_ref(&src, &w, WeightMode::Scalar, &mut dst);
        assert_eq!(dst[0], bf16::from_f32(-w[0].to_f32()));
        assert_eq!(dst[1], src[1]);
    }

    #[test]
    fn test_f16_falls_back_to_reference() {
        let desc = KernelDescriptor::new(8, DType::F16, WeightMode::Scalar);
        let exec = PreluForward::new(desc).unwrap();
        assert!(!exec.is_jit());

        let src: Vec<f16> = [-2.0f32, -1.0, 0.0, 1.0, 2.0, -0.5, 3.0, -8.0]
            .iter()
            .map(|&v| f16::from_f32(v))
            .collect();
        let mut dst = vec![f16::ZERO; 8];
        exec.forward(&src, &[f16::from_f32(0.5)], &mut dst).unwrap();
        assert_eq!(dst[0].to_f32(), -1.0);
        assert_eq!(dst[7].to_f32(), -4.0);
        assert_eq!(dst[4].to_f32(), 2.0);
    }

    #[test]
    fn test_reference_validates_arguments() {
        let exec = PreluForward::Reference(KernelDescriptor::new(4, DType::F32, WeightMode::PerChannel));
        let mut dst = [0.0f32; 4];
        assert!(matches!(
            exec.forward(&[1.0f32; 4], &[1.0], &mut dst),
            Err(PreluError::ShapeMismatch { operand: "weights", .. })
        ));
        assert!(matches!(
            exec.forward(&[bf16::ZERO; 4], &[bf16::ZERO; 4], &mut [bf16::ZERO; 4]),
            Err(PreluError::DTypeMismatch { .. })
        ));
        // Fewer elements than planned is fine; there is no vector contract.
        let mut short = [0.0f32; 3];
        exec.forward(&[-1.0f32; 3], &[2.0; 3], &mut short).unwrap();
        assert_eq!(short, [-2.0; 3]);
    }

    #[test]
    fn test_executor_matches_reference() {
        let n = 203;
        let desc = KernelDescriptor::new(n, DType::F32, WeightMode::PerChannel);
        let exec = PreluForward::new(desc).unwrap();
        let src: Vec<f32> = (0..n).map(|i| (i as f32 - 100.0) * 0.37).collect();
        let w: Vec<f32> = (0..n).map(|i| (i % 7) as f32 * 0.125 - 0.25).collect();
        let mut got = vec![0.0f32; n];
        let mut want = vec![0.0f32; n];
        exec.forward(&src, &w, &mut got).unwrap();
        prelu_forward_ref(&src, &w, WeightMode::PerChannel, &mut want);
        assert_eq!(got, want);
    }
}
