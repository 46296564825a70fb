//! Types shared by the resolver, the code generator and the kernel ABI.

use thiserror::Error;

use crate::dispatch::IsaVariant;

/// Element data type of the PReLU tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    BF16,
}

impl DType {
    /// Size in bytes per element.
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    /// Short lowercase name used in logs and dump file names.
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        }
    }
}

/// How the weight operand is laid out in memory.
///
/// There is deliberately no `Default`: the caller knows whether it slices
/// work per channel or applies one slope to the whole range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightMode {
    /// One weight element applied to every lane.
    Scalar,
    /// One weight element per data element, dense and aligned with `src`.
    PerChannel,
}

impl WeightMode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::PerChannel => "per_channel",
        }
    }

    /// Number of weight elements read for `compute_size` data elements.
    #[inline]
    pub const fn weights_len(self, compute_size: usize) -> usize {
        match self {
            Self::Scalar => 1,
            Self::PerChannel => compute_size,
        }
    }
}

/// Immutable description of one PReLU forward kernel instance.
///
/// Fully determines the generated code. `isa` is `None` until resolution;
/// a descriptor returned by a generated kernel always carries the variant it
/// was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelDescriptor {
    element_count: usize,
    dtype: DType,
    weight_mode: WeightMode,
    isa: Option<IsaVariant>,
}

impl KernelDescriptor {
    pub const fn new(element_count: usize, dtype: DType, weight_mode: WeightMode) -> Self {
        Self {
            element_count,
            dtype,
            weight_mode,
            isa: None,
        }
    }

    /// Pin code generation to a specific ISA variant.
    pub const fn with_isa(mut self, isa: IsaVariant) -> Self {
        self.isa = Some(isa);
        self
    }

    #[inline]
    pub const fn element_count(&self) -> usize {
        self.element_count
    }

    #[inline]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    #[inline]
    pub const fn weight_mode(&self) -> WeightMode {
        self.weight_mode
    }

    #[inline]
    pub const fn isa(&self) -> Option<IsaVariant> {
        self.isa
    }
}

/// Errors from kernel construction and the safe invocation wrappers.
#[derive(Debug, Error)]
pub enum PreluError {
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("code generation failed: {0}")]
    Codegen(String),
    #[error("executable memory: {0}")]
    ExecutableMemory(String),
    #[error("shape mismatch for {operand}: expected {expected} elements, got {got}")]
    ShapeMismatch {
        operand: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("dtype mismatch: kernel generated for {expected:?}, called with {got:?}")]
    DTypeMismatch { expected: DType, got: DType },
    #[error("invalid ISA name: {0}")]
    InvalidIsaName(String),
}

pub type PreluResult<T> = Result<T, PreluError>;

#[cfg(feature = "jit-x86")]
impl From<iced_x86::IcedError> for PreluError {
    fn from(err: iced_x86::IcedError) -> Self {
        PreluError::Codegen(err.to_string())
    }
}

/// Element types the safe wrappers and the reference path accept.
pub trait PreluElement: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl PreluElement for f32 {
    const DTYPE: DType = DType::F32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl PreluElement for half::bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        half::bf16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        half::bf16::from_f32(v)
    }
}

impl PreluElement for half::f16 {
    const DTYPE: DType = DType::F16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        half::f16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        half::f16::from_f32(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DType::F32.size_bytes(), 4);
        assert_eq!(DType::BF16.size_bytes(), 2);
        assert_eq!(DType::F16.size_bytes(), 2);
    }

    #[test]
    fn test_weights_len() {
        assert_eq!(WeightMode::Scalar.weights_len(100), 1);
        assert_eq!(WeightMode::PerChannel.weights_len(100), 100);
        assert_eq!(WeightMode::PerChannel.weights_len(0), 0);
    }

    #[test]
    fn test_descriptor_pin() {
        let desc = KernelDescriptor::new(37, DType::F32, WeightMode::Scalar);
        assert_eq!(desc.isa(), None);
        let pinned = desc.with_isa(IsaVariant::Avx2);
        assert_eq!(pinned.isa(), Some(IsaVariant::Avx2));
        assert_eq!(pinned.element_count(), 37);
        assert_eq!(pinned.weight_mode(), WeightMode::Scalar);
    }

    #[test]
    fn test_element_conversions() {
        assert_eq!(<f32 as PreluElement>::DTYPE, DType::F32);
        assert_eq!(<half::bf16 as PreluElement>::DTYPE, DType::BF16);
        let v = <half::bf16 as PreluElement>::from_f32(1.5);
        assert_eq!(PreluElement::to_f32(v), 1.5);
    }
}
