//! gllm-prelu-jit: runtime-generated x86-64 kernels for PReLU forward.
//!
//! This crate provides a PReLU (`y = x >= 0 ? x : x * w`) forward operator with:
//! - **Runtime ISA Selection**: SSE4.1, AVX, AVX2, AVX-512 and AVX-512 BF16,
//!   detected once per process
//! - **Specialized Code**: one kernel per (length, dtype, weight mode, ISA),
//!   emitted with iced-x86 into an immutable executable mapping
//! - **f32 and bf16**: bf16 is widened to f32 for compute and narrowed with
//!   round-to-nearest-even
//! - **Scalar Fallback**: `PreluForward` runs the reference path when no
//!   variant fits
//!
//! # Quick Start
//!
//! ```ignore
//! use gllm_prelu_jit::{DType, KernelDescriptor, PreluForward, WeightMode};
//!
//! let desc = KernelDescriptor::new(src.len(), DType::F32, WeightMode::Scalar);
//! let prelu = PreluForward::new(desc)?;
//! prelu.forward(&src, &[0.25f32], &mut dst)?;
//! ```
//!
//! # Environment
//!
//! - `GLLM_PRELU_MAX_ISA`: cap the resolver (`sse41` .. `avx512_core_bf16`)
//! - `GLLM_PRELU_JIT_DUMP`: write generated code to this directory

pub mod compiler;
pub mod dispatch;
pub mod ops;
pub mod types;

pub use compiler::{CallParams, GeneratedKernel, RegisterPlan, TailPolicy};
pub use dispatch::{host_features, jit_config, resolve_isa, CpuFeatures, IsaVariant, JitConfig};
pub use ops::{prelu_forward_ref, PreluForward};
pub use types::{DType, KernelDescriptor, PreluElement, PreluError, PreluResult, WeightMode};
