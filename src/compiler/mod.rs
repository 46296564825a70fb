//! JIT compiler for the PReLU forward kernel.
//!
//! # Pipeline
//!
//! ```text
//! KernelDescriptor → resolve_isa → RegisterPlan → codegen::generate → ExecutableBuffer
//!                        ↑              ↑                ↑
//!                   dispatch/      register_plan.rs   codegen/
//!                    isa.rs                           x86_64.rs, io.rs, simd_ops.rs
//! ```
//!
//! `GeneratedKernel` ties the stages together and owns the result.

pub mod executable;
pub mod kernel;
pub mod register_plan;

#[cfg(feature = "jit-x86")]
pub mod codegen;

pub use executable::ExecutableBuffer;
pub use kernel::{CallParams, GeneratedKernel, KernelFn};
pub use register_plan::{Bf16Consts, ConstRegs, RegisterPlan, TailPolicy, VReg};

#[cfg(feature = "jit-x86")]
pub use codegen::CodegenOutput;
