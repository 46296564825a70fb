//! GeneratedKernel — a JIT-compiled PReLU forward kernel and its call ABI.
//!
//! Construction runs the whole pipeline once (resolve → plan → emit →
//! executable buffer). The resulting kernel is immutable and may be invoked
//! concurrently from many threads on disjoint memory.

use std::ffi::c_void;
use std::fmt;
#[cfg(feature = "jit-x86")]
use std::path::Path;

use rayon::prelude::*;

use crate::compiler::executable::ExecutableBuffer;
use crate::compiler::register_plan::{RegisterPlan, TailPolicy};
use crate::dispatch::{self, CpuFeatures, IsaVariant, JitConfig};
use crate::types::{KernelDescriptor, PreluElement, PreluError, PreluResult, WeightMode};

/// Minimum elements per rayon task in `forward_parallel`.
const MIN_PARALLEL_CHUNK: usize = 16 * 1024;

/// Runtime arguments of one kernel call. Field order is part of the ABI:
/// the generated prologue reads the fields at their `offset_of!` offsets.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CallParams {
    pub src: *const c_void,
    pub weights: *const c_void,
    pub dst: *mut c_void,
    /// Elements to process in this call.
    pub compute_size: usize,
}

/// Signature of the generated code.
pub type KernelFn = unsafe extern "C" fn(params: *const CallParams);

/// A compiled PReLU forward kernel.
pub struct GeneratedKernel {
    desc: KernelDescriptor,
    plan: RegisterPlan,
    tail: TailPolicy,
    buffer: ExecutableBuffer,
}

impl GeneratedKernel {
    /// Build a kernel for `desc` on the best variant this host supports,
    /// honoring the process-wide `JitConfig`.
    pub fn create(desc: KernelDescriptor) -> PreluResult<Self> {
        Self::create_with(desc, dispatch::host_features(), dispatch::jit_config())
    }

    /// Build a kernel against explicit host features and configuration.
    ///
    /// Code can be generated for features the running CPU lacks; such a
    /// kernel must not be invoked.
    #[cfg(feature = "jit-x86")]
    pub fn create_with(
        desc: KernelDescriptor,
        host: &CpuFeatures,
        config: &JitConfig,
    ) -> PreluResult<Self> {
        let isa = dispatch::resolve_isa(&desc, host, config.max_isa)?;
        let desc = desc.with_isa(isa);
        let plan = RegisterPlan::new(&desc, isa)?;
        let tail = TailPolicy::new(desc.element_count(), plan.vector_width);

        log::debug!(
            "prelu plan: {isa} reserved={} per_group={} max_unroll={} unroll={}",
            plan.reserved_constant_registers,
            plan.registers_per_group,
            plan.max_unroll_factor,
            plan.unroll_factor
        );

        let output = crate::compiler::codegen::generate(&desc, &plan)?;
        if let Some(dir) = &config.dump_dir {
            dump_code(dir, &desc, isa, &output.code);
        }
        let buffer = ExecutableBuffer::new(&output.code)?;

        Ok(GeneratedKernel {
            desc,
            plan,
            tail,
            buffer,
        })
    }

    #[cfg(not(feature = "jit-x86"))]
    pub fn create_with(
        _desc: KernelDescriptor,
        _host: &CpuFeatures,
        _config: &JitConfig,
    ) -> PreluResult<Self> {
        Err(PreluError::Unsupported(
            "built without the jit-x86 feature".into(),
        ))
    }

    /// Run the generated code.
    ///
    /// # Safety
    ///
    /// - The host must support `self.isa()`.
    /// - `src` and `dst` must be valid for `compute_size` elements of the
    ///   kernel dtype; `weights` for one element (scalar mode) or
    ///   `compute_size` elements (per-channel mode).
    /// - `compute_size <= element_count` and `compute_size` is a multiple of
    ///   `simd_w()` or congruent to the tail size modulo `simd_w()`.
    /// - `dst` must not be written concurrently by anyone else.
    #[inline]
    pub unsafe fn invoke(&self, params: &CallParams) {
        let f: KernelFn = std::mem::transmute::<*const u8, KernelFn>(self.buffer.as_ptr());
        f(params);
    }

    /// Safe entry: validates dtype and lengths, then runs the kernel over
    /// `src.len()` elements.
    pub fn forward<T: PreluElement>(&self, src: &[T], weights: &[T], dst: &mut [T]) -> PreluResult<()> {
        self.validate::<T>(src.len(), weights.len(), dst.len())?;
        let params = CallParams {
            src: src.as_ptr().cast(),
            weights: weights.as_ptr().cast(),
            dst: dst.as_mut_ptr().cast(),
            compute_size: src.len(),
        };
        // SAFETY: dtype, lengths and host support were checked above.
        unsafe { self.invoke(&params) };
        Ok(())
    }

    /// Like `forward`, split across the rayon pool in vector-aligned chunks.
    /// Only the last chunk can carry the tail.
    pub fn forward_parallel<T: PreluElement>(
        &self,
        src: &[T],
        weights: &[T],
        dst: &mut [T],
    ) -> PreluResult<()> {
        let n = src.len();
        self.validate::<T>(n, weights.len(), dst.len())?;

        let vw = self.simd_w();
        let per_thread = n.div_ceil(rayon::current_num_threads().max(1)).max(MIN_PARALLEL_CHUNK);
        let chunk = per_thread.div_ceil(vw) * vw;
        if chunk >= n {
            return self.forward(src, weights, dst);
        }

        let per_channel = self.desc.weight_mode() == WeightMode::PerChannel;
        src.par_chunks(chunk)
            .zip(dst.par_chunks_mut(chunk))
            .enumerate()
            .try_for_each(|(idx, (s, d))| {
                let w = if per_channel {
                    &weights[idx * chunk..idx * chunk + s.len()]
                } else {
                    weights
                };
                self.forward(s, w, d)
            })
    }

    fn validate<T: PreluElement>(&self, n: usize, weights: usize, dst: usize) -> PreluResult<()> {
        if T::DTYPE != self.desc.dtype() {
            return Err(PreluError::DTypeMismatch {
                expected: self.desc.dtype(),
                got: T::DTYPE,
            });
        }
        let rem = n % self.simd_w();
        if n > self.desc.element_count() || (rem != 0 && rem != self.tail.tail_size) {
            return Err(PreluError::ShapeMismatch {
                operand: "src",
                expected: self.desc.element_count(),
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
        let expected = self.desc.weight_mode().weights_len(n);
        if weights != expected {
            return Err(PreluError::ShapeMismatch {
                operand: "weights",
                expected,
                got: weights,
            });
        }
        if !dispatch::host_features().supports(self.isa()) {
            return Err(PreluError::Unsupported(format!(
                "kernel generated for {}, host only has {}",
                self.isa(),
                dispatch::host_features()
            )));
        }
        Ok(())
    }

    /// Descriptor with the resolved variant filled in.
    pub fn descriptor(&self) -> &KernelDescriptor {
        &self.desc
    }

    pub fn isa(&self) -> IsaVariant {
        self.plan.isa
    }

    pub fn plan(&self) -> &RegisterPlan {
        &self.plan
    }

    pub fn tail_policy(&self) -> &TailPolicy {
        &self.tail
    }

    /// f32 lanes per vector.
    pub fn simd_w(&self) -> usize {
        self.plan.vector_width
    }

    pub fn code_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn code(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    #[cfg(feature = "jit-x86")]
    pub fn disassemble(&self) -> String {
        crate::compiler::codegen::disassemble(self.code())
    }
}

impl fmt::Debug for GeneratedKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKernel")
            .field("desc", &self.desc)
            .field("unroll", &self.plan.unroll_factor)
            .field("tail", &self.tail.tail_size)
            .field("code_size", &self.buffer.len())
            .finish()
    }
}

/// `prelu_jit_<isa>_<dtype>_<mode>_<n>.bin`
pub fn dump_file_name(desc: &KernelDescriptor, isa: IsaVariant) -> String {
    format!(
        "prelu_jit_{}_{}_{}_{}.bin",
        isa.name(),
        desc.dtype().name(),
        desc.weight_mode().name(),
        desc.element_count()
    )
}

#[cfg(feature = "jit-x86")]
fn dump_code(dir: &Path, desc: &KernelDescriptor, isa: IsaVariant, code: &[u8]) {
    let path = dir.join(dump_file_name(desc, isa));
    match std::fs::write(&path, code) {
        Ok(()) => {
            log::debug!("prelu jit: dumped {} bytes to {}", code.len(), path.display());
            if log::log_enabled!(log::Level::Trace) {
                log::trace!("{}", crate::compiler::codegen::disassemble(code));
            }
        }
        Err(err) => log::warn!("prelu jit: cannot dump code to {}: {err}", path.display()),
    }
}
