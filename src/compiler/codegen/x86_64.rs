//! x86_64 PReLU forward emitter via iced-x86 CodeAssembler.
//!
//! Generated function: `extern "C" fn(params: *const CallParams)` (SysV).
//!
//! GPR assignment (all volatile, nothing to save):
//!
//! ```text
//!   rdi  params pointer
//!   r8   src        r9   weights    r10  dst
//!   r11  remaining elements
//!   rax  element offset shared by src/weights/dst
//!   rdx  scratch for immediates (tail mask, bf16 constants)
//! ```
//!
//! Layout:
//!
//! ```text
//!   prologue        load params, xor eax, constants
//! unroll_loop:      (unroll > 1) while remaining >= unroll*vlen
//! vector_loop:      while remaining >= vlen
//! tail:             (tail > 0) if remaining >= 1, masked group
//! end:              vzeroupper (VEX/EVEX), ret
//! ```

use std::mem::offset_of;

use iced_x86::code_asm::*;

use super::io::IoHelper;
use super::simd_ops::{StoreScratch, VecIsa};
use super::CodegenOutput;
use crate::compiler::kernel::CallParams;
use crate::compiler::register_plan::{RegisterPlan, TailPolicy, SLOT_RES, SLOT_SRC};
use crate::types::{DType, KernelDescriptor, PreluResult, WeightMode};

const REG_PARAM: AsmRegister64 = rdi;
const REG_SRC: AsmRegister64 = r8;
const REG_WEIGHTS: AsmRegister64 = r9;
const REG_DST: AsmRegister64 = r10;
const REG_SIZE: AsmRegister64 = r11;
const REG_OFFSET: AsmRegister64 = rax;

/// Emits one PReLU forward kernel for a fixed descriptor and register plan.
pub struct PreluEmitter<'a, I: VecIsa> {
    asm: CodeAssembler,
    isa: I,
    desc: &'a KernelDescriptor,
    plan: &'a RegisterPlan,
    tail: TailPolicy,
    io: IoHelper,
}

impl<'a, I: VecIsa> PreluEmitter<'a, I> {
    pub fn new(isa: I, desc: &'a KernelDescriptor, plan: &'a RegisterPlan) -> PreluResult<Self> {
        let tail = TailPolicy::new(desc.element_count(), plan.vector_width);
        let io = IoHelper::new(desc.dtype(), plan, &tail)?;
        Ok(PreluEmitter {
            asm: CodeAssembler::new(64)?,
            isa,
            desc,
            plan,
            tail,
            io,
        })
    }

    /// Emit the whole kernel and assemble it at base address 0.
    pub fn generate(mut self) -> PreluResult<CodegenOutput> {
        self.load_kernel_call_params()?;
        self.prepare_kernel_const_vars()?;
        self.emit_loops()?;

        let code = self.asm.assemble(0)?;
        log::debug!(
            "prelu jit: {} {} {} n={} unroll={} tail={} -> {} bytes",
            self.plan.isa,
            self.desc.dtype().name(),
            self.desc.weight_mode().name(),
            self.desc.element_count(),
            self.plan.unroll_factor,
            self.tail.tail_size,
            code.len()
        );
        Ok(CodegenOutput { code })
    }

    fn load_kernel_call_params(&mut self) -> PreluResult<()> {
        let a = &mut self.asm;
        a.mov(REG_SRC, qword_ptr(REG_PARAM + offset_of!(CallParams, src) as i32))?;
        a.mov(REG_WEIGHTS, qword_ptr(REG_PARAM + offset_of!(CallParams, weights) as i32))?;
        a.mov(REG_DST, qword_ptr(REG_PARAM + offset_of!(CallParams, dst) as i32))?;
        a.mov(REG_SIZE, qword_ptr(REG_PARAM + offset_of!(CallParams, compute_size) as i32))?;
        a.xor(eax, eax)?;
        Ok(())
    }

    fn prepare_kernel_const_vars(&mut self) -> PreluResult<()> {
        let consts = self.plan.consts;
        self.isa.zero(&mut self.asm, consts.zeros)?;
        self.io.prepare(&self.isa, &mut self.asm)?;
        if let Some(w) = consts.weights {
            debug_assert_eq!(self.desc.weight_mode(), WeightMode::Scalar);
            self.io.broadcast(&self.isa, &mut self.asm, w, REG_WEIGHTS + 0)?;
        }
        Ok(())
    }

    fn emit_loops(&mut self) -> PreluResult<()> {
        let vlen = self.plan.vector_width as i32;
        let unroll = self.plan.unroll_factor;

        let mut end = self.asm.create_label();
        let mut vector_loop = self.asm.create_label();
        let mut tail_label = self.tail.requires_mask.then(|| self.asm.create_label());
        let after_vectors = tail_label.unwrap_or(end);

        if unroll > 1 {
            let block = vlen * unroll as i32;
            let mut unroll_loop = self.asm.create_label();
            self.asm.set_label(&mut unroll_loop)?;
            self.asm.cmp(REG_SIZE, block)?;
            self.asm.jl(vector_loop)?;
            self.compute_dst(unroll, false)?;
            self.advance(block)?;
            self.asm.jmp(unroll_loop)?;
        }

        self.asm.set_label(&mut vector_loop)?;
        self.asm.cmp(REG_SIZE, vlen)?;
        self.asm.jl(after_vectors)?;
        self.compute_dst(1, false)?;
        self.advance(vlen)?;
        self.asm.jmp(vector_loop)?;

        if let Some(label) = tail_label.as_mut() {
            self.asm.set_label(label)?;
            self.asm.cmp(REG_SIZE, 1)?;
            self.asm.jl(end)?;
            self.compute_dst(1, true)?;
        }

        self.asm.set_label(&mut end)?;
        self.isa.epilogue(&mut self.asm)?;
        self.asm.ret()?;
        Ok(())
    }

    fn advance(&mut self, elements: i32) -> PreluResult<()> {
        self.asm.sub(REG_SIZE, elements)?;
        self.asm.add(REG_OFFSET, elements)?;
        Ok(())
    }

    /// `[base + rax * esz + elem * esz]`
    fn data_addr(&self, base: AsmRegister64, elem: usize) -> AsmMemoryOperand {
        let esz = self.desc.dtype().size_bytes();
        base + REG_OFFSET * esz as i32 + (elem * esz) as i32
    }

    fn compute_dst(&mut self, groups: usize, tail: bool) -> PreluResult<()> {
        let vlen = self.plan.vector_width;
        let zeros = self.plan.consts.zeros;

        for g in 0..groups {
            let src = self.plan.compute_vreg(g, SLOT_SRC);
            let res = self.plan.compute_vreg(g, SLOT_RES);
            let sel = self.plan.selector_vreg(g);
            let src_addr = self.data_addr(REG_SRC, g * vlen);
            let w_addr = self.data_addr(REG_WEIGHTS, g * vlen);
            let dst_addr = self.data_addr(REG_DST, g * vlen);

            self.io.load(&self.isa, &mut self.asm, src, src_addr, tail)?;

            match self.plan.consts.weights {
                Some(w) => self.isa.mul(&mut self.asm, res, src, w)?,
                None if self.desc.dtype() == DType::F32 && !tail => {
                    self.isa.mul_mem(&mut self.asm, res, src, w_addr)?
                }
                None => {
                    self.io.load(&self.isa, &mut self.asm, res, w_addr, tail)?;
                    self.isa.mul(&mut self.asm, res, res, src)?;
                }
            }

            self.isa
                .select_non_negative(&mut self.asm, res, src, zeros, sel)?;

            let scratch = StoreScratch { tmp: src, sel };
            self.io
                .store(&self.isa, &mut self.asm, res, dst_addr, tail, scratch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::simd_ops::{SseOps, YmmOps, ZmmOps};
    use crate::dispatch::IsaVariant;
    use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic, Register};

    fn emit(n: usize, dtype: DType, mode: WeightMode, isa: IsaVariant) -> Vec<Instruction> {
        let desc = KernelDescriptor::new(n, dtype, mode).with_isa(isa);
        let plan = RegisterPlan::new(&desc, isa).unwrap();
        let out = match isa {
            IsaVariant::Sse41 => PreluEmitter::new(SseOps, &desc, &plan).unwrap().generate(),
            IsaVariant::Avx | IsaVariant::Avx2 => {
                PreluEmitter::new(YmmOps::new(isa), &desc, &plan).unwrap().generate()
            }
            _ => PreluEmitter::new(ZmmOps::new(isa), &desc, &plan).unwrap().generate(),
        }
        .unwrap();
        Decoder::with_ip(64, &out.code, 0, DecoderOptions::NONE)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_prologue_reads_call_params() {
        let insns = emit(64, DType::F32, WeightMode::PerChannel, IsaVariant::Avx2);
        let loads: Vec<_> = insns
            .iter()
            .take(4)
            .map(|i| (i.op0_register(), i.memory_base(), i.memory_displacement64()))
            .collect();
        assert_eq!(
            loads,
            vec![
                (Register::R8, Register::RDI, 0),
                (Register::R9, Register::RDI, 8),
                (Register::R10, Register::RDI, 16),
                (Register::R11, Register::RDI, 24),
            ]
        );
        assert_eq!(insns.last().unwrap().mnemonic(), Mnemonic::Ret);
    }

    #[test]
    fn test_no_unroll_loop_for_single_vector() {
        let insns = emit(16, DType::F32, WeightMode::Scalar, IsaVariant::Avx512Core);
        let loads = insns
            .iter()
            .filter(|i| i.mnemonic() == Mnemonic::Vmovups && i.op0_register() != Register::None)
            .count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_scalar_weight_broadcast_once() {
        let insns = emit(4096, DType::F32, WeightMode::Scalar, IsaVariant::Avx2);
        let broadcasts = insns
            .iter()
            .filter(|i| i.mnemonic() == Mnemonic::Vbroadcastss)
            .count();
        assert_eq!(broadcasts, 1);
    }

    #[test]
    fn test_vzeroupper_only_after_vex() {
        for isa in IsaVariant::DESCENDING {
            let insns = emit(37, DType::F32, WeightMode::Scalar, isa);
            let cleared = insns.iter().any(|i| i.mnemonic() == Mnemonic::Vzeroupper);
            assert_eq!(cleared, isa.is_vex(), "{isa}");
        }
    }

    #[test]
    fn test_unroll_groups_use_planned_registers() {
        let insns = emit(1 << 12, DType::F32, WeightMode::PerChannel, IsaVariant::Avx512Core);
        let highest = insns
            .iter()
            .flat_map(|i| (0..i.op_count()).map(move |op| i.op_register(op)))
            .filter(|r| r.is_zmm())
            .map(|r| r.number())
            .max()
            .unwrap();
        let desc = KernelDescriptor::new(1 << 12, DType::F32, WeightMode::PerChannel);
        let plan = RegisterPlan::new(&desc, IsaVariant::Avx512Core).unwrap();
        assert_eq!(highest + 1, plan.registers_used());
    }
}
