//! IoHelper — dtype-aware loads, stores and broadcasts.
//!
//! The emitter always computes on f32 lanes. `IoHelper` hides the storage
//! dtype: f32 goes straight through `VecIsa`, bf16 is widened on load and
//! narrowed (round-to-nearest-even) on store. It also owns the tail lane
//! description and the constants the narrowing path needs.

use iced_x86::code_asm::{AsmMemoryOperand, CodeAssembler};

use super::simd_ops::{StoreScratch, TailLanes, VecIsa};
use crate::compiler::register_plan::{Bf16Consts, RegisterPlan, TailPolicy, VReg};
use crate::types::{DType, PreluError, PreluResult};

#[derive(Debug, Clone, Copy)]
pub struct IoHelper {
    dtype: DType,
    tail: Option<TailLanes>,
    bf16: Option<Bf16Consts>,
}

impl IoHelper {
    pub fn new(dtype: DType, plan: &RegisterPlan, tail: &TailPolicy) -> PreluResult<Self> {
        if dtype == DType::F16 {
            return Err(PreluError::Unsupported(format!(
                "{}: no f16 load/store path",
                plan.isa
            )));
        }
        let tail = tail.requires_mask.then_some(TailLanes {
            lanes: tail.tail_size,
            mask: plan.consts.tail_mask,
        });
        Ok(IoHelper {
            dtype,
            tail,
            bf16: plan.consts.bf16,
        })
    }

    /// Emit the one-time setup: tail mask and bf16 rounding constants.
    pub fn prepare<I: VecIsa>(&self, isa: &I, asm: &mut CodeAssembler) -> PreluResult<()> {
        if let Some(tail) = &self.tail {
            isa.init_tail(asm, tail)?;
        }
        if let Some(consts) = &self.bf16 {
            isa.init_bf16_consts(asm, consts)?;
        }
        Ok(())
    }

    fn tail_lanes(&self) -> PreluResult<&TailLanes> {
        self.tail
            .as_ref()
            .ok_or_else(|| PreluError::Codegen("tail access in a kernel without a tail".into()))
    }

    /// Load one vector (or the tail) into `dst` as f32 lanes.
    pub fn load<I: VecIsa>(
        &self,
        isa: &I,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
        tail: bool,
    ) -> PreluResult<()> {
        match (self.dtype, tail) {
            (DType::F32, false) => isa.load(asm, dst, mem),
            (DType::F32, true) => isa.load_tail(asm, dst, mem, self.tail_lanes()?),
            (DType::BF16, false) => isa.load_bf16(asm, dst, mem),
            (DType::BF16, true) => isa.load_bf16_tail(asm, dst, mem, self.tail_lanes()?),
            (DType::F16, _) => Err(PreluError::Unsupported("f16 load".into())),
        }
    }

    /// Broadcast one element into every f32 lane of `dst`.
    pub fn broadcast<I: VecIsa>(
        &self,
        isa: &I,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
    ) -> PreluResult<()> {
        match self.dtype {
            DType::F32 => isa.broadcast(asm, dst, mem),
            DType::BF16 => isa.broadcast_bf16(asm, dst, mem),
            DType::F16 => Err(PreluError::Unsupported("f16 broadcast".into())),
        }
    }

    /// Store the f32 lanes of `src` in the storage dtype. Narrowing may
    /// clobber `src` and `scratch`.
    pub fn store<I: VecIsa>(
        &self,
        isa: &I,
        asm: &mut CodeAssembler,
        src: VReg,
        mem: AsmMemoryOperand,
        tail: bool,
        scratch: StoreScratch,
    ) -> PreluResult<()> {
        match (self.dtype, tail) {
            (DType::F32, false) => isa.store(asm, mem, src),
            (DType::F32, true) => isa.store_tail(asm, mem, src, self.tail_lanes()?),
            (DType::BF16, false) => {
                isa.store_bf16(asm, mem, src, scratch, self.bf16.as_ref(), None)
            }
            (DType::BF16, true) => {
                let lanes = self.tail_lanes()?;
                isa.store_bf16(asm, mem, src, scratch, self.bf16.as_ref(), Some(lanes))
            }
            (DType::F16, _) => Err(PreluError::Unsupported("f16 store".into())),
        }
    }
}
