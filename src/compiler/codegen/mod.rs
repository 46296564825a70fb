//! Code generation for the PReLU forward kernel.
//!
//! `generate` is the only place that matches on the ISA variant: it picks the
//! `VecIsa` implementation and runs the emitter monomorphized for it.

pub mod io;
pub mod simd_ops;
pub mod x86_64;

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};

use crate::compiler::register_plan::RegisterPlan;
use crate::dispatch::IsaVariant;
use crate::types::{KernelDescriptor, PreluResult};

use simd_ops::{SseOps, YmmOps, ZmmOps};
use x86_64::PreluEmitter;

/// Output of code generation: raw machine code bytes, position independent.
pub struct CodegenOutput {
    pub code: Vec<u8>,
}

/// Emit the kernel for `desc` following `plan`.
pub fn generate(desc: &KernelDescriptor, plan: &RegisterPlan) -> PreluResult<CodegenOutput> {
    match plan.isa {
        IsaVariant::Sse41 => PreluEmitter::new(SseOps, desc, plan)?.generate(),
        IsaVariant::Avx | IsaVariant::Avx2 => {
            PreluEmitter::new(YmmOps::new(plan.isa), desc, plan)?.generate()
        }
        IsaVariant::Avx512Core | IsaVariant::Avx512CoreBf16 => {
            PreluEmitter::new(ZmmOps::new(plan.isa), desc, plan)?.generate()
        }
    }
}

/// Decode generated code (base address 0).
pub fn decode(code: &[u8]) -> Vec<Instruction> {
    Decoder::with_ip(64, code, 0, DecoderOptions::NONE)
        .into_iter()
        .collect()
}

/// Intel-syntax listing, one `offset: instruction` per line.
pub fn disassemble(code: &[u8]) -> String {
    let mut formatter = IntelFormatter::new();
    let mut out = String::new();
    let mut line = String::new();
    for insn in decode(code) {
        line.clear();
        formatter.format(&insn, &mut line);
        out.push_str(&format!("{:04x}: {line}\n", insn.ip()));
    }
    out
}
