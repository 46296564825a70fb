//! VecIsa — per-ISA instruction encodings behind one virtual SIMD interface.
//!
//! The emitter (`x86_64.rs`) and the IO helper (`io.rs`) generate code by
//! calling methods on `VecIsa`. Each ISA generation provides a concrete
//! implementation that emits real instructions through iced-x86:
//!
//! - `SseOps`: SSE4.1 legacy encodings on xmm, lane-by-lane tails,
//!   `blendvps` with the implicit `xmm0` selector.
//! - `YmmOps`: AVX/AVX2 VEX encodings on ymm, `vmaskmovps` tails driven by a
//!   vector lane mask, `vblendvps` with an explicit selector.
//! - `ZmmOps`: AVX-512 EVEX encodings on zmm, `k1` tails, `k2` compares.
//!
//! `VReg(n)` maps to physical register n. The emitter is generic over
//! `VecIsa`, so every variant gets its own monomorphized emitter and the
//! only dispatch happens once in `codegen::generate`.

use iced_x86::code_asm::*;

use crate::compiler::register_plan::{Bf16Consts, VReg};
use crate::dispatch::IsaVariant;
use crate::types::{PreluError, PreluResult};

/// Temporary GPR for immediates; volatile in the SysV ABI.
pub const REG_TMP: AsmRegister32 = edx;

/// `vcmpps` predicate: greater-or-equal, ordered, quiet.
const CMP_GE_OQ: i32 = 0x1D;
/// `vcmpps` predicate: unordered (either operand NaN).
const CMP_UNORD_Q: i32 = 0x03;
/// Legacy `cmpps` predicate: less-or-equal (ordered).
const CMP_LE_OS: i32 = 0x02;

const XMM: [AsmRegisterXmm; 32] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13,
    xmm14, xmm15, xmm16, xmm17, xmm18, xmm19, xmm20, xmm21, xmm22, xmm23, xmm24, xmm25, xmm26,
    xmm27, xmm28, xmm29, xmm30, xmm31,
];

const YMM: [AsmRegisterYmm; 32] = [
    ymm0, ymm1, ymm2, ymm3, ymm4, ymm5, ymm6, ymm7, ymm8, ymm9, ymm10, ymm11, ymm12, ymm13,
    ymm14, ymm15, ymm16, ymm17, ymm18, ymm19, ymm20, ymm21, ymm22, ymm23, ymm24, ymm25, ymm26,
    ymm27, ymm28, ymm29, ymm30, ymm31,
];

const ZMM: [AsmRegisterZmm; 32] = [
    zmm0, zmm1, zmm2, zmm3, zmm4, zmm5, zmm6, zmm7, zmm8, zmm9, zmm10, zmm11, zmm12, zmm13,
    zmm14, zmm15, zmm16, zmm17, zmm18, zmm19, zmm20, zmm21, zmm22, zmm23, zmm24, zmm25, zmm26,
    zmm27, zmm28, zmm29, zmm30, zmm31,
];

#[inline]
fn xmm(r: VReg) -> AsmRegisterXmm {
    XMM[r.0 as usize]
}

#[inline]
fn ymm(r: VReg) -> AsmRegisterYmm {
    YMM[r.0 as usize]
}

#[inline]
fn zmm(r: VReg) -> AsmRegisterZmm {
    ZMM[r.0 as usize]
}

/// Active lanes of the tail vector and, for AVX/AVX2 f32, the register
/// holding the lane mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailLanes {
    pub lanes: usize,
    pub mask: Option<VReg>,
}

impl TailLanes {
    fn mask_reg(&self, isa: IsaVariant) -> PreluResult<VReg> {
        self.mask.ok_or_else(|| {
            PreluError::Codegen(format!("{isa}: tail access without a lane mask register"))
        })
    }
}

/// Registers a store may clobber while narrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreScratch {
    pub tmp: VReg,
    pub sel: Option<VReg>,
}

fn no_bf16(isa: IsaVariant) -> PreluError {
    PreluError::Unsupported(format!("{isa} cannot widen or narrow bf16"))
}

/// Platform-agnostic vector instruction interface for the PReLU template.
///
/// f32 methods operate on full vectors; `*_tail` variants touch only
/// `TailLanes::lanes` elements of memory. bf16 methods widen to f32 lanes on
/// load and narrow on store; the defaults reject bf16.
pub trait VecIsa {
    fn isa(&self) -> IsaVariant;

    /// dst = 0
    fn zero(&self, asm: &mut CodeAssembler, dst: VReg) -> PreluResult<()>;
    /// dst = load full vector
    fn load(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()>;
    /// dst = load `tail.lanes` elements, remaining lanes zeroed
    fn load_tail(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
        tail: &TailLanes,
    ) -> PreluResult<()>;
    /// store full vector
    fn store(&self, asm: &mut CodeAssembler, mem: AsmMemoryOperand, src: VReg) -> PreluResult<()>;
    /// store `tail.lanes` elements, other memory untouched
    fn store_tail(
        &self,
        asm: &mut CodeAssembler,
        mem: AsmMemoryOperand,
        src: VReg,
        tail: &TailLanes,
    ) -> PreluResult<()>;
    /// dst = broadcast one f32 from memory
    fn broadcast(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()>;
    /// dst = a * b
    fn mul(&self, asm: &mut CodeAssembler, dst: VReg, a: VReg, b: VReg) -> PreluResult<()>;
    /// dst = a * [mem]; `dst != a`
    fn mul_mem(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        a: VReg,
        mem: AsmMemoryOperand,
    ) -> PreluResult<()>;
    /// res = src >= 0 ? src : res, lane-wise, compared against `zeros`
    fn select_non_negative(
        &self,
        asm: &mut CodeAssembler,
        res: VReg,
        src: VReg,
        zeros: VReg,
        sel: Option<VReg>,
    ) -> PreluResult<()>;
    /// Materialize the tail lane mask (vector register or `k1`).
    fn init_tail(&self, asm: &mut CodeAssembler, tail: &TailLanes) -> PreluResult<()>;
    /// Clear upper vector state before returning.
    fn epilogue(&self, asm: &mut CodeAssembler) -> PreluResult<()>;

    fn load_bf16(&self, _asm: &mut CodeAssembler, _dst: VReg, _mem: AsmMemoryOperand) -> PreluResult<()> {
        Err(no_bf16(self.isa()))
    }

    fn load_bf16_tail(
        &self,
        _asm: &mut CodeAssembler,
        _dst: VReg,
        _mem: AsmMemoryOperand,
        _tail: &TailLanes,
    ) -> PreluResult<()> {
        Err(no_bf16(self.isa()))
    }

    fn broadcast_bf16(
        &self,
        _asm: &mut CodeAssembler,
        _dst: VReg,
        _mem: AsmMemoryOperand,
    ) -> PreluResult<()> {
        Err(no_bf16(self.isa()))
    }

    fn init_bf16_consts(&self, _asm: &mut CodeAssembler, _consts: &Bf16Consts) -> PreluResult<()> {
        Err(no_bf16(self.isa()))
    }

    /// Narrow f32 lanes of `src` to bf16 and store them. `src` and the
    /// scratch registers are clobbered. Runs right after
    /// `select_non_negative`; on AVX-512 the `k2` compare mask must still
    /// be live.
    fn store_bf16(
        &self,
        _asm: &mut CodeAssembler,
        _mem: AsmMemoryOperand,
        _src: VReg,
        _scratch: StoreScratch,
        _consts: Option<&Bf16Consts>,
        _tail: Option<&TailLanes>,
    ) -> PreluResult<()> {
        Err(no_bf16(self.isa()))
    }
}

const BF16_ONE: i32 = 0x1;
const BF16_ROUND_BIAS: i32 = 0x7FFF;
const BF16_QNAN_BIT: i32 = 0x40;

fn bf16_consts_or_err(isa: IsaVariant, consts: Option<&Bf16Consts>) -> PreluResult<&Bf16Consts> {
    consts.ok_or_else(|| PreluError::Codegen(format!("{isa}: emulated bf16 store without constants")))
}

// ── SSE4.1 ──────────────────────────────────────────────────────────────────

/// SSE4.1 on xmm0..xmm15.
#[derive(Debug, Clone, Copy, Default)]
pub struct SseOps;

impl VecIsa for SseOps {
    fn isa(&self) -> IsaVariant {
        IsaVariant::Sse41
    }

    fn zero(&self, asm: &mut CodeAssembler, dst: VReg) -> PreluResult<()> {
        asm.xorps(xmm(dst), xmm(dst))?;
        Ok(())
    }

    fn load(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        asm.movups(xmm(dst), xmmword_ptr(mem))?;
        Ok(())
    }

    fn load_tail(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
        tail: &TailLanes,
    ) -> PreluResult<()> {
        asm.xorps(xmm(dst), xmm(dst))?;
        for lane in 0..tail.lanes {
            asm.pinsrd(xmm(dst), dword_ptr(mem + (lane * 4) as i32), lane as i32)?;
        }
        Ok(())
    }

    fn store(&self, asm: &mut CodeAssembler, mem: AsmMemoryOperand, src: VReg) -> PreluResult<()> {
        asm.movups(xmmword_ptr(mem), xmm(src))?;
        Ok(())
    }

    fn store_tail(
        &self,
        asm: &mut CodeAssembler,
        mem: AsmMemoryOperand,
        src: VReg,
        tail: &TailLanes,
    ) -> PreluResult<()> {
        for lane in 0..tail.lanes {
            asm.pextrd(dword_ptr(mem + (lane * 4) as i32), xmm(src), lane as i32)?;
        }
        Ok(())
    }

    fn broadcast(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        asm.movss(xmm(dst), dword_ptr(mem))?;
        asm.shufps(xmm(dst), xmm(dst), 0)?;
        Ok(())
    }

    fn mul(&self, asm: &mut CodeAssembler, dst: VReg, a: VReg, b: VReg) -> PreluResult<()> {
        if dst == a {
            asm.mulps(xmm(dst), xmm(b))?;
        } else if dst == b {
            asm.mulps(xmm(dst), xmm(a))?;
        } else {
            asm.movaps(xmm(dst), xmm(a))?;
            asm.mulps(xmm(dst), xmm(b))?;
        }
        Ok(())
    }

    fn mul_mem(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        a: VReg,
        mem: AsmMemoryOperand,
    ) -> PreluResult<()> {
        debug_assert_ne!(dst, a);
        // Legacy `mulps m128` requires 16-byte alignment; go through a register.
        asm.movups(xmm(dst), xmmword_ptr(mem))?;
        asm.mulps(xmm(dst), xmm(a))?;
        Ok(())
    }

    fn select_non_negative(
        &self,
        asm: &mut CodeAssembler,
        res: VReg,
        src: VReg,
        zeros: VReg,
        sel: Option<VReg>,
    ) -> PreluResult<()> {
        if sel != Some(VReg(0)) {
            return Err(PreluError::Codegen(
                "sse41: blendvps selector must be xmm0".into(),
            ));
        }
        // xmm0 = (0 <= src); NaN lanes compare false and keep the product.
        asm.movaps(xmm0, xmm(zeros))?;
        asm.cmpps(xmm0, xmm(src), CMP_LE_OS)?;
        asm.blendvps(xmm(res), xmm(src))?;
        Ok(())
    }

    fn init_tail(&self, _asm: &mut CodeAssembler, _tail: &TailLanes) -> PreluResult<()> {
        Ok(())
    }

    fn epilogue(&self, _asm: &mut CodeAssembler) -> PreluResult<()> {
        Ok(())
    }
}

// ── AVX / AVX2 ──────────────────────────────────────────────────────────────

/// AVX and AVX2 on ymm0..ymm15. bf16 needs the AVX2 integer ops.
#[derive(Debug, Clone, Copy)]
pub struct YmmOps {
    isa: IsaVariant,
}

impl YmmOps {
    pub fn new(isa: IsaVariant) -> Self {
        debug_assert!(matches!(isa, IsaVariant::Avx | IsaVariant::Avx2));
        YmmOps { isa }
    }

    fn require_avx2(&self) -> PreluResult<()> {
        if self.isa == IsaVariant::Avx2 {
            Ok(())
        } else {
            Err(no_bf16(self.isa))
        }
    }
}

impl VecIsa for YmmOps {
    fn isa(&self) -> IsaVariant {
        self.isa
    }

    fn zero(&self, asm: &mut CodeAssembler, dst: VReg) -> PreluResult<()> {
        asm.vxorps(ymm(dst), ymm(dst), ymm(dst))?;
        Ok(())
    }

    fn load(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        asm.vmovups(ymm(dst), ymmword_ptr(mem))?;
        Ok(())
    }

    fn load_tail(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
        tail: &TailLanes,
    ) -> PreluResult<()> {
        let mask = tail.mask_reg(self.isa)?;
        asm.vmaskmovps(ymm(dst), ymm(mask), ymmword_ptr(mem))?;
        Ok(())
    }

    fn store(&self, asm: &mut CodeAssembler, mem: AsmMemoryOperand, src: VReg) -> PreluResult<()> {
        asm.vmovups(ymmword_ptr(mem), ymm(src))?;
        Ok(())
    }

    fn store_tail(
        &self,
        asm: &mut CodeAssembler,
        mem: AsmMemoryOperand,
        src: VReg,
        tail: &TailLanes,
    ) -> PreluResult<()> {
        let mask = tail.mask_reg(self.isa)?;
        asm.vmaskmovps(ymmword_ptr(mem), ymm(mask), ymm(src))?;
        Ok(())
    }

    fn broadcast(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        asm.vbroadcastss(ymm(dst), dword_ptr(mem))?;
        Ok(())
    }

    fn mul(&self, asm: &mut CodeAssembler, dst: VReg, a: VReg, b: VReg) -> PreluResult<()> {
        asm.vmulps(ymm(dst), ymm(a), ymm(b))?;
        Ok(())
    }

    fn mul_mem(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        a: VReg,
        mem: AsmMemoryOperand,
    ) -> PreluResult<()> {
        asm.vmulps(ymm(dst), ymm(a), ymmword_ptr(mem))?;
        Ok(())
    }

    fn select_non_negative(
        &self,
        asm: &mut CodeAssembler,
        res: VReg,
        src: VReg,
        zeros: VReg,
        sel: Option<VReg>,
    ) -> PreluResult<()> {
        let sel = sel.ok_or_else(|| {
            PreluError::Codegen(format!("{}: blend needs a selector register", self.isa))
        })?;
        asm.vcmpps(ymm(sel), ymm(src), ymm(zeros), CMP_GE_OQ)?;
        asm.vblendvps(ymm(res), ymm(res), ymm(src), ymm(sel))?;
        Ok(())
    }

    /// Build the lane mask on the stack: -1 for active lanes, 0 otherwise.
    /// bf16 tails go lane by lane and carry no mask.
    fn init_tail(&self, asm: &mut CodeAssembler, tail: &TailLanes) -> PreluResult<()> {
        let Some(mask) = tail.mask else {
            return Ok(());
        };
        let width = self.isa.vector_width();
        asm.sub(rsp, (width * 4) as i32)?;
        for lane in 0..width {
            let value: i32 = if lane < tail.lanes { -1 } else { 0 };
            asm.mov(dword_ptr(rsp + (lane * 4) as i32), value)?;
        }
        asm.vmovups(ymm(mask), ymmword_ptr(rsp))?;
        asm.add(rsp, (width * 4) as i32)?;
        Ok(())
    }

    fn epilogue(&self, asm: &mut CodeAssembler) -> PreluResult<()> {
        asm.vzeroupper()?;
        Ok(())
    }

    fn load_bf16(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        self.require_avx2()?;
        asm.vpmovzxwd(ymm(dst), xmmword_ptr(mem))?;
        asm.vpslld(ymm(dst), ymm(dst), 16)?;
        Ok(())
    }

    fn load_bf16_tail(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
        tail: &TailLanes,
    ) -> PreluResult<()> {
        self.require_avx2()?;
        let x = xmm(dst);
        asm.vpxor(x, x, x)?;
        for lane in 0..tail.lanes {
            asm.vpinsrw(x, x, word_ptr(mem + (lane * 2) as i32), lane as i32)?;
        }
        asm.vpmovzxwd(ymm(dst), x)?;
        asm.vpslld(ymm(dst), ymm(dst), 16)?;
        Ok(())
    }

    fn broadcast_bf16(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
    ) -> PreluResult<()> {
        self.require_avx2()?;
        // Each dword holds (w << 16 | w); the shift leaves w << 16.
        asm.vpbroadcastw(ymm(dst), word_ptr(mem))?;
        asm.vpslld(ymm(dst), ymm(dst), 16)?;
        Ok(())
    }

    fn init_bf16_consts(&self, asm: &mut CodeAssembler, consts: &Bf16Consts) -> PreluResult<()> {
        self.require_avx2()?;
        for (reg, value) in [
            (consts.one, BF16_ONE),
            (consts.bias, BF16_ROUND_BIAS),
            (consts.qnan, BF16_QNAN_BIT),
        ] {
            asm.mov(REG_TMP, value)?;
            asm.vmovd(xmm(reg), REG_TMP)?;
            asm.vpbroadcastd(ymm(reg), xmm(reg))?;
        }
        Ok(())
    }

    fn store_bf16(
        &self,
        asm: &mut CodeAssembler,
        mem: AsmMemoryOperand,
        src: VReg,
        scratch: StoreScratch,
        consts: Option<&Bf16Consts>,
        tail: Option<&TailLanes>,
    ) -> PreluResult<()> {
        self.require_avx2()?;
        let c = bf16_consts_or_err(self.isa, consts)?;
        let sel = scratch.sel.ok_or_else(|| {
            PreluError::Codegen(format!("{}: bf16 store needs a selector register", self.isa))
        })?;
        let (s, t, m) = (ymm(src), ymm(scratch.tmp), ymm(sel));

        // t = (x + 0x7FFF + ((x >> 16) & 1)) >> 16
        asm.vpsrld(t, s, 16)?;
        asm.vpand(t, t, ymm(c.one))?;
        asm.vpaddd(t, t, ymm(c.bias))?;
        asm.vpaddd(t, t, s)?;
        asm.vpsrld(t, t, 16)?;
        // NaN lanes: (x >> 16) | 0x40
        asm.vcmpps(m, s, s, CMP_UNORD_Q)?;
        asm.vpsrld(s, s, 16)?;
        asm.vpor(s, s, ymm(c.qnan))?;
        asm.vblendvps(t, t, s, m)?;
        // Pack 8 dwords to 8 words in the low xmm.
        asm.vpackusdw(t, t, t)?;
        asm.vpermq(t, t, 0x08)?;

        let tx = xmm(scratch.tmp);
        match tail {
            Some(tail) => {
                for lane in 0..tail.lanes {
                    asm.vpextrw(word_ptr(mem + (lane * 2) as i32), tx, lane as i32)?;
                }
            }
            None => asm.vmovdqu(xmmword_ptr(mem), tx)?,
        }
        Ok(())
    }
}

// ── AVX-512 ─────────────────────────────────────────────────────────────────

/// Opmask holding the tail lanes for the whole kernel.
const TAIL_OPMASK: AsmRegisterK = k1;
/// Opmask for per-group compare results.
const CMP_OPMASK: AsmRegisterK = k2;
/// Native bf16 narrowing: subnormal lanes, then negative subnormal lanes.
const SUBNORMAL_OPMASK: AsmRegisterK = k3;
const SIGN_OPMASK: AsmRegisterK = k4;

/// `vfpclassps` category: denormal.
const FPCLASS_DENORMAL: i32 = 0x20;
/// 2^-110; its ulp is the bf16 subnormal spacing 2^-133.
const BF16_SUBNORMAL_ROUNDER: i32 = 0x0880_0000;
const F32_SIGN: i32 = i32::MIN;

/// AVX-512 (F/BW/DQ/VL) on zmm0..zmm31.
#[derive(Debug, Clone, Copy)]
pub struct ZmmOps {
    isa: IsaVariant,
}

impl ZmmOps {
    pub fn new(isa: IsaVariant) -> Self {
        debug_assert!(isa.has_opmask());
        ZmmOps { isa }
    }
}

impl VecIsa for ZmmOps {
    fn isa(&self) -> IsaVariant {
        self.isa
    }

    fn zero(&self, asm: &mut CodeAssembler, dst: VReg) -> PreluResult<()> {
        asm.vpxord(zmm(dst), zmm(dst), zmm(dst))?;
        Ok(())
    }

    fn load(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        asm.vmovups(zmm(dst), zmmword_ptr(mem))?;
        Ok(())
    }

    fn load_tail(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
        _tail: &TailLanes,
    ) -> PreluResult<()> {
        asm.vmovups(zmm(dst).k1().z(), zmmword_ptr(mem))?;
        Ok(())
    }

    fn store(&self, asm: &mut CodeAssembler, mem: AsmMemoryOperand, src: VReg) -> PreluResult<()> {
        asm.vmovups(zmmword_ptr(mem), zmm(src))?;
        Ok(())
    }

    fn store_tail(
        &self,
        asm: &mut CodeAssembler,
        mem: AsmMemoryOperand,
        src: VReg,
        _tail: &TailLanes,
    ) -> PreluResult<()> {
        asm.vmovups(zmmword_ptr(mem).k1(), zmm(src))?;
        Ok(())
    }

    fn broadcast(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        asm.vbroadcastss(zmm(dst), dword_ptr(mem))?;
        Ok(())
    }

    fn mul(&self, asm: &mut CodeAssembler, dst: VReg, a: VReg, b: VReg) -> PreluResult<()> {
        asm.vmulps(zmm(dst), zmm(a), zmm(b))?;
        Ok(())
    }

    fn mul_mem(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        a: VReg,
        mem: AsmMemoryOperand,
    ) -> PreluResult<()> {
        asm.vmulps(zmm(dst), zmm(a), zmmword_ptr(mem))?;
        Ok(())
    }

    fn select_non_negative(
        &self,
        asm: &mut CodeAssembler,
        res: VReg,
        src: VReg,
        zeros: VReg,
        _sel: Option<VReg>,
    ) -> PreluResult<()> {
        asm.vcmpps(CMP_OPMASK, zmm(src), zmm(zeros), CMP_GE_OQ)?;
        asm.vblendmps(zmm(res).k2(), zmm(res), zmm(src))?;
        Ok(())
    }

    fn init_tail(&self, asm: &mut CodeAssembler, tail: &TailLanes) -> PreluResult<()> {
        let bits = (1u32 << tail.lanes) - 1;
        asm.mov(REG_TMP, bits as i32)?;
        asm.kmovw(TAIL_OPMASK, REG_TMP)?;
        Ok(())
    }

    fn epilogue(&self, asm: &mut CodeAssembler) -> PreluResult<()> {
        asm.vzeroupper()?;
        Ok(())
    }

    fn load_bf16(&self, asm: &mut CodeAssembler, dst: VReg, mem: AsmMemoryOperand) -> PreluResult<()> {
        asm.vpmovzxwd(zmm(dst), ymmword_ptr(mem))?;
        asm.vpslld(zmm(dst), zmm(dst), 16)?;
        Ok(())
    }

    fn load_bf16_tail(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
        _tail: &TailLanes,
    ) -> PreluResult<()> {
        asm.vpmovzxwd(zmm(dst).k1().z(), ymmword_ptr(mem))?;
        asm.vpslld(zmm(dst), zmm(dst), 16)?;
        Ok(())
    }

    fn broadcast_bf16(
        &self,
        asm: &mut CodeAssembler,
        dst: VReg,
        mem: AsmMemoryOperand,
    ) -> PreluResult<()> {
        asm.vpbroadcastw(zmm(dst), word_ptr(mem))?;
        asm.vpslld(zmm(dst), zmm(dst), 16)?;
        Ok(())
    }

    fn init_bf16_consts(&self, asm: &mut CodeAssembler, consts: &Bf16Consts) -> PreluResult<()> {
        for (reg, value) in [
            (consts.one, BF16_ONE),
            (consts.bias, BF16_ROUND_BIAS),
            (consts.qnan, BF16_QNAN_BIT),
        ] {
            asm.mov(REG_TMP, value)?;
            asm.vpbroadcastd(zmm(reg), REG_TMP)?;
        }
        Ok(())
    }

    fn store_bf16(
        &self,
        asm: &mut CodeAssembler,
        mem: AsmMemoryOperand,
        src: VReg,
        scratch: StoreScratch,
        consts: Option<&Bf16Consts>,
        tail: Option<&TailLanes>,
    ) -> PreluResult<()> {
        if self.isa.native_bf16() {
            let (s, t) = (zmm(src), zmm(scratch.tmp));
            // vcvtneps2bf16 flushes subnormals. Round those lanes (k3) to a
            // multiple of 2^-133 with `(x + c) - c`, c = copysign(2^-110, x),
            // so their bf16 is the high word.
            asm.vfpclassps(SUBNORMAL_OPMASK, s, FPCLASS_DENORMAL)?;
            asm.vpmovd2m(SIGN_OPMASK, s)?;
            asm.kandw(SIGN_OPMASK, SIGN_OPMASK, SUBNORMAL_OPMASK)?;
            asm.mov(REG_TMP, BF16_SUBNORMAL_ROUNDER)?;
            asm.vpbroadcastd(t, REG_TMP)?;
            asm.mov(REG_TMP, BF16_SUBNORMAL_ROUNDER | F32_SIGN)?;
            asm.vpbroadcastd(t.k4(), REG_TMP)?;
            asm.vaddps(s.k3(), s, t)?;
            asm.vsubps(s.k3(), s, t)?;
            // Negative lanes that rounded to zero keep their sign.
            asm.mov(REG_TMP, F32_SIGN)?;
            asm.vpbroadcastd(t, REG_TMP)?;
            asm.vpord(s.k4(), s, t)?;

            let words = ymm(scratch.tmp);
            asm.vcvtneps2bf16(words, s)?;
            // k2 (src >= 0) lanes hold a widened bf16 exactly.
            asm.korw(SUBNORMAL_OPMASK, SUBNORMAL_OPMASK, CMP_OPMASK)?;
            asm.vpsrld(s, s, 16)?;
            asm.vpmovdw(words.k3(), s)?;
            match tail {
                Some(_) => asm.vmovdqu16(ymmword_ptr(mem).k1(), words)?,
                None => asm.vmovdqu16(ymmword_ptr(mem), words)?,
            }
            return Ok(());
        }

        let c = bf16_consts_or_err(self.isa, consts)?;
        let (s, t) = (zmm(src), zmm(scratch.tmp));
        // t = (x + 0x7FFF + ((x >> 16) & 1)) >> 16
        asm.vpsrld(t, s, 16)?;
        asm.vpandd(t, t, zmm(c.one))?;
        asm.vpaddd(t, t, zmm(c.bias))?;
        asm.vpaddd(t, t, s)?;
        asm.vpsrld(t, t, 16)?;
        // NaN lanes: (x >> 16) | 0x40
        asm.vcmpps(CMP_OPMASK, s, s, CMP_UNORD_Q)?;
        asm.vpsrld(t.k2(), s, 16)?;
        asm.vpord(t.k2(), t, zmm(c.qnan))?;
        match tail {
            Some(_) => asm.vpmovdw(ymmword_ptr(mem).k1(), t)?,
            None => asm.vpmovdw(ymmword_ptr(mem), t)?,
        }
        Ok(())
    }
}
