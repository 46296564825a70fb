//! Register plan — vector register budget for one PReLU kernel.
//!
//! Decides which vector registers hold invariant constants for the whole
//! kernel and how many unrolled compute groups fit into the rest. This is a
//! pure calculation over `KernelDescriptor` + `IsaVariant`; the emitter only
//! reads the result.
//!
//! Register numbering (virtual index == physical register number):
//!
//! ```text
//!   0 .. reserved                  constants (see `ConstRegs`)
//!   reserved + g * per_group + s   slot `s` of unroll group `g`
//! ```

use crate::dispatch::IsaVariant;
use crate::types::{DType, KernelDescriptor, PreluError, PreluResult, WeightMode};

/// Vector register index. Backends map it 1:1 to xmm/ymm/zmm numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(pub u8);

/// Per-group register slots.
pub const SLOT_SRC: usize = 0;
pub const SLOT_RES: usize = 1;
/// Compare result for `vblendvps`; only on variants without opmasks.
pub const SLOT_SEL: usize = 2;

/// Partial-vector handling derived from the element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailPolicy {
    /// `element_count mod vector_width`.
    pub tail_size: usize,
    pub requires_mask: bool,
}

impl TailPolicy {
    pub const fn new(element_count: usize, vector_width: usize) -> Self {
        let tail_size = element_count % vector_width;
        TailPolicy {
            tail_size,
            requires_mask: tail_size > 0,
        }
    }

    /// Elements covered by whole vectors.
    #[inline]
    pub const fn full_elements(element_count: usize, vector_width: usize) -> usize {
        element_count - element_count % vector_width
    }
}

/// Rounding constants for emulated f32 -> bf16 narrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bf16Consts {
    /// Broadcast `1`, isolates the LSB of the kept mantissa.
    pub one: VReg,
    /// Broadcast `0x7FFF`, round-to-nearest bias.
    pub bias: VReg,
    /// Broadcast `0x40`, quiet bit for NaN lanes.
    pub qnan: VReg,
}

/// Constant register assignment. Allocated in field order starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstRegs {
    /// SSE4.1 `blendvps` selector; always `VReg(0)`.
    pub blend_selector: Option<VReg>,
    pub zeros: VReg,
    /// Vector lane mask for AVX/AVX2 tails.
    pub tail_mask: Option<VReg>,
    /// Broadcast weight in scalar mode.
    pub weights: Option<VReg>,
    pub bf16: Option<Bf16Consts>,
}

impl ConstRegs {
    fn allocate(isa: IsaVariant, desc: &KernelDescriptor, tail: &TailPolicy) -> (Self, usize) {
        let mut next = 0u8;
        let mut reserve = || {
            let r = VReg(next);
            next += 1;
            r
        };

        let blend_selector = isa.needs_implicit_blend_selector().then(&mut reserve);
        let zeros = reserve();
        // bf16 tails go lane by lane on AVX2; only f32 uses vmaskmovps.
        let tail_mask = (tail.requires_mask
            && desc.dtype() == DType::F32
            && isa.has_masked_moves()
            && !isa.has_opmask())
        .then(&mut reserve);
        let weights = (desc.weight_mode() == WeightMode::Scalar).then(&mut reserve);
        let bf16 = (desc.dtype() == DType::BF16 && !isa.native_bf16()).then(|| Bf16Consts {
            one: reserve(),
            bias: reserve(),
            qnan: reserve(),
        });

        let consts = ConstRegs {
            blend_selector,
            zeros,
            tail_mask,
            weights,
            bf16,
        };
        (consts, next as usize)
    }
}

/// Vector register budget for one kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPlan {
    pub isa: IsaVariant,
    /// f32 lanes per register.
    pub vector_width: usize,
    pub total_registers: usize,
    pub reserved_constant_registers: usize,
    pub registers_per_group: usize,
    pub available_compute_registers: usize,
    /// Groups the register file could hold.
    pub max_unroll_factor: usize,
    /// Groups actually emitted per main-loop iteration.
    pub unroll_factor: usize,
    pub consts: ConstRegs,
}

impl RegisterPlan {
    /// Plan registers for `desc` on `isa`.
    ///
    /// Fails with `Unsupported` when the variant has no path for the dtype
    /// or the constants leave no room for a single compute group.
    pub fn new(desc: &KernelDescriptor, isa: IsaVariant) -> PreluResult<Self> {
        if !isa.supports_dtype(desc.dtype()) {
            return Err(PreluError::Unsupported(format!(
                "{isa} has no {} code path",
                desc.dtype().name()
            )));
        }

        let vector_width = isa.vector_width();
        let tail = TailPolicy::new(desc.element_count(), vector_width);
        let (consts, reserved) = ConstRegs::allocate(isa, desc, &tail);
        let total = isa.num_vregs();
        let per_group = registers_per_group(isa);

        let max_unroll = max_unroll_factor(total, reserved, per_group).ok_or_else(|| {
            PreluError::Unsupported(format!(
                "{isa}: {reserved} constant registers leave no room for a {per_group}-register compute group"
            ))
        })?;
        let unroll = clamp_unroll(max_unroll, desc.element_count(), vector_width);

        Ok(RegisterPlan {
            isa,
            vector_width,
            total_registers: total,
            reserved_constant_registers: reserved,
            registers_per_group: per_group,
            available_compute_registers: total - reserved,
            max_unroll_factor: max_unroll,
            unroll_factor: unroll,
            consts,
        })
    }

    /// Register holding slot `slot` of unroll group `group`.
    #[inline]
    pub fn compute_vreg(&self, group: usize, slot: usize) -> VReg {
        debug_assert!(group < self.unroll_factor.max(1));
        debug_assert!(slot < self.registers_per_group);
        VReg((self.reserved_constant_registers + group * self.registers_per_group + slot) as u8)
    }

    /// Register that receives the compare result for `group`, if the
    /// variant blends through a vector register.
    pub fn selector_vreg(&self, group: usize) -> Option<VReg> {
        if self.isa.has_opmask() {
            None
        } else if let Some(sel) = self.consts.blend_selector {
            Some(sel)
        } else {
            Some(self.compute_vreg(group, SLOT_SEL))
        }
    }

    /// Highest register index the plan touches, plus one.
    pub fn registers_used(&self) -> usize {
        self.reserved_constant_registers + self.unroll_factor * self.registers_per_group
    }
}

/// Registers one unroll group needs: source and result everywhere, plus a
/// compare selector where blends take a vector mask (AVX/AVX2).
pub const fn registers_per_group(isa: IsaVariant) -> usize {
    if isa.has_opmask() || isa.needs_implicit_blend_selector() {
        2
    } else {
        3
    }
}

/// `floor((total - reserved) / per_group)`, or `None` when that is zero.
pub const fn max_unroll_factor(total: usize, reserved: usize, per_group: usize) -> Option<usize> {
    if per_group == 0 || reserved >= total {
        return None;
    }
    match (total - reserved) / per_group {
        0 => None,
        n => Some(n),
    }
}

/// Cap the unroll at the number of whole vectors the kernel will ever see.
pub fn clamp_unroll(max_unroll: usize, element_count: usize, vector_width: usize) -> usize {
    let vectors = (element_count / vector_width).max(1);
    max_unroll.min(vectors)
}
