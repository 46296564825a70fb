//! ISA variants and host capability resolution.
//!
//! The PReLU code generator targets a closed set of x86-64 vector
//! instruction-set generations. `resolve_isa` walks them from the most to
//! the least capable and returns the first one that implements the
//! requested element type and runs on the host.

use std::fmt;
use std::str::FromStr;

use crate::types::{DType, KernelDescriptor, PreluError, PreluResult};

/// Instruction-set variant the code generator can target.
///
/// Declaration order is ascending capability, so `Ord` compares tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsaVariant {
    /// SSE4.1, 16 xmm registers, no lane masks.
    Sse41,
    /// AVX, 16 ymm registers, vector lane masks via `vmaskmovps`.
    Avx,
    /// AVX2, same register file as AVX plus 256-bit integer ops.
    Avx2,
    /// AVX-512 F/BW/DQ/VL, 32 zmm registers, opmask tails.
    Avx512Core,
    /// `Avx512Core` plus native `vcvtneps2bf16`.
    Avx512CoreBf16,
}

impl IsaVariant {
    /// All variants, most capable first.
    pub const DESCENDING: [IsaVariant; 5] = [
        IsaVariant::Avx512CoreBf16,
        IsaVariant::Avx512Core,
        IsaVariant::Avx2,
        IsaVariant::Avx,
        IsaVariant::Sse41,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sse41 => "sse41",
            Self::Avx => "avx",
            Self::Avx2 => "avx2",
            Self::Avx512Core => "avx512_core",
            Self::Avx512CoreBf16 => "avx512_core_bf16",
        }
    }

    /// Number of architectural vector registers.
    pub const fn num_vregs(self) -> usize {
        match self {
            Self::Sse41 | Self::Avx | Self::Avx2 => 16,
            Self::Avx512Core | Self::Avx512CoreBf16 => 32,
        }
    }

    /// Vector register width in bytes.
    pub const fn vlen_bytes(self) -> usize {
        match self {
            Self::Sse41 => 16,
            Self::Avx | Self::Avx2 => 32,
            Self::Avx512Core | Self::Avx512CoreBf16 => 64,
        }
    }

    /// f32 lanes per vector register. Reduced-precision types are widened to
    /// f32 before arithmetic, so this is the lane count for every dtype.
    pub const fn vector_width(self) -> usize {
        self.vlen_bytes() / 4
    }

    /// Tail lanes are selected with opmask registers rather than vectors.
    pub const fn has_opmask(self) -> bool {
        matches!(self, Self::Avx512Core | Self::Avx512CoreBf16)
    }

    /// Masked vector moves exist (`vmaskmovps` / EVEX masking). SSE4.1
    /// handles tails lane by lane.
    pub const fn has_masked_moves(self) -> bool {
        !matches!(self, Self::Sse41)
    }

    /// Uses VEX or EVEX encodings, so the epilogue clears upper state.
    pub const fn is_vex(self) -> bool {
        !matches!(self, Self::Sse41)
    }

    /// `blendvps` reads its selector from `xmm0`, which must be kept free.
    pub const fn needs_implicit_blend_selector(self) -> bool {
        matches!(self, Self::Sse41)
    }

    /// bf16 narrowing is an instruction rather than an integer sequence.
    pub const fn native_bf16(self) -> bool {
        matches!(self, Self::Avx512CoreBf16)
    }

    /// Whether this variant has a code generation path for `dtype`.
    pub const fn supports_dtype(self, dtype: DType) -> bool {
        match dtype {
            DType::F32 => true,
            DType::BF16 => matches!(self, Self::Avx2 | Self::Avx512Core | Self::Avx512CoreBf16),
            DType::F16 => false,
        }
    }
}

impl fmt::Display for IsaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IsaVariant {
    type Err = PreluError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        IsaVariant::DESCENDING
            .into_iter()
            .find(|isa| isa.name() == value)
            .or(match value.as_str() {
                "sse4.1" | "sse4_1" => Some(IsaVariant::Sse41),
                "avx512" | "avx512f" => Some(IsaVariant::Avx512Core),
                _ => None,
            })
            .ok_or_else(|| PreluError::InvalidIsaName(s.to_string()))
    }
}

/// Host CPU feature flags relevant to variant selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CpuFeatures {
    pub sse41: bool,
    pub avx: bool,
    pub avx2: bool,
    pub avx512f: bool,
    pub avx512bw: bool,
    pub avx512dq: bool,
    pub avx512vl: bool,
    pub avx512bf16: bool,
}

impl CpuFeatures {
    /// Query the running processor (and OS register state support).
    #[cfg(target_arch = "x86_64")]
    pub fn detect() -> Self {
        CpuFeatures {
            sse41: is_x86_feature_detected!("sse4.1"),
            avx: is_x86_feature_detected!("avx"),
            avx2: is_x86_feature_detected!("avx2"),
            avx512f: is_x86_feature_detected!("avx512f"),
            avx512bw: is_x86_feature_detected!("avx512bw"),
            avx512dq: is_x86_feature_detected!("avx512dq"),
            avx512vl: is_x86_feature_detected!("avx512vl"),
            avx512bf16: is_x86_feature_detected!("avx512bf16"),
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    pub fn detect() -> Self {
        CpuFeatures::default()
    }

    /// Every feature set, for tests that exercise the full resolver table.
    pub const fn all() -> Self {
        CpuFeatures {
            sse41: true,
            avx: true,
            avx2: true,
            avx512f: true,
            avx512bw: true,
            avx512dq: true,
            avx512vl: true,
            avx512bf16: true,
        }
    }

    /// Whether code for `isa` can execute on this processor.
    pub const fn supports(&self, isa: IsaVariant) -> bool {
        let avx512_core = self.avx512f && self.avx512bw && self.avx512dq && self.avx512vl;
        match isa {
            IsaVariant::Sse41 => self.sse41,
            IsaVariant::Avx => self.avx,
            IsaVariant::Avx2 => self.avx && self.avx2,
            IsaVariant::Avx512Core => avx512_core,
            IsaVariant::Avx512CoreBf16 => avx512_core && self.avx512bf16,
        }
    }

    /// Most capable variant the host runs, regardless of dtype.
    pub fn best(&self) -> Option<IsaVariant> {
        IsaVariant::DESCENDING.into_iter().find(|isa| self.supports(*isa))
    }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut feats = Vec::new();
        if self.sse41 {
            feats.push("SSE4.1");
        }
        if self.avx {
            feats.push("AVX");
        }
        if self.avx2 {
            feats.push("AVX2");
        }
        if self.avx512f {
            feats.push("AVX-512F");
        }
        if self.avx512bw && self.avx512dq && self.avx512vl {
            feats.push("BW/DQ/VL");
        }
        if self.avx512bf16 {
            feats.push("BF16");
        }
        if feats.is_empty() {
            feats.push("Scalar");
        }
        write!(f, "{}", feats.join("+"))
    }
}

/// Pick the ISA variant for `desc`.
///
/// A variant pinned in the descriptor is validated rather than searched.
/// `max_isa` caps the search the way `GLLM_PRELU_MAX_ISA` does.
pub fn resolve_isa(
    desc: &KernelDescriptor,
    host: &CpuFeatures,
    max_isa: Option<IsaVariant>,
) -> PreluResult<IsaVariant> {
    let dtype = desc.dtype();
    let within_cap = |isa: IsaVariant| max_isa.map_or(true, |cap| isa <= cap);

    if let Some(pinned) = desc.isa() {
        if !pinned.supports_dtype(dtype) {
            return Err(PreluError::Unsupported(format!(
                "{pinned} has no {} code path",
                dtype.name()
            )));
        }
        if !host.supports(pinned) {
            return Err(PreluError::Unsupported(format!(
                "host ({host}) cannot run {pinned} code"
            )));
        }
        if !within_cap(pinned) {
            return Err(PreluError::Unsupported(format!(
                "{pinned} exceeds the configured max ISA"
            )));
        }
        return Ok(pinned);
    }

    let found = IsaVariant::DESCENDING
        .into_iter()
        .find(|&isa| isa.supports_dtype(dtype) && host.supports(isa) && within_cap(isa));

    match found {
        Some(isa) => {
            log::debug!(
                "prelu jit: resolved {isa} for {} x {} ({host})",
                dtype.name(),
                desc.element_count()
            );
            Ok(isa)
        }
        None => Err(PreluError::Unsupported(format!(
            "no ISA variant implements {} on host ({host})",
            dtype.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WeightMode;

    fn desc(dtype: DType) -> KernelDescriptor {
        KernelDescriptor::new(100, dtype, WeightMode::Scalar)
    }

    #[test]
    fn test_descending_order() {
        for pair in IsaVariant::DESCENDING.windows(2) {
            assert!(pair[0] > pair[1], "{} should outrank {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_resolve_picks_most_capable() {
        let host = CpuFeatures::all();
        assert_eq!(
            resolve_isa(&desc(DType::F32), &host, None).unwrap(),
            IsaVariant::Avx512CoreBf16
        );
        assert_eq!(
            resolve_isa(&desc(DType::BF16), &host, None).unwrap(),
            IsaVariant::Avx512CoreBf16
        );
    }

    #[test]
    fn test_resolve_respects_host() {
        let host = CpuFeatures {
            sse41: true,
            avx: true,
            ..Default::default()
        };
        assert_eq!(resolve_isa(&desc(DType::F32), &host, None).unwrap(), IsaVariant::Avx);
        // bf16 needs AVX2 integer ops at least.
        assert!(matches!(
            resolve_isa(&desc(DType::BF16), &host, None),
            Err(PreluError::Unsupported(_))
        ));
    }

    #[test]
    fn test_resolve_avx512_without_bf16() {
        let host = CpuFeatures {
            avx512bf16: false,
            ..CpuFeatures::all()
        };
        assert_eq!(
            resolve_isa(&desc(DType::BF16), &host, None).unwrap(),
            IsaVariant::Avx512Core
        );
    }

    #[test]
    fn test_resolve_max_isa_cap() {
        let host = CpuFeatures::all();
        assert_eq!(
            resolve_isa(&desc(DType::F32), &host, Some(IsaVariant::Avx2)).unwrap(),
            IsaVariant::Avx2
        );
        assert_eq!(
            resolve_isa(&desc(DType::F32), &host, Some(IsaVariant::Sse41)).unwrap(),
            IsaVariant::Sse41
        );
        assert!(resolve_isa(&desc(DType::BF16), &host, Some(IsaVariant::Avx)).is_err());
    }

    #[test]
    fn test_f16_unsupported_everywhere() {
        let host = CpuFeatures::all();
        assert!(resolve_isa(&desc(DType::F16), &host, None).is_err());
        for isa in IsaVariant::DESCENDING {
            assert!(!isa.supports_dtype(DType::F16));
            assert!(resolve_isa(&desc(DType::F16).with_isa(isa), &host, None).is_err());
        }
    }

    #[test]
    fn test_pinned_variant_checks() {
        let host = CpuFeatures {
            sse41: true,
            avx: true,
            avx2: true,
            ..Default::default()
        };
        let pinned = desc(DType::F32).with_isa(IsaVariant::Sse41);
        assert_eq!(resolve_isa(&pinned, &host, None).unwrap(), IsaVariant::Sse41);

        let too_high = desc(DType::F32).with_isa(IsaVariant::Avx512Core);
        assert!(resolve_isa(&too_high, &host, None).is_err());

        let capped = desc(DType::F32).with_isa(IsaVariant::Avx2);
        assert!(resolve_isa(&capped, &host, Some(IsaVariant::Avx)).is_err());

        let no_path = desc(DType::BF16).with_isa(IsaVariant::Avx);
        assert!(resolve_isa(&no_path, &CpuFeatures::all(), None).is_err());
    }

    #[test]
    fn test_no_features_unsupported() {
        let host = CpuFeatures::default();
        assert_eq!(host.best(), None);
        assert!(resolve_isa(&desc(DType::F32), &host, None).is_err());
    }

    #[test]
    fn test_isa_from_str() {
        assert_eq!("avx2".parse::<IsaVariant>().unwrap(), IsaVariant::Avx2);
        assert_eq!(" AVX512_CORE ".parse::<IsaVariant>().unwrap(), IsaVariant::Avx512Core);
        assert_eq!("sse4.1".parse::<IsaVariant>().unwrap(), IsaVariant::Sse41);
        assert!(matches!(
            "neon".parse::<IsaVariant>(),
            Err(PreluError::InvalidIsaName(_))
        ));
    }

    #[test]
    fn test_register_file_facts() {
        assert_eq!(IsaVariant::Sse41.vector_width(), 4);
        assert_eq!(IsaVariant::Avx2.vector_width(), 8);
        assert_eq!(IsaVariant::Avx512Core.vector_width(), 16);
        assert_eq!(IsaVariant::Avx.num_vregs(), 16);
        assert_eq!(IsaVariant::Avx512CoreBf16.num_vregs(), 32);
    }

    #[test]
    fn test_detect_host() {
        let host = CpuFeatures::detect();
        eprintln!("host features: {host}, best = {:?}", host.best());
        if host.avx2 {
            assert!(host.supports(IsaVariant::Avx2));
        }
    }
}
