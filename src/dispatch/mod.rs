//! Host capability detection and JIT configuration.
//!
//! Both are evaluated once per process and cached; kernel creation reads
//! the cached values and never re-queries the processor.

pub mod config;
pub mod isa;

pub use config::JitConfig;
pub use isa::{resolve_isa, CpuFeatures, IsaVariant};

use std::sync::OnceLock;

static HOST_FEATURES: OnceLock<CpuFeatures> = OnceLock::new();
static JIT_CONFIG: OnceLock<JitConfig> = OnceLock::new();

/// Get the host CPU features (detected once, cached for process lifetime).
pub fn host_features() -> &'static CpuFeatures {
    HOST_FEATURES.get_or_init(CpuFeatures::detect)
}

/// Get the JIT configuration (read from the environment once).
pub fn jit_config() -> &'static JitConfig {
    JIT_CONFIG.get_or_init(JitConfig::from_env)
}
