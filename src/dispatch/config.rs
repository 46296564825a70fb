//! Environment configuration for the JIT.
//!
//! - `GLLM_PRELU_MAX_ISA`: highest ISA variant the resolver may pick.
//! - `GLLM_PRELU_JIT_DUMP`: directory that receives raw generated code
//!   (`1` means the current directory, `0`/empty disables).

use std::path::PathBuf;

use super::isa::IsaVariant;

pub const ENV_MAX_ISA: &str = "GLLM_PRELU_MAX_ISA";
pub const ENV_JIT_DUMP: &str = "GLLM_PRELU_JIT_DUMP";

/// Process-wide JIT settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitConfig {
    /// Resolver cap; `None` lets the host decide.
    pub max_isa: Option<IsaVariant>,
    /// Where to write generated code, if anywhere.
    pub dump_dir: Option<PathBuf>,
}

impl JitConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Invalid values are logged and ignored so a typo never disables
    /// kernel creation.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_isa = lookup(ENV_MAX_ISA).and_then(|value| {
            let value = value.trim().to_string();
            if value.is_empty() || value.eq_ignore_ascii_case("all") {
                return None;
            }
            match value.parse::<IsaVariant>() {
                Ok(isa) => Some(isa),
                Err(err) => {
                    log::warn!("{ENV_MAX_ISA}: {err}, ignoring");
                    None
                }
            }
        });

        let dump_dir = lookup(ENV_JIT_DUMP).and_then(|value| {
            let value = value.trim();
            match value {
                "" | "0" => None,
                "1" => Some(PathBuf::from(".")),
                dir => Some(PathBuf::from(dir)),
            }
        });

        JitConfig { max_isa, dump_dir }
    }
}
