use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::err::CsError;

/// Configuration for the `fuzz` CLI (see `changeset_cli`): a
/// read-toml-from-path shape with knobs specific to this engine.
#[derive(Debug, Serialize, Deserialize)]
pub struct FuzzConfig {
    pub app_name: String,

    /// Default PRNG seed used when `--seed` is not given on the CLI.
    pub default_seed: u64,

    /// Default number of variants to emit per input file.
    pub default_variant_count: u32,

    pub base: BaseConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BaseConfig {
    /// Directory tracing writes roll into, when file output is
    /// selected.
    pub log_dir: Option<String>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        FuzzConfig {
            app_name: String::from("changeset-fuzz"),
            default_seed: 0,
            default_variant_count: 10,
            base: BaseConfig::default(),
        }
    }
}

impl Default for BaseConfig {
    fn default() -> Self {
        BaseConfig {
            log_dir: Some(String::from("/tmp/changeset/logs")),
        }
    }
}

/// Reads and parses a `FuzzConfig` from a TOML file at `path`.
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<FuzzConfig, CsError> {
    let mut file = File::open(path.as_ref())?;
    let mut s = String::new();
    file.read_to_string(&mut s)?;

    toml::from_str(s.as_str()).map_err(|e| CsError::Misuse(format!("config parse error: {e}")))
}
