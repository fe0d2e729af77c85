use std::fs;
use std::path::{Path, PathBuf};

use changeset::{dump, generate_variants};
use common::config::FuzzConfig;
use common::err::{CsError, CsResult};

use crate::cli_options::CliOptions;

/// Drives one invocation of the tool: either rendering a changeset as
/// text, or emitting structurally-fuzzed variants next to it.
pub struct CliClient {
    options: CliOptions,
    config: FuzzConfig,
}

impl CliClient {
    pub fn new(options: CliOptions, config: FuzzConfig) -> Self {
        CliClient { options, config }
    }

    pub fn run(&self, input: &Path, seed: Option<u64>, count: Option<u32>) -> CsResult<()> {
        if self.options.is_debug() {
            tracing::debug!(app = %self.config.app_name, ?input, ?seed, ?count, "starting run");
        }

        let changeset = fs::read(input)?;

        match (seed, count) {
            (None, None) => {
                let rendered = dump(&changeset)?;
                print!("{rendered}");
                Ok(())
            }
            (None, Some(_)) => Err(CsError::Misuse(
                "a variant count requires a seed".to_string(),
            )),
            (Some(seed), count) => {
                let n = count.unwrap_or(self.config.default_variant_count);
                let variants = generate_variants(&changeset, seed, n)?;
                for (i, variant) in variants.iter().enumerate() {
                    let out_path = sibling_path(input, i);
                    fs::write(&out_path, variant)?;
                    if self.options.is_print_logs() {
                        tracing::info!(path = %out_path.display(), "wrote variant");
                    }
                }
                Ok(())
            }
        }
    }
}

/// `<input-file>-<i>`, next to the original.
fn sibling_path(input: &Path, i: usize) -> PathBuf {
    let mut name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "changeset".to_string());
    name.push('-');
    name.push_str(&i.to_string());
    input.with_file_name(name)
}
