//! Compiler options files

use std::path::Path;

use anyhow::Context;
use shnn_compiler::CompilerOptions;

use crate::error::{CliError, CliResult};

/// Default name of the options file in a project directory
pub const OPTIONS_FILE: &str = "snn.toml";

/// Load options from `path`; without a path, look for `snn.toml` in `dir`.
///
/// A missing default file yields the default options; a missing explicit
/// file is an error.
pub fn load_options(path: Option<&Path>, dir: &Path) -> CliResult<CompilerOptions> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (dir.join(OPTIONS_FILE), false),
    };
    if !path.exists() {
        if explicit {
            return Err(CliError::missing_resource(format!("options file {}", path.display())));
        }
        return Ok(CompilerOptions::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading options file {}", path.display()))?;
    parse_options(&content).map_err(|e| CliError::config(format!("{}: {}", path.display(), e)))
}

/// Parse options from TOML text
pub fn parse_options(content: &str) -> CliResult<CompilerOptions> {
    Ok(toml::from_str(content)?)
}

/// Save options to file
pub fn save_options(options: &CompilerOptions, path: &Path) -> CliResult<()> {
    let content = toml::to_string_pretty(options)
        .map_err(|e| CliError::config(format!("Failed to serialize options: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content).with_context(|| format!("writing options file {}", path.display()))?;
    Ok(())
}
