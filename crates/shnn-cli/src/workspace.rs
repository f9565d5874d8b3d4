//! Output directory layout for transformed models

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use shnn_compiler::{CompilationContext, ModelFailure};
use shnn_ir::Model;

use crate::error::{CliError, CliResult};

/// One failed model, as written to `failures.json`
#[derive(Debug, Serialize)]
pub struct FailureRecord {
    /// Model name
    pub model: String,
    /// `user`, `internal` or `oracle`
    pub kind: String,
    /// Rendered error
    pub message: String,
}

impl From<&ModelFailure> for FailureRecord {
    fn from(f: &ModelFailure) -> Self {
        Self {
            model: f.model.clone(),
            kind: format!("{:?}", f.error.kind()).to_lowercase(),
            message: f.error.to_string(),
        }
    }
}

/// Output directory of one `model transform` run
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    /// Create a new workspace instance
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Transformed models, one JSON file each
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// Textual reports, one per model
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// Solver results and spike updates of every model
    pub fn artifacts_path(&self) -> PathBuf {
        self.root.join("artifacts.json")
    }

    /// Models dropped from the batch
    pub fn failures_path(&self) -> PathBuf {
        self.root.join("failures.json")
    }

    /// Ensure output directories exist
    pub fn ensure_directories(&self, reports: bool) -> CliResult<()> {
        let mut dirs = vec![self.models_dir()];
        if reports {
            dirs.push(self.reports_dir());
        }

        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    CliError::workspace(format!("Failed to create directory {}: {}", dir.display(), e))
                })?;
            }
        }

        Ok(())
    }

    /// Write `models/<name>.json`
    pub fn write_model(&self, model: &Model) -> CliResult<PathBuf> {
        let path = self.models_dir().join(format!("{}.json", model.name));
        write_json(&path, model)?;
        Ok(path)
    }

    /// Write `reports/<name>.txt`
    pub fn write_report(&self, model: &Model) -> CliResult<PathBuf> {
        let path = self.reports_dir().join(format!("{}.txt", model.name));
        std::fs::write(&path, model.to_text()).with_context(|| format!("writing report {}", path.display()))?;
        Ok(path)
    }

    /// Write `artifacts.json`, keyed by model name
    pub fn write_artifacts(&self, ctx: &CompilationContext) -> CliResult<PathBuf> {
        let path = self.artifacts_path();
        write_json(&path, ctx.models())?;
        Ok(path)
    }

    /// Write `failures.json`; removes a stale one when nothing failed
    pub fn write_failures(&self, failures: &[ModelFailure]) -> CliResult<Option<PathBuf>> {
        let path = self.failures_path();
        if failures.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            return Ok(None);
        }
        let records: Vec<FailureRecord> = failures.iter().map(FailureRecord::from).collect();
        write_json(&path, &records)?;
        Ok(Some(path))
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> CliResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
