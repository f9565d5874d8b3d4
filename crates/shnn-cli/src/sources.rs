//! Model sources: JSON files holding one model or a list of models

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use shnn_ir::{Model, ModelKind};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CliError, CliResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceFile {
    Many(Vec<Model>),
    One(Box<Model>),
}

/// Expand directories into the `.json` files below them, sorted
pub fn collect_sources(paths: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| p.extension().is_some_and(|x| x == "json"))
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(CliError::missing_resource(format!("model source {}", path.display())));
        }
    }
    Ok(files)
}

/// Models in one source file
pub fn load_file(path: &Path) -> CliResult<Vec<Model>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading model source {}", path.display()))?;
    let parsed: SourceFile = serde_json::from_str(&content)
        .map_err(|e| CliError::invalid_args(format!("{}: not a model source: {}", path.display(), e)))?;
    let models = match parsed {
        SourceFile::Many(models) => models,
        SourceFile::One(model) => vec![*model],
    };
    debug!(path = %path.display(), models = models.len(), "loaded model source");
    Ok(models)
}

/// Load every model below `paths`, split into neurons and synapses.
///
/// Model names must be unique across the batch.
pub fn load_models(paths: &[PathBuf]) -> CliResult<(Vec<Model>, Vec<Model>)> {
    let mut neurons = Vec::new();
    let mut synapses = Vec::new();
    let mut names = BTreeSet::new();
    for file in collect_sources(paths)? {
        for mut model in load_file(&file)? {
            if !names.insert(model.name.clone()) {
                return Err(CliError::invalid_args(format!(
                    "model '{}' defined more than once ({})",
                    model.name,
                    file.display()
                )));
            }
            model.update_scope();
            match model.kind {
                ModelKind::Neuron => neurons.push(model),
                ModelKind::Synapse => synapses.push(model),
            }
        }
    }
    Ok((neurons, synapses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shnn_ir::ModelBuilder;

    fn write(path: &Path, value: &impl serde::Serialize) {
        std::fs::write(path, serde_json::to_string(value).expect("json")).expect("write");
    }

    #[test]
    fn directories_lists_and_single_models() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("synapses");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let iaf = ModelBuilder::neuron("iaf").state("V_m mV = -70").build().expect("model builds");
        let hh = ModelBuilder::neuron("hh").build().expect("model builds");
        let stdp = ModelBuilder::synapse("stdp").state("w real = 1").build().expect("model builds");
        write(&dir.path().join("neurons.json"), &vec![iaf, hh]);
        write(&nested.join("stdp.json"), &stdp);
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let (neurons, synapses) = load_models(&[dir.path().to_path_buf()]).expect("loaded");
        let names: Vec<&str> = neurons.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["iaf", "hh"]);
        assert_eq!(synapses.len(), 1);
        assert!(synapses[0].scope().contains("w"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let iaf = ModelBuilder::neuron("iaf").build().expect("model builds");
        write(&dir.path().join("a.json"), &iaf);
        write(&dir.path().join("b.json"), &iaf);
        assert!(matches!(
            load_models(&[dir.path().to_path_buf()]),
            Err(CliError::InvalidArgs(_))
        ));
    }

    #[test]
    fn unreadable_file_names_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.json");
        match load_file(&path) {
            Err(err @ CliError::Generic(_)) => {
                let message = err.to_string();
                assert!(message.contains("reading model source"), "{}", message);
                assert!(message.contains("gone.json"), "{}", message);
            }
            other => panic!("unexpected result {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            collect_sources(&[dir.path().join("absent.json")]),
            Err(CliError::MissingResource(_))
        ));
    }
}
