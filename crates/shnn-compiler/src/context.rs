//! Per-run compilation state.
//!
//! `ModelAnalysis` is the scratch state of one model while the passes run;
//! once a model is done it is frozen into `ModelArtifacts` and filed in the
//! run's `CompilationContext`, which downstream code generation reads.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Serialize, Serializer};
use shnn_ir::Assignment;

use crate::kernels::{DeltaFactor, DeltaFactors, KernelBuffer};
use crate::solver::{SolverResult, SolverResults};
use crate::CompilerError;

/// Working state of one model's analysis
#[derive(Debug, Clone, Default)]
pub struct ModelAnalysis {
    /// Delta-kernel factors keyed by `(ode lhs, port)`
    pub delta_factors: DeltaFactors,
    /// Kernel/port pairs in order of first use
    pub kernel_buffers: Vec<KernelBuffer>,
    /// Oracle output
    pub solvers: SolverResults,
    /// State variables not defined by an ODE or kernel
    pub non_equations_state_variables: Vec<String>,
    /// Spike-triggered increments for this model
    pub spike_updates: Vec<Assignment>,
    /// Increments whose port lives in the paired synapse, keyed by kernel variable
    pub post_spike_updates: BTreeMap<String, Vec<Assignment>>,
}

impl ModelAnalysis {
    /// Freeze into the artifacts handed to code generation
    pub fn into_artifacts(self) -> ModelArtifacts {
        ModelArtifacts {
            analytic_solver: self.solvers.analytic,
            numeric_solver: self.solvers.numeric,
            non_equations_state_variables: self.non_equations_state_variables,
            kernel_buffers: self
                .kernel_buffers
                .iter()
                .map(|b| BufferSummary {
                    kernel: b.kernel.variables.iter().map(|v| v.complete_name()).collect(),
                    port: b.port.complete_name(),
                    delta: b.is_delta(),
                })
                .collect(),
            delta_factors: self.delta_factors.into_values().collect(),
            spike_updates: self.spike_updates,
            post_spike_updates: self.post_spike_updates,
        }
    }
}

/// Kernel/port pair as listed in the artifacts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferSummary {
    /// Complete names of the kernel variables
    pub kernel: Vec<String>,
    /// Port name
    pub port: String,
    /// True for delta kernels
    pub delta: bool,
}

#[allow(clippy::ptr_arg)]
fn as_text<S: Serializer, T: Display>(items: &Vec<T>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(items.iter().map(ToString::to_string))
}

fn as_text_map<S: Serializer, T: Display>(
    items: &BTreeMap<String, Vec<T>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_map(
        items
            .iter()
            .map(|(k, v)| (k, v.iter().map(ToString::to_string).collect::<Vec<_>>())),
    )
}

#[allow(clippy::ptr_arg)]
fn factors_as_text<S: Serializer>(items: &Vec<DeltaFactor>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(
        items
            .iter()
            .map(|f| format!("{} += ({}) * {}", f.target, f.factor, f.port)),
    )
}

/// What code generation needs to know about one analyzed model
#[derive(Debug, Clone, Serialize)]
pub struct ModelArtifacts {
    /// Closed-form solver result
    pub analytic_solver: Option<SolverResult>,
    /// Numeric solver result
    pub numeric_solver: Option<SolverResult>,
    /// State variables not defined by an ODE or kernel
    pub non_equations_state_variables: Vec<String>,
    /// Kernel/port pairs
    pub kernel_buffers: Vec<BufferSummary>,
    /// Delta-kernel factors
    #[serde(serialize_with = "factors_as_text")]
    pub delta_factors: Vec<DeltaFactor>,
    /// Spike-triggered increments
    #[serde(serialize_with = "as_text")]
    pub spike_updates: Vec<Assignment>,
    /// Increments deferred to the paired model
    #[serde(serialize_with = "as_text_map")]
    pub post_spike_updates: BTreeMap<String, Vec<Assignment>>,
}

/// A model whose analysis failed
#[derive(Debug)]
pub struct ModelFailure {
    /// Model name
    pub model: String,
    /// Why it failed
    pub error: CompilerError,
}

/// Results of one compilation run, keyed by model name
#[derive(Debug, Default)]
pub struct CompilationContext {
    models: BTreeMap<String, ModelArtifacts>,
    failures: Vec<ModelFailure>,
}

impl CompilationContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// File the artifacts of an analyzed model
    pub fn record(&mut self, model: impl Into<String>, artifacts: ModelArtifacts) {
        self.models.insert(model.into(), artifacts);
    }

    /// File a failure
    pub fn fail(&mut self, model: impl Into<String>, error: CompilerError) {
        self.failures.push(ModelFailure {
            model: model.into(),
            error,
        });
    }

    /// Artifacts of a model
    pub fn artifacts(&self, model: &str) -> Option<&ModelArtifacts> {
        self.models.get(model)
    }

    /// Every analyzed model
    pub fn models(&self) -> &BTreeMap<String, ModelArtifacts> {
        &self.models
    }

    /// Closed-form result of a model
    pub fn analytic_solver(&self, model: &str) -> Option<&SolverResult> {
        self.artifacts(model).and_then(|a| a.analytic_solver.as_ref())
    }

    /// Numeric result of a model
    pub fn numeric_solver(&self, model: &str) -> Option<&SolverResult> {
        self.artifacts(model).and_then(|a| a.numeric_solver.as_ref())
    }

    /// Non-equation state variables of a model
    pub fn non_equations_state_variables(&self, model: &str) -> &[String] {
        self.artifacts(model)
            .map(|a| a.non_equations_state_variables.as_slice())
            .unwrap_or(&[])
    }

    /// Spike updates of a model
    pub fn spike_updates(&self, model: &str) -> &[Assignment] {
        self.artifacts(model).map(|a| a.spike_updates.as_slice()).unwrap_or(&[])
    }

    /// Deferred spike updates of a model
    pub fn post_spike_updates(&self, model: &str) -> Option<&BTreeMap<String, Vec<Assignment>>> {
        self.artifacts(model).map(|a| &a.post_spike_updates)
    }

    /// Failures so far, in order
    pub fn failures(&self) -> &[ModelFailure] {
        &self.failures
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.failures.is_empty()
    }

    /// Drop everything at the end of a batch
    pub fn clear(&mut self) {
        self.models.clear();
        self.failures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shnn_ir::parse_assignment;

    fn artifacts() -> ModelArtifacts {
        let mut analysis = ModelAnalysis::default();
        analysis.non_equations_state_variables.push("r".into());
        analysis
            .spike_updates
            .push(parse_assignment("g__X__spikes += (spikes)").expect("parses"));
        analysis
            .post_spike_updates
            .entry("pre_trace".into())
            .or_default()
            .push(parse_assignment("pre_trace__X__pre_spikes += 1.0").expect("parses"));
        analysis.into_artifacts()
    }

    #[test]
    fn lookups_by_model_name() {
        let mut ctx = CompilationContext::new();
        ctx.record("iaf", artifacts());
        assert_eq!(ctx.non_equations_state_variables("iaf"), ["r".to_string()]);
        assert_eq!(ctx.spike_updates("iaf").len(), 1);
        assert!(ctx.analytic_solver("iaf").is_none());
        assert!(ctx.spike_updates("missing").is_empty());
        ctx.fail("broken", CompilerError::Message("x".into()));
        assert_eq!(ctx.failures().len(), 1);
        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn artifacts_serialize_statements_as_text() {
        let json = serde_json::to_value(artifacts()).expect("serializes");
        assert_eq!(json["spike_updates"][0], "g__X__spikes += (spikes)");
        assert_eq!(json["post_spike_updates"]["pre_trace"][0], "pre_trace__X__pre_spikes += 1.0");
        assert!(json["analytic_solver"].is_null());
    }
}
