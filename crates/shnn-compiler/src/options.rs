//! Compiler configuration

use serde::{Deserialize, Serialize};

/// Default simplification recipe handed to the oracle
pub const DEFAULT_SIMPLIFY_EXPRESSION: &str = "sympy.logcombine(sympy.powsimp(sympy.expand(expr)))";

/// Default reserved timestep symbol
pub const DEFAULT_TIMESTEP_SYMBOL: &str = "__h";

/// Options of one compilation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Neuron/synapse pairs to split
    pub neuron_synapse_pairs: Vec<NeuronSynapsePair>,
    /// Forwarded to the oracle: keep these expressions verbatim
    pub preserve_expressions: PreserveExpressions,
    /// Forwarded to the oracle: simplification recipe for its output
    pub simplify_expression: String,
    /// Suffix appended to model names by the front end
    pub model_suffix: String,
    /// Reserved name of the integration timestep
    pub timestep_symbol: String,
    /// Ask the caller to write a textual report per transformed model
    pub store_reports: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            neuron_synapse_pairs: Vec::new(),
            preserve_expressions: PreserveExpressions::default(),
            simplify_expression: DEFAULT_SIMPLIFY_EXPRESSION.to_string(),
            model_suffix: String::new(),
            timestep_symbol: DEFAULT_TIMESTEP_SYMBOL.to_string(),
            store_reports: false,
        }
    }
}

impl CompilerOptions {
    /// True if `port` is a configured postsynaptic port of the given pair.
    ///
    /// `neuron` and `synapse` are full model names, suffix included.
    pub fn is_post_port(&self, port: &str, neuron: &str, synapse: &str) -> bool {
        self.neuron_synapse_pairs.iter().any(|pair| {
            format!("{}{}", pair.neuron, self.model_suffix) == neuron
                && format!("{}{}", pair.synapse, self.model_suffix) == synapse
                && pair.post_port_names().any(|p| p == port)
        })
    }
}

/// `preserve_expressions`: everything, nothing, or a list of names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreserveExpressions {
    /// All or none
    All(bool),
    /// Only these left-hand sides
    Names(Vec<String>),
}

impl Default for PreserveExpressions {
    fn default() -> Self {
        PreserveExpressions::All(false)
    }
}

/// One configured neuron/synapse pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuronSynapsePair {
    /// Neuron model name, without suffix
    pub neuron: String,
    /// Synapse model name, without suffix
    pub synapse: String,
    /// Synapse ports that carry postsynaptic spikes
    #[serde(default)]
    pub post_ports: Option<PostPorts>,
}

impl NeuronSynapsePair {
    /// Synapse-side names of the postsynaptic ports
    pub fn post_port_names(&self) -> impl Iterator<Item = &str> {
        let entries: &[PostPort] = match &self.post_ports {
            Some(PostPorts::List(entries)) => entries,
            _ => &[],
        };
        let single = match &self.post_ports {
            Some(PostPorts::Single(name)) => Some(name.as_str()),
            _ => None,
        };
        single.into_iter().chain(entries.iter().filter_map(PostPort::synapse_port))
    }
}

/// `post_ports` as written in the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostPorts {
    /// A single port name
    Single(String),
    /// Several ports or aliases
    List(Vec<PostPort>),
}

/// Entry of a `post_ports` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostPort {
    /// Port name
    Name(String),
    /// `[synapse_port, neuron_port]`
    Alias(Vec<String>),
}

impl PostPort {
    /// Name of the port on the synapse side
    pub fn synapse_port(&self) -> Option<&str> {
        match self {
            PostPort::Name(name) => Some(name),
            PostPort::Alias(names) => names.first().map(String::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(post_ports: Option<PostPorts>) -> CompilerOptions {
        CompilerOptions {
            neuron_synapse_pairs: vec![NeuronSynapsePair {
                neuron: "iaf".into(),
                synapse: "stdp".into(),
                post_ports,
            }],
            model_suffix: "_nestml".into(),
            ..CompilerOptions::default()
        }
    }

    #[test]
    fn defaults() {
        let o = CompilerOptions::default();
        assert_eq!(o.timestep_symbol, "__h");
        assert_eq!(o.preserve_expressions, PreserveExpressions::All(false));
        assert!(o.simplify_expression.starts_with("sympy.logcombine"));
    }

    #[test]
    fn post_port_forms() {
        let o = pair(Some(PostPorts::Single("post_spikes".into())));
        assert!(o.is_post_port("post_spikes", "iaf_nestml", "stdp_nestml"));
        assert!(!o.is_post_port("post_spikes", "iaf", "stdp"));

        let o = pair(Some(PostPorts::List(vec![
            PostPort::Name("a".into()),
            PostPort::Alias(vec!["b".into(), "b_neuron".into()]),
        ])));
        assert!(o.is_post_port("a", "iaf_nestml", "stdp_nestml"));
        assert!(o.is_post_port("b", "iaf_nestml", "stdp_nestml"));
        assert!(!o.is_post_port("b_neuron", "iaf_nestml", "stdp_nestml"));

        let o = pair(None);
        assert!(!o.is_post_port("post_spikes", "iaf_nestml", "stdp_nestml"));
    }

    #[test]
    fn deserializes_untagged_forms() {
        let json = r#"{
            "neuron_synapse_pairs": [
                {"neuron": "iaf", "synapse": "stdp", "post_ports": [["post_spikes", "post_neuron_spikes"], "other"]}
            ],
            "preserve_expressions": ["V_m'"]
        }"#;
        let o: CompilerOptions = serde_json::from_str(json).expect("valid options");
        assert_eq!(o.preserve_expressions, PreserveExpressions::Names(vec!["V_m'".into()]));
        let names: Vec<&str> = o.neuron_synapse_pairs[0].post_port_names().collect();
        assert_eq!(names, vec!["post_spikes", "other"]);
        assert_eq!(o.timestep_symbol, "__h");
    }
}
