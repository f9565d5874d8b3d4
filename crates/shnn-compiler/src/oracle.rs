//! Oracle backed by an external executable.
//!
//! The request is written as JSON to the child's stdin; the child prints the
//! result list as JSON on stdout.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::solver::{OracleError, OracleResult, SolverOracle, SolverRequest, SolverResult};

/// Runs `program args...` once per oracle call
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandOracle {
    /// Oracle running `program` without arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl SolverOracle for CommandOracle {
    fn solve(&self, request: &SolverRequest) -> OracleResult {
        let input = serde_json::to_vec(request)?;
        debug!(program = %self.program.display(), bytes = input.len(), "spawning solver oracle");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Written from a thread while stdout is drained.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OracleError::Failed("child stdin unavailable".into()))?;
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| OracleError::Failed("stdin writer panicked".into()))?;

        if !output.status.success() {
            return Err(OracleError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written?;
        let results: Vec<SolverResult> = serde_json::from_slice(&output.stdout)?;
        Ok(results)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::solver::build_request;
    use shnn_ir::ModelBuilder;

    fn request() -> SolverRequest {
        let m = ModelBuilder::neuron("n")
            .state("x real = 1")
            .ode("x' = -x")
            .build()
            .expect("model builds");
        build_request(&m, &[], &CompilerOptions::default()).expect("builds")
    }

    #[test]
    fn reads_results_from_stdout() {
        let oracle = CommandOracle::new("sh").args([
            "-c",
            r#"cat > /dev/null; echo '[{"solver": "analytical", "state_variables": ["x"], "initial_values": {"x": "1"}, "update_expressions": {"x": "__P__x__x * x"}, "propagators": {"__P__x__x": "exp(-__h)"}}]'"#,
        ]);
        let results = oracle.solve(&request()).expect("oracle answers");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_analytic());
        assert_eq!(results[0].propagators["__P__x__x"], "exp(-__h)");
    }

    #[test]
    fn receives_the_request_on_stdin() {
        let oracle = CommandOracle::new("sh").arg("-c").arg(
            r#"req=$(cat); case "$req" in *'"output_timestep_symbol":"__h"'*) echo '[]' ;; *) exit 7 ;; esac"#,
        );
        let results = oracle.solve(&request()).expect("oracle saw the request");
        assert!(results.is_empty());
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let oracle = CommandOracle::new("sh").args(["-c", "cat > /dev/null; echo unsupported >&2; exit 3"]);
        match oracle.solve(&request()) {
            Err(OracleError::Exit { stderr, .. }) => assert_eq!(stderr, "unsupported"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_output_is_an_error() {
        let oracle = CommandOracle::new("sh").args(["-c", "cat > /dev/null; echo not json"]);
        assert!(matches!(oracle.solve(&request()), Err(OracleError::Json(_))));
    }
}
