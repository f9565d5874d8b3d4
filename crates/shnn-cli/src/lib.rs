//! snn CLI crate
//!
//! Purpose:
//! - Drive the model compiler from the command line over a batch of model sources.
//!
//! Major commands (see [commands]):
//! - init: write an `snn.toml` options file (pairs, model suffix, reports).
//! - model transform: load JSON model sources, split pairs, analyse every model through a
//!   command-line solver oracle, write `models/*.json`, `artifacts.json`, optional
//!   `reports/*.txt`, and `failures.json` when models were dropped.
//! - model report: print the textual report of models in a source file.
//!
//! Integration points:
//! - shnn_ir: `Model` (serde) and `Model::to_text`.
//! - shnn_compiler: `CompilerOptions`, `ModelCompiler`, `CommandOracle`, `CompilationContext`.
//!
//! Notes:
//! - The binary (src/main.rs) wires up logging and argument parsing, calling SnnCli::execute().

pub mod commands;
pub mod config;
pub mod error;
pub mod sources;
pub mod workspace;

pub use commands::SnnCli;
