//! Compilation pipeline: scratch workspaces, external commands and the pass sequence.

pub mod engine;
pub mod runner;
pub mod workspace;

pub use engine::{CompileEngine, CompileError, CompileLog, PDF_SIGNATURE, verify_pdf};
pub use runner::{CommandInvocation, CommandOutput, CommandRunner, RunnerError};
pub use workspace::Workspace;
