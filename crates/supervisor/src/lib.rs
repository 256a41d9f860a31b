//! Managed-subprocess runtime.
//!
//! Each long-running external program — the inference engine, the benchmark
//! interpreter — is owned by one [`Supervisor`], which spawns it, streams
//! its output, and reports its exit. The [`command`] module materializes
//! the command lines from configuration; [`results`] reads and validates
//! the document a finished benchmark leaves behind.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod process;
pub mod results;

pub use command::CommandSpec;
pub use process::{ProcessHandle, Supervisor, SupervisorError};
pub use results::{collect_file, BenchmarkResults, CollectError};
