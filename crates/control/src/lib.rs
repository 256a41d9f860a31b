//! Instance control plane.
//!
//! Every provisioned instance runs the `inferbench-agent` binary, which
//! serves the control-plane HTTP API: health, and `start`/`stop`/`status`/
//! `logs`/`results` route groups, each backed one-to-one by a process
//! supervisor. The CLI drives that API through [`ControlClient`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod server;

pub use client::{ControlClient, ControlError};
pub use server::{router, AgentState};
