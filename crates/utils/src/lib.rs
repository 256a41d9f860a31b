//! Shared primitives for the inferbench workspace.
//!
//! Everything that waits on a remote resource — instance state, image
//! availability, control-plane health, model readiness — goes through the
//! [`poll`] module so the retry/timeout behavior is uniform across call
//! sites.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod poll;

pub use poll::{wait_until, PollError, PollPolicy};
