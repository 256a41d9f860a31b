//! Scaleway provider: Instance and IAM APIs.

mod client;
mod models;

pub use client::Scaleway;
