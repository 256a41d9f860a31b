//! AWS provider: EC2 and IAM APIs.

mod client;
mod models;

pub use client::Aws;
