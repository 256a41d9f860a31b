//! Provider abstractions for benchmark cloud providers.

pub mod aws;
pub mod scaleway;
mod traits;

use tokio::task::JoinSet;

pub use traits::{
    CloudProvider, ImageState, Instance, InstanceRole, InstanceState, MachineImage, ProviderError,
};

pub use aws::Aws;
pub use scaleway::Scaleway;

/// Drain a set of concurrent fallible tasks, letting every task run to
/// completion, and collect all failure messages. Siblings are never
/// cancelled because one of them failed.
pub(crate) async fn collect_failures(
    mut set: JoinSet<Result<(), ProviderError>>,
) -> (usize, Vec<String>) {
    let total = set.len();
    let mut failures = Vec::new();

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => failures.push(error.to_string()),
            Err(error) => failures.push(format!("task panicked: {error}")),
        }
    }

    (total, failures)
}

/// [`collect_failures`], aggregated into a single result. The caller
/// receives every failure, not just the first.
pub(crate) async fn drain_tasks(
    set: JoinSet<Result<(), ProviderError>>,
) -> Result<(), ProviderError> {
    let (total, failures) = collect_failures(set).await;

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::Partial { total, failures })
    }
}
