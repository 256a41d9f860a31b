//! Resource tagging and wire contracts shared by the CLI and the agent.

/// Tag key carrying the benchmark session identifier. The tag pair
/// (`BENCH_ID_TAG`, `ROLE_TAG`) is the only correlation between a benchmark
/// and its cloud resources; there is no separate registry.
pub const BENCH_ID_TAG: &str = "bench-id";

/// Tag key carrying the instance role (`llm` or `bench`).
pub const ROLE_TAG: &str = "benchmark-role";

/// Tag key marking resources as owned by this tool.
pub const MANAGED_BY_TAG: &str = "managed-by";

/// Tag value for [`MANAGED_BY_TAG`].
pub const MANAGED_BY_VALUE: &str = "inferbench";

/// Port the instance control-plane API listens on.
pub const CONTROL_PORT: u16 = 8001;

/// Port the inference engine serves on.
pub const ENGINE_PORT: u16 = 8000;

/// Header carrying the control-plane API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Well-known path where the benchmark subprocess writes its result
/// document. Contract between the benchmark program and the collector.
pub const METRICS_PATH: &str = "/home/ubuntu/metrics.json";
