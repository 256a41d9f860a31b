//! Client for the instance control-plane API.
//!
//! Drives the agents on provisioned instances: health checks, engine
//! deployment, benchmark runs, log and result retrieval. Readiness waits
//! compose the plain HTTP calls with the shared poller.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use inferbench_config::EngineKind;
use inferbench_supervisor::{BenchmarkResults, CollectError};
use inferbench_utils::constants::{API_KEY_HEADER, CONTROL_PORT, ENGINE_PORT};
use inferbench_utils::{wait_until, PollError, PollPolicy};

/// Default timeout for control-plane requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Bound on instances answering their health endpoint: ~100 seconds.
const HEALTH_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(1), 100);

/// Bound on the model becoming ready to serve: ~6 minutes. Model loading
/// dominates engine startup.
const MODEL_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(10), 36);

/// Errors raised by control-plane interactions.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The control API answered with a non-success status.
    #[error("control API returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The result document was malformed or incomplete.
    #[error(transparent)]
    Collect(#[from] CollectError),

    /// A readiness wait exhausted its budget.
    #[error("not ready after {0:?}")]
    Timeout(Duration),

    /// The wait was cancelled from the outside.
    #[error("wait cancelled")]
    Cancelled,
}

impl From<PollError> for ControlError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Timeout(bound) => Self::Timeout(bound),
            PollError::Cancelled => Self::Cancelled,
        }
    }
}

/// Client for the control-plane API of benchmark instances.
#[derive(Clone)]
pub struct ControlClient {
    api_key: String,
    http: Client,
    control_port: u16,
    engine_port: u16,
}

impl ControlClient {
    /// Create a client authenticating with `api_key`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ControlError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            http,
            control_port: CONTROL_PORT,
            engine_port: ENGINE_PORT,
        })
    }

    /// Override the control-plane port.
    #[must_use]
    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    /// Override the engine port.
    #[must_use]
    pub fn with_engine_port(mut self, port: u16) -> Self {
        self.engine_port = port;
        self
    }

    fn control_url(&self, ip: &str, path: &str) -> String {
        format!("http://{ip}:{}{path}", self.control_port)
    }

    /// GET an authenticated control-plane path, expecting success.
    async fn get(&self, ip: &str, path: &str) -> Result<String, ControlError> {
        let url = self.control_url(ip, path);
        debug!(url = %url, "GET request");

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        Self::read_success(response).await
    }

    /// POST an authenticated control-plane path, expecting success.
    async fn post(
        &self,
        ip: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<String, ControlError> {
        let url = self.control_url(ip, path);
        debug!(url = %url, "POST request");

        let mut request = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        Self::read_success(request.send().await?).await
    }

    async fn read_success(response: reqwest::Response) -> Result<String, ControlError> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok(text)
        } else {
            Err(ControlError::Status {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Probe the instance's health endpoint.
    ///
    /// # Errors
    /// Returns [`ControlError`] when the agent is unreachable or unhealthy.
    pub async fn health(&self, ip: &str) -> Result<(), ControlError> {
        self.get(ip, "/health").await.map(|_| ())
    }

    /// Start the inference engine on the instance at `ip`.
    ///
    /// # Errors
    /// Propagates the control API failure.
    pub async fn start_engine(&self, ip: &str, engine: EngineKind) -> Result<(), ControlError> {
        info!(ip = %ip, engine = %engine, "Starting inference engine");
        self.post(ip, &format!("/{engine}/start"), None).await.map(|_| ())
    }

    /// Stop the inference engine on the instance at `ip`.
    ///
    /// # Errors
    /// Propagates the control API failure.
    pub async fn stop_engine(&self, ip: &str, engine: EngineKind) -> Result<(), ControlError> {
        self.post(ip, &format!("/{engine}/stop"), None).await.map(|_| ())
    }

    /// Whether the engine at `ip` is ready to serve its model.
    ///
    /// # Errors
    /// Propagates transport failures; an unready engine is `Ok(false)`.
    pub async fn model_ready(&self, ip: &str) -> Result<bool, ControlError> {
        let url = format!("http://{ip}:{}/v1/models", self.engine_port);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body.get("status").and_then(|s| s.as_str()) == Some("ready"))
    }

    /// Start the benchmark on `bench_ip`, pointed at the engine on
    /// `llm_ip`.
    ///
    /// # Errors
    /// Propagates the control API failure.
    pub async fn start_benchmark(&self, bench_ip: &str, llm_ip: &str) -> Result<(), ControlError> {
        info!(bench_ip = %bench_ip, llm_ip = %llm_ip, "Starting benchmark");
        self.post(
            bench_ip,
            "/bench/start",
            Some(serde_json::json!({ "ip": llm_ip })),
        )
        .await
        .map(|_| ())
    }

    /// Stop the benchmark on `bench_ip`.
    ///
    /// # Errors
    /// Propagates the control API failure.
    pub async fn stop_benchmark(&self, bench_ip: &str) -> Result<(), ControlError> {
        self.post(bench_ip, "/bench/stop", None).await.map(|_| ())
    }

    /// Archived log lines of a route group (`vllm` or `bench`).
    ///
    /// # Errors
    /// Propagates the control API failure.
    pub async fn logs(&self, ip: &str, group: &str) -> Result<String, ControlError> {
        self.get(ip, &format!("/{group}/logs")).await
    }

    /// Fetch and validate the benchmark result document from `bench_ip`.
    /// The document is re-validated client-side; a partial document is
    /// rejected, never returned.
    ///
    /// # Errors
    /// Propagates transport failures and result validation failures.
    pub async fn results(&self, bench_ip: &str) -> Result<BenchmarkResults, ControlError> {
        let text = self.get(bench_ip, "/bench/results").await?;
        Ok(BenchmarkResults::from_json(&text)?)
    }

    /// Wait until both instances answer their health endpoints.
    ///
    /// # Errors
    /// [`ControlError::Timeout`] when either instance stays unreachable.
    pub async fn wait_for_instances(
        &self,
        llm_ip: &str,
        bench_ip: &str,
        token: &CancellationToken,
    ) -> Result<(), ControlError> {
        info!(llm_ip = %llm_ip, bench_ip = %bench_ip, "Waiting for instances");

        wait_until(HEALTH_POLICY, token, || async move {
            let llm = self.health(llm_ip).await.is_ok();
            let bench = self.health(bench_ip).await.is_ok();
            llm && bench
        })
        .await?;

        info!("Both instances are healthy");
        Ok(())
    }

    /// Wait until the model on `llm_ip` is ready to serve.
    ///
    /// # Errors
    /// [`ControlError::Timeout`] when the model never becomes ready.
    pub async fn wait_for_model(
        &self,
        llm_ip: &str,
        token: &CancellationToken,
    ) -> Result<(), ControlError> {
        info!(llm_ip = %llm_ip, "Waiting for the model to be ready");

        wait_until(MODEL_POLICY, token, || async move {
            self.model_ready(llm_ip).await.unwrap_or(false)
        })
        .await?;

        info!("Model is ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> ControlClient {
        let port = server.address().port();
        ControlClient::new("secret-key")
            .unwrap()
            .with_control_port(port)
            .with_engine_port(port)
    }

    #[tokio::test]
    async fn health_round_trips_with_the_api_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header(API_KEY_HEADER, "secret-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).health("127.0.0.1").await.unwrap();
    }

    #[tokio::test]
    async fn failed_deploy_surfaces_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/vllm/start"))
            .respond_with(ResponseTemplate::new(500).set_body_string("spawn failed"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .start_engine("127.0.0.1", EngineKind::Vllm)
            .await
            .unwrap_err();

        match err {
            ControlError::Status { status, message } => {
                assert_eq!(status, 500);
                assert!(message.contains("spawn failed"));
            }
            other => panic!("expected status error, got {other}"),
        }
    }

    #[tokio::test]
    async fn benchmark_start_carries_the_target_ip() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/bench/start"))
            .and(body_json(serde_json::json!({ "ip": "10.0.0.9" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ok" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .start_benchmark("127.0.0.1", "10.0.0.9")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn incomplete_results_are_rejected_not_partially_returned() {
        let server = MockServer::start().await;

        // model_id is absent: the document must be rejected whole.
        Mock::given(method("GET"))
            .and(path("/bench/results"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "date": "2025-06-01T12:00:00Z",
                "backend": "vllm",
                "num_prompts": 10,
                "duration": 1.0,
                "completed": 10,
                "request_throughput": 1.0,
                "output_throughput": 1.0
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).results("127.0.0.1").await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::Collect(CollectError::Validation(missing)) if missing == vec!["model_id"]
        ));
    }

    #[tokio::test]
    async fn model_readiness_follows_the_engine_answer() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "ready" })),
            )
            .mount(&server)
            .await;

        assert!(client_for(&server).model_ready("127.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_engine_reads_as_not_ready() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(!client_for(&server).model_ready("127.0.0.1").await.unwrap());
    }
}
