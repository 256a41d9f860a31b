//! Control-plane HTTP server running on every benchmark instance.
//!
//! Route groups map one-to-one onto process supervisors: `/vllm/*` manages
//! the inference engine, `/bench/*` the benchmark workload. Everything but
//! `/health` requires the API key delivered in the instance's startup
//! payload.

use std::convert::Infallible;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::error;

use inferbench_config::ConfigHandle;
use inferbench_supervisor::command::{benchmark_command, engine_command};
use inferbench_supervisor::{collect_file, Supervisor};
use inferbench_utils::constants::{API_KEY_HEADER, METRICS_PATH};

/// Shared state behind the control-plane routes.
#[derive(Clone)]
pub struct AgentState {
    /// Hot-swappable configuration.
    pub config: ConfigHandle,
    /// Supervisor of the inference engine process.
    pub engine: Arc<Supervisor>,
    /// Supervisor of the benchmark process.
    pub bench: Arc<Supervisor>,
    /// Agent-wide shutdown; children die with it.
    pub shutdown: CancellationToken,
}

impl AgentState {
    /// Assemble the agent state with fresh supervisors.
    #[must_use]
    pub fn new(config: ConfigHandle, shutdown: CancellationToken) -> Self {
        Self {
            config,
            engine: Arc::new(Supervisor::new("vllm")),
            bench: Arc::new(Supervisor::new("benchmark")),
            shutdown,
        }
    }
}

/// Build the control-plane router.
#[must_use]
pub fn router(state: AgentState) -> Router {
    let protected = Router::new()
        .route("/vllm/start", post(engine_start))
        .route("/vllm/stop", post(engine_stop))
        .route("/vllm/status", get(engine_status))
        .route("/vllm/logs", get(engine_logs))
        .route("/vllm/results", get(engine_results))
        .route("/bench/start", post(bench_start))
        .route("/bench/stop", post(bench_stop))
        .route("/bench/status", get(bench_status))
        .route("/bench/logs", get(bench_logs))
        .route("/bench/results", get(bench_results))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Reject requests whose API key header does not match the configured key.
async fn require_api_key(
    State(state): State<AgentState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.get().api_key.clone();
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if presented == Some(expected.as_str()) {
        next.run(request).await
    } else {
        error_response(StatusCode::UNAUTHORIZED, "invalid or missing API key")
    }
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
        .into_response()
}

fn ok_response() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn health(State(state): State<AgentState>) -> Response {
    let config = state.config.get();
    Json(serde_json::json!({
        "status": "ok",
        "provider": config.provider,
        "inference_engine": config.engine,
        "bench_id": config.bench_id,
        "model": config.vllm.as_ref().map(|v| v.model.clone()),
    }))
    .into_response()
}

async fn engine_start(State(state): State<AgentState>) -> Response {
    let config = state.config.get();
    let Some(vllm) = config.vllm.as_ref() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "no engine configured");
    };

    let spec = engine_command(vllm, &config.benchmark.token);
    match state.engine.start(spec, &state.shutdown) {
        Ok(_) => ok_response(),
        Err(err) => {
            error!(%err, "Failed to start engine");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

async fn engine_stop(State(state): State<AgentState>) -> Response {
    state.engine.stop();
    ok_response()
}

async fn engine_status(State(state): State<AgentState>) -> Response {
    Json(serde_json::json!({ "running": state.engine.is_running() })).into_response()
}

async fn engine_logs(
    State(state): State<AgentState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    logs_response(&state.engine, &query)
}

async fn engine_results() -> Response {
    // The engine produces no result document; only the benchmark does.
    error_response(StatusCode::NOT_IMPLEMENTED, "not implemented")
}

/// Body of `POST /bench/start`: the engine instance to benchmark.
#[derive(Debug, Deserialize)]
struct BenchStartRequest {
    ip: String,
}

async fn bench_start(
    State(state): State<AgentState>,
    Json(request): Json<BenchStartRequest>,
) -> Response {
    let config = state.config.get();
    let spec = benchmark_command(&config, &request.ip);

    match state.bench.start(spec, &state.shutdown) {
        Ok(_) => ok_response(),
        Err(err) => {
            error!(%err, "Failed to start benchmark");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

async fn bench_stop(State(state): State<AgentState>) -> Response {
    state.bench.stop();
    ok_response()
}

async fn bench_status(State(state): State<AgentState>) -> Response {
    Json(serde_json::json!({ "running": state.bench.is_running() })).into_response()
}

async fn bench_logs(State(state): State<AgentState>, Query(query): Query<LogsQuery>) -> Response {
    logs_response(&state.bench, &query)
}

async fn bench_results() -> Response {
    match collect_file(METRICS_PATH).await {
        Ok(results) => Json(results).into_response(),
        Err(err) => {
            error!(%err, "Failed to collect results");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default)]
    follow: Option<String>,
}

/// Archive mode returns everything seen so far; follow mode streams the
/// live channel as server-sent events until the process exits.
fn logs_response(supervisor: &Supervisor, query: &LogsQuery) -> Response {
    if query.follow.as_deref() == Some("true") {
        let Some(rx) = supervisor.subscribe() else {
            // Process already exited (or never started): nothing to follow.
            return supervisor.archive().join("\n").into_response();
        };
        return follow_stream(rx).into_response();
    }

    supervisor.archive().join("\n").into_response()
}

fn follow_stream(
    rx: broadcast::Receiver<String>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(line) => return Some((Ok(Event::default().data(line)), rx)),
                // A lagged subscriber lost lines to the ring buffer; the
                // archive endpoint still has them.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::util::ServiceExt;

    use inferbench_config::Config;

    use super::*;

    fn test_state() -> AgentState {
        let config: Config = toml::from_str(
            r#"
            bench_id = "b1"
            provider = "aws"
            inference_engine = "vllm"
            api_key = "secret-key"

            [aws]
            region = "eu-west-3"
            cpu_instance_type = "c5.2xlarge"
            gpu_instance_type = "g5.xlarge"
            gpu_ami = "ami-gpu"
            cpu_ami = "ami-cpu"
            access_key = "AKIA"
            secret_key = "shhh"

            [vllm]
            model = "meta-llama/Llama-3.1-8B"

            [benchmark]
            token = "t"
            dataset-name = "d"
            dataset-path = "p"
            hf-revision = "main"
            hf-split = "train"
            num-prompts = 1
            seed = 1
        "#,
        )
        .unwrap();

        AgentState::new(ConfigHandle::new(config), CancellationToken::new())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_identity_without_auth() {
        let app = router(test_state());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["bench_id"], "b1");
        assert_eq!(body["model"], "meta-llama/Llama-3.1-8B");
    }

    #[tokio::test]
    async fn protected_routes_require_the_api_key() {
        let app = router(test_state());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/vllm/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_reports_idle_supervisor() {
        let app = router(test_state());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/vllm/status")
                    .header(API_KEY_HEADER, "secret-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn stop_without_a_running_process_is_benign() {
        let app = router(test_state());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/bench/stop")
                    .header(API_KEY_HEADER, "secret-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn engine_results_are_not_implemented() {
        let app = router(test_state());

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/vllm/results")
                    .header(API_KEY_HEADER, "secret-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn archived_logs_are_served_as_text() {
        let state = test_state();

        let spec = inferbench_supervisor::CommandSpec::new("/bin/sh")
            .args(["-c", "echo line-one; echo line-two"]);
        let handle = state.engine.start(spec, &state.shutdown).unwrap();
        handle.wait().await;
        while handle.subscribe().is_some() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let app = router(state);
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/vllm/logs")
                    .header(API_KEY_HEADER, "secret-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("line-one"));
        assert!(text.contains("line-two"));
    }
}
