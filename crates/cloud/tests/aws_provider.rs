//! AWS provider lifecycle tests against a mocked EC2/IAM API.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inferbench_cloud::{CloudProvider, ProviderError};
use inferbench_cloud::providers::Aws;
use inferbench_config::Config;

fn test_config() -> Arc<Config> {
    toml::from_str::<Config>(
        r#"
        bench_id = "b1"
        provider = "aws"
        inference_engine = "vllm"
        api_key = "k"

        [aws]
        region = "eu-west-3"
        cpu_instance_type = "c5.2xlarge"
        gpu_instance_type = "g5.xlarge"
        gpu_ami = "ami-gpu"
        cpu_ami = "ami-cpu"
        access_key = "AKIA"
        secret_key = "shhh"

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
    .unwrap()
    .into()
}

async fn ready_provider(server: &MockServer) -> Aws {
    let mut provider = Aws::new(test_config(), CancellationToken::new())
        .unwrap()
        .with_endpoint(server.uri());
    provider.init().await.unwrap();
    provider
}

fn instance_json(id: &str, state: &str, role: &str, ip: Option<&str>) -> serde_json::Value {
    let mut instance = serde_json::json!({
        "InstanceId": id,
        "InstanceType": "g5.xlarge",
        "State": { "Name": state },
        "Tags": [
            { "Key": "bench-id", "Value": "b1" },
            { "Key": "benchmark-role", "Value": role },
            { "Key": "Name", "Value": "benchmark-b1" }
        ]
    });
    if let Some(ip) = ip {
        instance["PublicIpAddress"] = serde_json::json!(ip);
    }
    instance
}

fn describe_response(instances: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "Reservations": [{ "Instances": instances }] })
}

#[tokio::test]
async fn create_provisions_both_roles_concurrently() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Action", "GetInstanceProfile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(query_param("Action", "RunInstances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Instances": [instance_json("i-new", "pending", "llm", None)]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    provider.create().await.unwrap();
}

#[tokio::test]
async fn one_failed_create_still_runs_the_sibling_and_reports_it() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Action", "GetInstanceProfile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    // The GPU instance launches; the CPU launch is rejected.
    Mock::given(method("POST"))
        .and(query_param("Action", "RunInstances"))
        .and(body_string_contains("ami-gpu"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Instances": [instance_json("i-gpu", "pending", "llm", None)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(query_param("Action", "RunInstances"))
        .and(body_string_contains("ami-cpu"))
        .respond_with(ResponseTemplate::new(500).set_body_string("InsufficientInstanceCapacity"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    let err = provider.create().await.unwrap_err();

    match err {
        ProviderError::Partial { total, failures } => {
            assert_eq!(total, 2);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("InsufficientInstanceCapacity"));
        }
        other => panic!("expected aggregate error, got {other}"),
    }
}

#[tokio::test]
async fn destroy_without_resources_fails_loudly() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Action", "DescribeInstances"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "Reservations": [] })),
        )
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    let err = provider.destroy().await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn destroy_terminates_every_tagged_instance() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Action", "DescribeInstances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(describe_response(vec![
            instance_json("i-llm", "running", "llm", Some("3.250.0.1")),
            instance_json("i-bench", "running", "bench", Some("3.250.0.2")),
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(query_param("Action", "TerminateInstances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    provider.destroy().await.unwrap();
}

#[tokio::test]
async fn discovery_resolves_each_role_to_its_address() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Action", "DescribeInstances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(describe_response(vec![
            instance_json("i-llm", "running", "llm", Some("3.250.0.1")),
            instance_json("i-bench", "running", "bench", Some("3.250.0.2")),
        ])))
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    assert_eq!(provider.llm_instance_ip().await.unwrap(), "3.250.0.1");
    assert_eq!(provider.bench_instance_ip().await.unwrap(), "3.250.0.2");
}

#[tokio::test]
async fn duplicate_role_tags_surface_an_ambiguity_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("Action", "DescribeInstances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(describe_response(vec![
            instance_json("i-old", "running", "llm", Some("3.250.0.1")),
            instance_json("i-new", "running", "llm", Some("3.250.0.9")),
        ])))
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    let err = provider.llm_instance_ip().await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::AmbiguousRole { count: 2, .. }
    ));
}

#[tokio::test]
async fn operations_before_init_are_rejected() {
    let provider = Aws::new(test_config(), CancellationToken::new()).unwrap();
    let err = provider.llm_instance_ip().await.unwrap_err();
    assert!(matches!(err, ProviderError::NotInitialized));
}

#[tokio::test]
async fn credential_probe_uses_reversible_dry_runs() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(query_param("Action", "RunInstances"))
        .respond_with(ResponseTemplate::new(412).set_body_string(
            "Request would have succeeded, but DryRun flag is set (DryRunOperation)",
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(query_param("Action", "TerminateInstances"))
        .and(query_param("DryRun", "true"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("InvalidInstanceID.NotFound: i-123456"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    provider.validate_credentials().await.unwrap();
}
