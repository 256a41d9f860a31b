//! Scaleway provider lifecycle tests against a mocked Instance/IAM API.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inferbench_cloud::providers::Scaleway;
use inferbench_cloud::{CloudProvider, ProviderError};
use inferbench_config::Config;

const ZONE_PATH: &str = "/instance/v1/zones/fr-par-1";

fn test_config() -> Arc<Config> {
    toml::from_str::<Config>(
        r#"
        bench_id = "b1"
        provider = "scaleway"
        inference_engine = "vllm"
        api_key = "k"

        [scaleway]
        zone = "fr-par-1"
        project_id = "proj-1"
        organization_id = "org-1"
        access_key = "SCWXXX"
        secret_key = "deadbeef"
        cpu_commercial_type = "DEV1-L"
        gpu_commercial_type = "H100-1-80G"
        base_commercial_type = "DEV1-S"
        base_image = "ubuntu_noble"

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

async fn ready_provider(server: &MockServer) -> Scaleway {
    let mut provider = Scaleway::new(test_config(), CancellationToken::new())
        .unwrap()
        .with_base_url(server.uri());
    provider.init().await.unwrap();
    provider
}

fn server_json(id: &str, state: &str, tags: Vec<&str>, ip: Option<&str>) -> serde_json::Value {
    let mut server = serde_json::json!({
        "id": id,
        "name": format!("benchmark-b1-{id}"),
        "zone": "fr-par-1",
        "state": state,
        "commercial_type": "DEV1-S",
        "tags": tags,
        "volumes": { "0": { "id": format!("vol-{id}") } }
    });
    if let Some(ip) = ip {
        server["public_ip"] = serde_json::json!({ "id": "ip-1", "address": ip });
        server["public_ips"] = serde_json::json!([{ "id": "ip-1", "address": ip }]);
    }
    server
}

#[tokio::test]
async fn create_provisions_tags_and_powers_on_both_servers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/servers")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "server": server_json("srv-1", "stopped", vec!["bench-id/b1"], None)
        })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(format!("{ZONE_PATH}/volumes/vol-srv-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path(format!("{ZONE_PATH}/servers/srv-1/user_data/cloud-init")))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/servers/srv-1/action")))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    provider.create().await.unwrap();
}

#[tokio::test]
async fn destroy_deletes_servers_then_volumes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/servers")))
        .and(query_param("tags", "bench-id/b1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "servers": [server_json("srv-1", "running", vec!["bench-id/b1"], Some("51.15.0.7"))]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/volumes")))
        .and(query_param("tags", "bench-id/b1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "volumes": [{ "id": "vol-9", "tags": ["bench-id/b1"] }]
        })))
        .mount(&server)
        .await;

    // Running server is powered off, observed stopped, then deleted.
    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/servers/srv-1/action")))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/servers/srv-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "server": server_json("srv-1", "stopped", vec!["bench-id/b1"], None)
        })))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("{ZONE_PATH}/servers/srv-1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("{ZONE_PATH}/volumes/vol-9")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    provider.destroy().await.unwrap();
}

#[tokio::test]
async fn destroy_without_resources_fails_loudly() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/servers")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "servers": [] })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/volumes")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "volumes": [] })),
        )
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    let err = provider.destroy().await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_role_tags_surface_an_ambiguity_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/servers")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "servers": [
                server_json("srv-1", "running", vec!["bench-id/b1", "benchmark-role/llm"], Some("51.15.0.7")),
                server_json("srv-2", "running", vec!["bench-id/b1", "benchmark-role/llm"], Some("51.15.0.8"))
            ]
        })))
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    let err = provider.llm_instance_ip().await.unwrap_err();
    assert!(matches!(err, ProviderError::AmbiguousRole { count: 2, .. }));
}

/// A failure in the middle of the image pipeline (here: the SSH setup
/// session cannot be established) must still delete the ephemeral key and
/// the template server.
#[tokio::test]
async fn failed_image_build_cleans_up_key_and_template_server() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/iam/v1alpha1/ssh-keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "key-1",
            "name": "benchmark-key-pair"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/servers")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "server": server_json("srv-t", "stopped", vec![], None)
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Poweron, later terminate: two actions on the template server.
    Mock::given(method("POST"))
        .and(path(format!("{ZONE_PATH}/servers/srv-t/action")))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({})))
        .expect(2)
        .mount(&server)
        .await;

    // The template reports running on 127.0.0.1, where no setup session
    // can be established in this test.
    Mock::given(method("GET"))
        .and(path(format!("{ZONE_PATH}/servers/srv-t")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "server": server_json("srv-t", "running", vec![], Some("127.0.0.1"))
        })))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/iam/v1alpha1/ssh-keys/key-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ready_provider(&server).await;
    let err = provider.create_llm_image().await.unwrap_err();
    assert!(matches!(err, ProviderError::Remote(_)));
}
