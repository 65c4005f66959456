//! `CamundaClient` against a mock engine.

#![allow(clippy::unwrap_used)]

use bpm_connector_camunda::CamundaClient;
use bpm_connector_core::engine::{EngineError, ProcessEngine, TypedValue, VariableSet};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn object_variables() -> serde_json::Value {
    json!({
        "order": {
            "type": "Object",
            "value": "{\"amount\":10,\"currency\":\"EUR\"}",
            "valueInfo": {
                "objectTypeName": "java.util.HashMap",
                "serializationDataFormat": "application/json"
            }
        },
        "approved": { "type": "Boolean", "value": false, "valueInfo": {} }
    })
}

#[tokio::test]
async fn fetch_returns_values_unmodified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/engine-rest/process-instance/proc-1/variables"))
        .and(query_param("deserializeValues", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(object_variables()))
        .expect(1)
        .mount(&server)
        .await;

    let client = CamundaClient::new(format!("{}/engine-rest", server.uri()));
    let fetch = client.fetch_variables("proc-1").await.unwrap();

    assert!(fetch.is_success());
    let variables = fetch.variables.unwrap();
    assert_eq!(serde_json::to_value(&variables).unwrap(), object_variables());
    assert_eq!(
        variables["order"].value,
        json!("{\"amount\":10,\"currency\":\"EUR\"}")
    );
}

#[tokio::test]
async fn fetch_not_found_surfaces_engine_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/process-instance/proc-1/variables"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({
                "type": "InvalidRequestException",
                "message": "instance not found"
            })),
        )
        .mount(&server)
        .await;

    let client = CamundaClient::new(server.uri());
    let fetch = client.fetch_variables("proc-1").await.unwrap();

    assert_eq!(fetch.status, 404);
    assert!(fetch.variables.is_none());
    assert_eq!(fetch.failure_reason(), "instance not found");
}

#[tokio::test]
async fn fetch_failure_without_body_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = CamundaClient::new(server.uri());
    let fetch = client.fetch_variables("proc-1").await.unwrap();

    assert_eq!(fetch.status, 500);
    assert_eq!(fetch.failure_reason(), "Request error");
}

#[tokio::test]
async fn fetch_with_undecodable_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = CamundaClient::new(server.uri());
    let result = client.fetch_variables("proc-1").await;

    assert!(matches!(result, Err(EngineError::ResponseParseFailed(_))));
}

#[tokio::test]
async fn unreachable_engine_is_a_request_error() {
    let client = CamundaClient::new("http://127.0.0.1:9");
    let result = client.fetch_variables("proc-1").await;

    assert!(matches!(result, Err(EngineError::RequestFailed(_))));
}

#[tokio::test]
async fn update_posts_modifications() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/process-instance/proc-1/variables"))
        .and(body_json(json!({
            "modifications": {
                "approved": { "value": true, "type": "Boolean" },
                "rabbitCorrelationId": { "value": "abc", "type": "String" }
            }
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut modifications = VariableSet::new();
    modifications.insert("approved".to_string(), TypedValue::boolean(true));
    modifications.insert("rabbitCorrelationId".to_string(), TypedValue::string("abc"));

    let client = CamundaClient::new(server.uri());
    client.update_variables("proc-1", modifications).await.unwrap();
}

#[tokio::test]
async fn rejected_update_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({
                "type": "InvalidRequestException",
                "message": "Cannot modify variables"
            })),
        )
        .mount(&server)
        .await;

    let client = CamundaClient::new(server.uri());
    let result = client.update_variables("proc-1", VariableSet::new()).await;

    assert_eq!(
        result,
        Err(EngineError::Api {
            status: 400,
            message: Some("Cannot modify variables".to_string()),
        })
    );
}

#[tokio::test]
async fn instance_id_cannot_reach_another_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/process-definition/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let client = CamundaClient::new(server.uri());
    let fetch = client
        .fetch_variables("../process-definition/secret?")
        .await
        .unwrap();

    assert!(!fetch.is_success());
    assert_eq!(fetch.status, 404);
    assert!(fetch.variables.is_none());
}

#[tokio::test]
async fn dot_segment_instance_id_is_never_sent() {
    let server = MockServer::start().await;

    let client = CamundaClient::new(server.uri());
    let result = client.fetch_variables("..").await;

    assert_eq!(
        result,
        Err(EngineError::InvalidProcessInstanceId("..".to_string()))
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}
