mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use closure_exec::web::{ApiState, closure_router};
use common::{Harness, eventually, harness};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(h: &Harness) -> axum::Router {
    closure_router(ApiState::new(h.controller.clone(), h.callbacks.clone()))
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn decode_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn register_echo(app: &axum::Router) {
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/definitions",
            json!({
                "link": "/definitions/sum",
                "name": "sum",
                "runtime": "echo",
                "source": "{\"y\":2}",
                "outputNames": ["y"],
                "resources": { "timeoutSeconds": 30 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn definitions_round_trip_through_the_api() {
    let h = harness();
    let app = app(&h);
    register_echo(&app).await;

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/definitions/sum"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = decode_json(response).await;
    assert_eq!(body["runtime"], json!("echo"));
    assert_eq!(body["resources"]["timeoutSeconds"], json!(30));

    let missing = app
        .oneshot(empty_request(Method::GET, "/definitions/other"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn run_executes_and_exposes_status_and_callbacks() {
    let h = harness();
    let app = app(&h);
    register_echo(&app).await;

    let mut request = json_request(
        Method::POST,
        "/closures/run",
        json!({
            "definitionRef": "/definitions/sum",
            "inputs": { "x": 1 },
            "callerCallback": { "kind": "internal", "taskLink": "/tasks/t1" }
        }),
    );
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let started = decode_json(response).await;
    assert_eq!(started["state"], json!("STARTED"));
    assert_eq!(started["endTimeMillis"], json!(0));
    let id = started["id"].as_str().unwrap().to_string();

    h.wait_for_state(&id, closure_exec::TaskStage::Finished).await;

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, &format!("/closures/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let finished = decode_json(response).await;
    assert_eq!(finished["state"], json!("FINISHED"));
    assert_eq!(finished["outputs"]["y"], json!(2));

    let probe = app.clone();
    let status_uri = format!("/request-status/{id}");
    assert!(eventually(|| {
        let probe = probe.clone();
        let uri = status_uri.clone();
        async move {
            let response = probe.oneshot(empty_request(Method::GET, &uri)).await.unwrap();
            response.status() == StatusCode::OK
                && decode_json(response).await["subStage"] == json!("COMPLETED")
        }
    })
    .await);

    let probe = app.clone();
    assert!(eventually(|| {
        let probe = probe.clone();
        async move {
            let response = probe
                .oneshot(empty_request(Method::GET, "/tasks/t1"))
                .await
                .unwrap();
            decode_json(response).await.as_array().is_some_and(|items| items.len() == 1)
        }
    })
    .await);

    let again = app
        .oneshot(empty_request(Method::POST, &format!("/closures/{id}/start")))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(decode_json(again).await["code"], json!("conflict"));
}

#[tokio::test]
async fn create_append_and_patch_follow_the_state_machine() {
    let h = harness();
    let app = app(&h);
    register_echo(&app).await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/closures",
            json!({ "definitionRef": "/definitions/sum" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = decode_json(response).await;
    assert_eq!(created["state"], json!("CREATED"));
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::PUT,
            &format!("/closures/{id}"),
            json!({ "inputs": { "x": 41 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let appended = decode_json(response).await;
    assert_eq!(appended["inputs"]["x"], json!(41));
    assert_eq!(appended["state"], json!("CREATED"));

    let response = app
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/closures/{id}"),
            json!({ "state": "FINISHED" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(decode_json(response).await["code"], json!("illegal_transition"));

    let response = app
        .oneshot(json_request(
            Method::PATCH,
            &format!("/closures/{id}"),
            json!({ "taskInfo": { "stage": "FAILED", "failure": "quota exceeded" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let failed = decode_json(response).await;
    assert_eq!(failed["state"], json!("FAILED"));
    assert_eq!(failed["errorMessage"], json!("quota exceeded"));
    assert_eq!(failed["customProperties"]["failed_on_deployment"], json!("true"));
}

#[tokio::test]
async fn invalid_requests_map_to_client_errors() {
    let h = harness();
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/closures/run",
            json!({ "definitionRef": "/definitions/unknown" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(decode_json(response).await["code"], json!("validation_error"));

    let response = app
        .clone()
        .oneshot(empty_request(Method::GET, "/closures/nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(empty_request(Method::GET, "/request-status/nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stale_token_patch_is_rejected_over_http() {
    let h = harness();
    let app = app(&h);
    h.define(common::hanging_definition("/definitions/slow", 30)).await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/closures/run",
            json!({ "definitionRef": "/definitions/slow" }),
        ))
        .await
        .unwrap();
    let id = decode_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(json_request(
            Method::PATCH,
            &format!("/closures/{id}"),
            json!({ "state": "FINISHED", "concurrencyToken": "stale" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(decode_json(response).await["code"], json!("concurrency_violation"));
    assert_eq!(h.closure(&id).await.state, closure_exec::TaskStage::Started);
}

#[tokio::test]
async fn request_status_follows_the_instance_tracker_link() {
    let h = harness();
    let app = app(&h);
    register_echo(&app).await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/closures",
            json!({
                "definitionRef": "/definitions/sum",
                "requestTrackerLink": "/request-status/custom-1"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = decode_json(response).await["id"].as_str().unwrap().to_string();

    let tracker = h.tracker.clone();
    assert!(eventually(|| {
        let tracker = tracker.clone();
        async move {
            use closure_exec::notify::RequestTracker;
            tracker.get_status("/request-status/custom-1").await.is_ok_and(|s| s.is_some())
        }
    })
    .await);

    let response = app
        .oneshot(empty_request(Method::GET, &format!("/request-status/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = decode_json(response).await;
    assert_eq!(status["closureId"], json!(id));
    assert_eq!(status["subStage"], json!("CREATED"));
}
