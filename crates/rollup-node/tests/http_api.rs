use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use rollup_core::{
    compute_commitment, Address, CommitBlockInfo, CommitmentEchoVerifier, Hash32, L2Op,
};
use rollup_engine::{spawn, EngineConfig, NoopPersister, RollupEngine, TokenInfo};
use rollup_node::config::parse_config;
use rollup_node::http::{router, AppState, Clock};
use rollup_node::metrics::Metrics;
use rollup_node::build_engine;
use rollup_storage::Storage;
use serde_json::{json, Value};
use tempfile::tempdir;
use tower::ServiceExt;

fn early() -> u64 {
    20
}

fn late() -> u64 {
    10_000_000
}

fn app(clock: Clock) -> Router {
    let mut engine = RollupEngine::new(
        EngineConfig::default(),
        [TokenInfo {
            token_id: 1,
            l1_address: Address([0xEE; 20]),
            decimals: 8,
        }],
        Arc::new(CommitmentEchoVerifier),
        Arc::new(CommitmentEchoVerifier),
    );
    engine
        .register(Address([1; 20]), 1, 500, 10)
        .expect("register");
    router(AppState {
        engine: spawn(engine, Arc::new(NoopPersister)),
        metrics: Some(Metrics::new().expect("metrics")),
        label: "test".to_string(),
        start_instant: Instant::now(),
        clock,
    })
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, bytes) = send(app, req).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn call_json(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let (status, body) = call(app, method, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_and_status() {
    let app = app(early);
    let (status, body) = call(&app, "GET", "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");

    let (status, _) = call(&app, "GET", "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = call_json(&app, "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["label"], "test");
    assert_eq!(json["mode"], "normal");
    assert_eq!(json["requests"]["total"], 2);
    assert_eq!(json["blocks"]["committed"], 0);
    assert_eq!(json["can_activate_evacuation"], false);
}

#[tokio::test]
async fn requests_and_blocks_are_served() {
    let app = app(early);
    let (status, json) = call_json(&app, "GET", "/requests/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["kind"], "deposit");
    assert_eq!(json["status"], "queued");
    assert_eq!(json["enqueued_at"], 10);

    let (status, json) = call_json(&app, "GET", "/requests/9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "not_found");

    let (status, json) = call_json(&app, "GET", "/blocks/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["phase"], "executed");

    let (status, _) = call_json(&app, "GET", "/blocks/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn activation_before_expiry_is_rejected() {
    let app = app(early);
    let (status, json) = call_json(&app, "POST", "/evacuation/activate").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "not_expired");

    let (_, json) = call_json(&app, "GET", "/evacuation").await;
    assert_eq!(json["mode"], "normal");
}

#[tokio::test]
async fn activation_after_expiry() {
    let app = app(late);
    let (_, json) = call_json(&app, "GET", "/evacuation").await;
    assert_eq!(json["can_activate"], true);

    let (status, json) = call_json(&app, "POST", "/evacuation/activate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["mode"], "evacuating");
    assert_eq!(json["drain_target"], 2);
    assert_eq!(json["activated_at"], late());

    let (status, json) = call_json(&app, "POST", "/evacuation/activate").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "evacu_mode_active");
}

fn claim_body(last_executed: u64) -> Value {
    let info = CommitBlockInfo {
        number: 1,
        timestamp: 1,
        new_state_root: Hash32([7; 32]),
        aux_root: Hash32::ZERO,
        public_data: L2Op::Evacuation {
            account_id: 1,
            token_id: 1,
            l2_amount: 500,
        }
        .encode(),
    };
    // Genesis has a zero state root; the echo verifier wants the commitment itself.
    let commitment = compute_commitment(Hash32::ZERO, &info).unwrap();
    json!({
        "last_executed": last_executed,
        "number": info.number,
        "timestamp": info.timestamp,
        "new_state_root": info.new_state_root.to_hex(),
        "public_data": hex::encode(&info.public_data),
        "proof": commitment.to_hex(),
    })
}

#[tokio::test]
async fn drain_and_claim_over_http() {
    let app = app(late);
    let (status, _) = call_json(&app, "POST", "/evacuation/activate").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = post_json(&app, "/evacuation/claims", claim_body(0)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "not_fully_consumed");

    let (status, json) =
        post_json(&app, "/evacuation/consume", json!({ "payloads": ["zz"] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "bad_request");

    let payloads = [
        L2Op::Register {
            account_id: 1,
            l1_address: Address([1; 20]),
        },
        L2Op::Deposit {
            account_id: 1,
            token_id: 1,
            l2_amount: 500,
        },
    ]
    .iter()
    .map(|op| hex::encode(op.encode()))
    .collect::<Vec<_>>();
    let (status, json) =
        post_json(&app, "/evacuation/consume", json!({ "payloads": payloads })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["executed"], 2);

    let (status, json) = post_json(&app, "/evacuation/claims", claim_body(5)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "last_executed_mismatch");

    let (status, json) = post_json(&app, "/evacuation/claims", claim_body(0)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["request_id"], 2);

    let (status, json) = post_json(&app, "/evacuation/claims", claim_body(0)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "already_evacuated");

    let (_, json) = call_json(&app, "GET", "/evacuation").await;
    assert_eq!(json["evacuated"], json!([{ "account_id": 1, "token_id": 1 }]));
    let (_, json) = call_json(&app, "GET", "/requests/2").await;
    assert_eq!(json["kind"], "evacuation");
    assert_eq!(json["status"], "queued");
}

#[tokio::test]
async fn metrics_reflect_counters() {
    let app = app(early);
    let (status, body) = call(&app, "GET", "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("rollup_requests_total 2"));
    assert!(text.contains("rollup_evacu_mode 0"));
}

#[test]
fn engine_is_resumed_from_storage() {
    let dir = tempdir().unwrap();
    let config = parse_config(
        r#"
[[tokens]]
token_id = 1
l1_address = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"
decimals = 8
"#,
    )
    .unwrap();
    let engine_config = config.engine.to_engine_config().unwrap();

    {
        let storage = Storage::open(dir.path()).unwrap();
        let mut engine = build_engine(&config, engine_config.clone(), &storage).unwrap();
        assert_eq!(engine.request_counters().total, 0);
        engine.register(Address([7; 20]), 1, 100, 1).unwrap();
        storage.persist(engine.state()).unwrap();
    }

    let storage = Storage::open(dir.path()).unwrap();
    let engine = build_engine(&config, engine_config, &storage).unwrap();
    assert_eq!(engine.request_counters().total, 2);
    assert_eq!(engine.account_of(&Address([7; 20])), Some(1));
}
