//! Router-level tests driving the full service stack: event ingest,
//! registration, read queries and the failure envelopes.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

use wallet_api::{router, ApiContext};
use wallet_indexer::config::IndexerConfig;
use wallet_indexer::db::codec::{WalletRow, WalletStatus};
use wallet_indexer::db::Ledger;
use wallet_indexer::derive::{AddressDeriver, HashDeriver};
use wallet_indexer::materializer::WalletMaterializer;
use wallet_indexer::projector::TxProjector;
use wallet_indexer::runtime::spawn_projector;

const BLOCK_REWARD: u64 = 6400;
const XPUB: &str = "xpub6apitest";

struct Fixture {
    _dir: TempDir,
    app: Router,
    ledger: Arc<Ledger>,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(Ledger::open(&dir.path().join("indexer.redb")).unwrap());
    let projector = spawn_projector(TxProjector::new(Arc::clone(&ledger), 1));
    let materializer = Arc::new(WalletMaterializer::new(Arc::clone(&ledger), Arc::new(HashDeriver)));
    let context = ApiContext {
        ledger: Arc::clone(&ledger),
        materializer,
        projector,
        config: Arc::new(IndexerConfig::default()),
    };
    Fixture { _dir: dir, app: router(context), ledger }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn derived(index: u32) -> String {
    HashDeriver.derive(XPUB, index, 1).unwrap()[0].address.clone()
}

/// Hex rendering of the `TxId([tag; 32])` ids used across the scenarios.
fn hex_tag(tag: u8) -> String {
    format!("{tag:02x}").repeat(32)
}

fn block_event(tag: u8, height: u32, address: &str) -> Value {
    json!({
        "version": 0,
        "tx_id": hex_tag(tag),
        "timestamp": 1_000 + u32::from(tag),
        "height": height,
        "outputs": [
            { "value": BLOCK_REWARD, "token": "00", "decoded": { "address": address } }
        ],
    })
}

async fn project_chain(app: &Router) {
    for (tag, height, address) in [
        (1u8, 1u32, derived(0)),
        (2, 2, derived(0)),
        (3, 3, "foreign1".to_string()),
    ] {
        let (status, body) = post(app, "/event", block_event(tag, height, &address)).await;
        assert_eq!(status, StatusCode::OK, "block {tag}: {body}");
    }
    let spend = json!({
        "version": 1,
        "tx_id": hex_tag(4),
        "timestamp": 1_004,
        "inputs": [{
            "tx_id": hex_tag(1),
            "index": 0,
            "value": BLOCK_REWARD,
            "token": "00",
            "decoded": { "address": derived(0) },
        }],
        "outputs": [
            { "value": 5, "token": "00", "decoded": { "address": derived(2) } },
            { "value": 6395, "token": "00", "decoded": { "address": "foreign2" } },
        ],
    });
    let (status, body) = post(app, "/event", spend).await;
    assert_eq!(status, StatusCode::OK, "spend: {body}");
}

async fn register_and_wait(app: &Router) -> String {
    let (status, body) = post(app, "/wallet", json!({ "xpubkey": XPUB })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    // Materialization is dispatched, so the response may already be ready.
    let state = body["status"]["status"].as_str().unwrap();
    assert!(state == "creating" || state == "ready", "unexpected state {state}");
    let wallet_id = body["status"]["walletId"].as_str().unwrap().to_string();

    for _ in 0..200 {
        let (_, body) = get(app, &format!("/wallet?id={wallet_id}")).await;
        if body["status"]["status"] == json!("ready") {
            assert!(body["status"]["readyAt"].is_u64());
            return wallet_id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("wallet never became ready");
}

#[tokio::test(flavor = "multi_thread")]
async fn end_to_end_projection_and_wallet_queries() {
    let fixture = fixture();
    project_chain(&fixture.app).await;
    let wallet_id = register_and_wait(&fixture.app).await;

    let (status, body) = get(&fixture.app, &format!("/wallet/addresses?id={wallet_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let addresses = body["addresses"].as_array().unwrap();
    assert_eq!(addresses.len(), 23);
    assert_eq!(addresses[0]["address"], json!(derived(0)));
    assert_eq!(addresses[0]["transactions"], json!(3));

    let (status, body) = get(&fixture.app, &format!("/wallet/balances?id={wallet_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let balances = body["balances"].as_array().unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0]["tokenId"], json!("00"));
    assert_eq!(balances[0]["balance"]["unlocked"], json!(BLOCK_REWARD + 5));
    assert_eq!(balances[0]["balance"]["locked"], json!(0));
    assert_eq!(balances[0]["transactions"], json!(3));

    let (status, body) = get(&fixture.app, &format!("/wallet/history?id={wallet_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0]["txId"], json!(hex_tag(4)));
    assert_eq!(history[0]["balance"], json!(-6395));

    // Pagination over a timestamp-descending history.
    let (status, body) =
        get(&fixture.app, &format!("/wallet/history?id={wallet_id}&skip=1&count=1")).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["txId"], json!(hex_tag(2)));
    assert_eq!(body["skip"], json!(1));
    assert_eq!(body["count"], json!(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn validation_failures_are_http_200_envelopes() {
    let fixture = fixture();

    let (status, body) = get(&fixture.app, "/wallet/addresses").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("missing-parameter"));
    assert_eq!(body["parameter"], json!("id"));

    let (status, body) = get(&fixture.app, "/wallet/history?id=abc&skip=many").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("invalid-parameter"));
    assert_eq!(body["parameter"], json!("skip"));

    let (status, body) = get(&fixture.app, "/wallet?id=missing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("wallet-not-found"));
}

#[tokio::test(flavor = "multi_thread")]
async fn queries_against_a_creating_wallet_are_rejected() {
    let fixture = fixture();
    let batch = fixture.ledger.begin_write().unwrap();
    batch
        .insert_wallet(
            "w-creating",
            &WalletRow {
                xpubkey: "xpubpending".to_string(),
                status: WalletStatus::Creating,
                max_gap: 20,
                created_at: 0,
                ready_at: None,
            },
        )
        .unwrap();
    batch.commit().unwrap();

    for uri in [
        "/wallet/addresses?id=w-creating",
        "/wallet/balances?id=w-creating",
        "/wallet/history?id=w-creating",
    ] {
        let (status, body) = get(&fixture.app, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], json!("wallet-not-ready"), "{uri}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_registration_is_rejected() {
    let fixture = fixture();
    register_and_wait(&fixture.app).await;

    let (status, body) = post(&fixture.app, "/wallet", json!({ "xpubkey": XPUB })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("wallet-already-created"));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_registration_bodies_are_rejected() {
    let fixture = fixture();

    let (status, body) = post(&fixture.app, "/wallet", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("missing-parameter"));
    assert_eq!(body["parameter"], json!("xpubkey"));

    let (status, body) = post(&fixture.app, "/wallet", json!({ "xpubkey": "   " })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("missing-parameter"));

    let (status, body) = post(&fixture.app, "/wallet", json!({ "xpubkey": "not an xpub!" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("invalid-parameter"));
    assert_eq!(body["parameter"], json!("xpubkey"));

    let request = Request::builder()
        .method("POST")
        .uri("/wallet")
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(&fixture.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], json!("invalid-body"));
}

#[tokio::test(flavor = "multi_thread")]
async fn double_spends_surface_as_chain_inconsistencies() {
    let fixture = fixture();
    project_chain(&fixture.app).await;

    let replay = json!({
        "version": 1,
        "tx_id": hex_tag(9),
        "timestamp": 1_009,
        "inputs": [{
            "tx_id": hex_tag(1),
            "index": 0,
            "value": BLOCK_REWARD,
            "token": "00",
            "decoded": { "address": derived(0) },
        }],
        "outputs": [
            { "value": BLOCK_REWARD, "token": "00", "decoded": { "address": "foreign3" } }
        ],
    });
    let (status, body) = post(&fixture.app, "/event", replay).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("inconsistent-chain"));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_events_are_accepted_as_noops() {
    let fixture = fixture();
    let event = block_event(1, 1, "address1");
    let (status, _) = post(&fixture.app, "/event", event.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = post(&fixture.app, "/event", event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let snapshot = fixture.ledger.begin_read().unwrap();
    let row = snapshot.address_balance("address1", "00").unwrap().unwrap();
    assert_eq!(row.transactions, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_endpoint_reports_ok() {
    let fixture = fixture();
    let (status, body) = get(&fixture.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}
