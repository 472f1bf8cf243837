use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use sonic_barcode::campaign::{CampaignClient, CampaignDraft, CampaignId};
use sonic_barcode::config::WatermarkDefaults;
use sonic_barcode::error::StoreError;

type Store = Arc<Mutex<Vec<Value>>>;

async fn list_campaigns(State(store): State<Store>) -> impl IntoResponse {
    let campaigns = store.lock().unwrap().clone();
    Json(Value::Array(campaigns))
}

async fn create_campaign(State(store): State<Store>, Json(mut body): Json<Value>) -> impl IntoResponse {
    let mut campaigns = store.lock().unwrap();
    body["id"] = json!(campaigns.len() as i64 + 1);
    campaigns.push(body.clone());
    (StatusCode::CREATED, Json(body))
}

async fn broken() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "database is down")
}

/// Helper to start a stub Campaign Store on an ephemeral port.
///
/// `/campaigns` behaves like the real store; `/broken/campaigns` always fails.
async fn start_stub_store(seed: Vec<Value>) -> (String, Store) {
    let store: Store = Arc::new(Mutex::new(seed));
    let app = Router::new()
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route("/broken/campaigns", get(broken).post(broken))
        .with_state(store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), store)
}

fn draft() -> CampaignDraft {
    CampaignDraft::new("Summer Sale", "Acme")
        .with_timestamp_seconds(5.0)
        .with_frequency_hz(18_800.0)
        .with_redirect_url("https://acme.example/summer")
}

#[tokio::test]
async fn create_then_list_round_trips() {
    let (base, store) = start_stub_store(Vec::new()).await;

    let (created, listed) = tokio::task::spawn_blocking(move || {
        let client = CampaignClient::new(&base).unwrap();
        let created = client.create(&draft()).unwrap();
        let listed = client.list().unwrap();
        (created, listed)
    })
    .await
    .unwrap();

    assert_eq!(created.id, CampaignId::Number(1));
    assert_eq!(created.draft, draft());
    assert_eq!(listed, vec![created]);

    // The store saw form-style string values
    let raw = store.lock().unwrap()[0].clone();
    assert_eq!(raw["timestamp"], "5");
    assert_eq!(raw["frequency"], "18800");
    assert!(raw.get("barcodeId").is_none());
}

#[tokio::test]
async fn list_accepts_records_from_other_clients() {
    let seed = vec![
        json!({"id": "abc", "title": "Launch", "brand": "Acme", "barcodeId": "",
               "timestamp": "12.5", "frequency": "19000", "url": "https://acme.example"}),
        json!({"id": 9, "title": "Promo", "brand": "Beta", "barcodeId": "P-9",
               "timestamp": 3, "frequency": 18500, "url": "https://beta.example"}),
    ];
    let (base, _) = start_stub_store(seed).await;

    let (listed, found) = tokio::task::spawn_blocking(move || {
        let client = CampaignClient::new(&base).unwrap();
        (client.list().unwrap(), client.find("9").unwrap())
    })
    .await
    .unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id.to_string(), "abc");
    assert_eq!(listed[0].draft.barcode_id(), None);
    assert_eq!(listed[1].draft.barcode_id(), Some("P-9"));

    let spec = found.watermark_spec(&WatermarkDefaults::default());
    assert_eq!(spec.frequency_hz, 18_500.0);
    assert_eq!(spec.start_time_seconds, 3.0);
}

#[tokio::test]
async fn store_failures_are_reported() {
    let (base, store) = start_stub_store(Vec::new()).await;

    let (list_err, create_err, missing, invalid, rejected) = tokio::task::spawn_blocking(move || {
        let broken = CampaignClient::new(&format!("{}/broken", base)).unwrap();
        let working = CampaignClient::new(&base).unwrap();
        (
            broken.list().unwrap_err(),
            broken.create(&draft()).unwrap_err(),
            working.find("42").unwrap_err(),
            working.create(&draft().with_title("")).unwrap_err(),
            vec![
                working.create(&draft().with_brand("  ")).unwrap_err(),
                working
                    .create(&draft().with_redirect_url("ftp://acme.example/summer"))
                    .unwrap_err(),
            ],
        )
    })
    .await
    .unwrap();

    assert!(matches!(
        list_err,
        StoreError::Status { status: 500, ref body } if body == "database is down"
    ));
    assert!(matches!(create_err, StoreError::Status { status: 500, .. }));
    assert!(matches!(missing, StoreError::NotFound(ref id) if id == "42"));
    assert!(matches!(invalid, StoreError::InvalidCampaign(_)));
    for err in &rejected {
        assert!(matches!(err, StoreError::InvalidCampaign(_)), "got {err:?}");
    }

    // Invalid drafts never reach the store
    assert!(store.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_store_is_a_transport_error() {
    // Bind and immediately drop a listener to get a port nobody serves
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = tokio::task::spawn_blocking(move || {
        CampaignClient::new(&format!("http://{}", addr))
            .unwrap()
            .list()
            .unwrap_err()
    })
    .await
    .unwrap();
    assert!(matches!(err, StoreError::Http(_)));
}
