//! HTTP gateway tests driven through the router without a listener.

mod common;

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use hcd_blocks::blocks::address::BlockAddress;
use hcd_blocks::blocks::codec::{Algorithm, Codec};
use hcd_blocks::blocks::service::BlockService;
use hcd_blocks::server::gateway::{build_router, AppState, PutBlockResponse};
use hcd_blocks::store::{BlockStore, MemoryBlockStore};

use common::{start, test_config};

fn router(service: &BlockService) -> Router {
    build_router(Arc::new(AppState {
        materializer: service.materializer().clone(),
        config: Arc::new(test_config(3)),
        start_time: Instant::now(),
    }))
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_put_then_get_block() {
    let store = Arc::new(MemoryBlockStore::new());
    let service = start(&test_config(3), store.clone());
    let app = router(&service);

    let response = app
        .clone()
        .oneshot(
            Request::post("/block?algorithm=zlib")
                .body(Body::from("hello gateway"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let put: PutBlockResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(put.algorithm, Algorithm::Zlib);
    assert_eq!(put.size, 13);

    let address: BlockAddress = put.address.parse().unwrap();
    assert_eq!(address, BlockAddress::for_content(b"hello gateway"));
    assert_ne!(store.raw(&address).unwrap(), b"hello gateway");

    let response = app
        .oneshot(
            Request::get(format!("/block/{address}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.ipld.raw"
    );
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(body_bytes(response).await, b"hello gateway");

    service.shutdown().await;
}

#[tokio::test]
async fn test_get_serves_precompressed_block() {
    let store = Arc::new(MemoryBlockStore::new());
    let address = BlockAddress::for_content(b"stored elsewhere");
    let encoded = Codec::default()
        .encode(b"stored elsewhere", Algorithm::Snappy)
        .unwrap();
    store.write(&address, &encoded).await.unwrap();

    let service = start(&test_config(3), store);
    let response = router(&service)
        .oneshot(
            Request::get(format!("/block/{address}?filename=doc.txt"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"doc.txt\""
    );
    assert_eq!(body_bytes(response).await, b"stored elsewhere");
    service.shutdown().await;
}

#[tokio::test]
async fn test_unknown_block_is_not_found() {
    let service = start(&test_config(3), Arc::new(MemoryBlockStore::new()));
    let missing = BlockAddress::for_content(b"missing");
    let response = router(&service)
        .oneshot(
            Request::get(format!("/block/{missing}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    service.shutdown().await;
}

#[tokio::test]
async fn test_malformed_address_is_bad_request() {
    let service = start(&test_config(3), Arc::new(MemoryBlockStore::new()));
    let response = router(&service)
        .oneshot(Request::get("/block/not-hex").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    service.shutdown().await;
}

#[tokio::test]
async fn test_unknown_algorithm_is_bad_request() {
    let service = start(&test_config(3), Arc::new(MemoryBlockStore::new()));
    let response = router(&service)
        .oneshot(
            Request::post("/block?algorithm=brotli")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    service.shutdown().await;
}

#[tokio::test]
async fn test_stats_reflect_reads() {
    let service = start(&test_config(3), Arc::new(MemoryBlockStore::new()));
    let m = service.materializer().clone();
    let address = m.put(b"counted", Algorithm::Zstd).await.unwrap().address;
    m.get(&address).await.unwrap();
    m.get(&address).await.unwrap();

    let response = router(&service)
        .oneshot(Request::get("/v1/blocks/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(stats["reads"]["cold"], 2);
    assert_eq!(stats["classifier"]["cold_entries"], 1);
    assert_eq!(stats["promotion_threshold"], 3);
    assert_eq!(stats["promotions_enqueued"], 0);
    service.shutdown().await;
}

#[tokio::test]
async fn test_metrics_and_health() {
    let service = start(&test_config(3), Arc::new(MemoryBlockStore::new()));
    let app = router(&service);

    let response = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("hcd_blocks_classifier_entries"));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health["status"], "ok");
    service.shutdown().await;
}
