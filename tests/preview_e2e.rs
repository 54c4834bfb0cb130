//! End-to-end preview scenarios against a real Chrome.
//!
//! These tests need `google-chrome` on PATH and are ignored by default:
//! `cargo test --test preview_e2e -- --ignored --test-threads=1`

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Html;
use flate2::read::GzDecoder;
use tower::ServiceExt;

use preview_proxy::chrome::{InstanceConfig, InstanceManager};
use preview_proxy::handlers::shell::ShellAssets;
use preview_proxy::handlers::AppState;
use preview_proxy::server::batch_router;

async fn spawn_origin(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn chrome_state() -> AppState {
    let manager = InstanceManager::new(InstanceConfig::default());
    let assets = Arc::new(ShellAssets::load(None).unwrap());
    AppState::new(manager, assets)
}

async fn preview(origin: SocketAddr) -> (StatusCode, String) {
    let app = batch_router(chrome_state());
    let request = Request::builder()
        .uri("/?req_for_preview=1")
        .header(header::HOST, origin.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    let status = response.status();
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
    let compressed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut body = String::new();
    GzDecoder::new(&compressed[..])
        .read_to_string(&mut body)
        .unwrap();
    (status, body)
}

#[tokio::test]
#[ignore = "requires google-chrome"]
async fn plain_page_renders_sanitized() {
    let origin = spawn_origin(axum::Router::new().route(
        "/",
        axum::routing::get(|| async {
            Html("<html><body><div>bar</div></body></html>")
        }),
    ))
    .await;

    let (status, body) = preview(origin).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<div>bar</div>"));
    assert!(!body.contains("<script"));
    assert!(!body.to_lowercase().contains("on*="));
}

#[tokio::test]
#[ignore = "requires google-chrome"]
async fn origin_status_is_mirrored() {
    let origin = spawn_origin(axum::Router::new().route(
        "/",
        axum::routing::get(|| async {
            (StatusCode::BAD_GATEWAY, Html("<html><body>down</body></html>"))
        }),
    ))
    .await;

    let (status, _) = preview(origin).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
#[ignore = "requires google-chrome"]
async fn scripts_and_handlers_are_stripped() {
    let origin = spawn_origin(axum::Router::new().route(
        "/",
        axum::routing::get(|| async {
            Html(
                "<html><head><script src=\"x.js\"></script></head>\
                 <body onload=\"f()\"><div>bar</div></body></html>",
            )
        }),
    ))
    .await;

    let (status, body) = preview(origin).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<div>bar</div>"));
    assert!(!body.contains("script"));
    assert!(!body.contains("onload"));
}

#[tokio::test]
#[ignore = "requires google-chrome"]
async fn stream_delivers_framed_updates() {
    use preview_proxy::dom::UpdateBatch;
    use preview_proxy::server::streaming_router;

    let origin = spawn_origin(axum::Router::new().route(
        "/",
        axum::routing::get(|| async {
            Html("<html><body><p>streamed</p></body></html>")
        }),
    ))
    .await;

    let state = chrome_state();
    let app = streaming_router(state.clone());

    // Fetch the shell page; it acquires an instance and starts navigation.
    let request = Request::builder()
        .uri("/?req_for_preview=1")
        .header(header::HOST, origin.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Dig the acquired instance ID out of the shell page.
    let compressed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut shell = String::new();
    GzDecoder::new(&compressed[..]).read_to_string(&mut shell).unwrap();
    let id: u64 = shell
        .split("PREVIEW_INSTANCE_ID = ")
        .nth(1)
        .and_then(|rest| rest.split(';').next())
        .and_then(|digits| digits.trim().parse().ok())
        .expect("shell page names its instance");

    let request = Request::builder()
        .uri(format!("/stream?id={id}"))
        .header(header::HOST, origin.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let compressed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut raw = String::new();
    GzDecoder::new(&compressed[..]).read_to_string(&mut raw).unwrap();

    let mut saw_paragraph = false;
    for frame in raw.split('\r').filter(|f| !f.is_empty()) {
        let batch: UpdateBatch = serde_json::from_str(frame).unwrap();
        for update in &batch.updates {
            assert!(!update
                .node
                .attributes
                .keys()
                .any(|k| k.to_ascii_lowercase().starts_with("on")));
            if update.node.element_type.eq_ignore_ascii_case("p") {
                saw_paragraph = true;
            }
        }
    }
    assert!(saw_paragraph);
}
