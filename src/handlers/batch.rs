//! Batch preview: render, wait for stabilization, sanitize, gzip.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{error, info};
use url::Url;

use super::proxy::{absolute_url, bad_request, gateway_error, is_preview_request, passthrough};
use super::stream::EMULATION_VIRTUAL_TIME_BUDGET_EXPIRED;
use super::AppState;
use crate::chrome::BrowserError;
use crate::handlers::encoding::gzip_bytes;
use crate::sanitize::sanitize;

/// Serves every path of the batch proxy. Preview requests render the page
/// server-side; everything else proxies through untouched.
pub async fn handle(State(state): State<AppState>, req: Request) -> Response {
    let Some(url) = absolute_url(&req) else {
        return bad_request();
    };
    info!("[batch] handling request for {url}");

    if !is_preview_request(&url) {
        return passthrough(&state.http, url).await;
    }

    // The rendered body replaces the origin's, but the status code should
    // still mirror the origin. Fetch it in parallel with the render.
    let status_fetch = {
        let client = state.http.clone();
        let url = url.clone();
        tokio::spawn(async move {
            match client.get(url.as_str()).send().await {
                Ok(response) => StatusCode::from_u16(response.status().as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY),
                Err(_) => StatusCode::BAD_GATEWAY,
            }
        })
    };

    let id = match state.manager.acquire(url.as_str()).await {
        Ok(id) => id,
        Err(e) => {
            error!("failed to acquire a renderer: {e}");
            return gateway_error();
        }
    };

    let rendered = render(&state, id, &url).await;

    // The batch handler owns its instance end to end: terminate, then drop
    // the pool entry, on every exit path.
    if let Ok(instance) = state.manager.get(id) {
        instance.disconnect_and_terminate().await;
    }
    state.manager.release(id);

    let body = match rendered {
        Ok(body) => body,
        Err(e) => {
            error!("preview render of {url} failed: {e}");
            return gateway_error();
        }
    };

    let compressed = match gzip_bytes(body.as_bytes()) {
        Ok(compressed) => compressed,
        Err(e) => {
            error!("gzip failed: {e}");
            return gateway_error();
        }
    };

    let status = status_fetch.await.unwrap_or(StatusCode::BAD_GATEWAY);
    // Streamed so no Content-Length is set; the sanitized length has
    // nothing to do with the origin's.
    let body = Body::from_stream(futures::stream::once(async move {
        Ok::<_, std::io::Error>(Bytes::from(compressed))
    }));
    (
        status,
        [(header::CONTENT_ENCODING, "gzip")],
        body,
    )
        .into_response()
}

/// Drives one pooled instance through navigation and stabilization and
/// returns the sanitized document.
async fn render(state: &AppState, id: u64, url: &Url) -> Result<String, BrowserError> {
    let instance = state.manager.get(id)?;
    instance.wait_until_ready().await?;
    if !instance.reset_timeout() {
        // The idle timer beat us to it; wait out the teardown so the 502
        // reflects a settled state.
        instance.disconnect_and_terminate().await;
        return Err(BrowserError::InstanceGone);
    }

    instance.navigate(url.as_str()).await?;

    // The budget expiry is the one and only stabilization signal; every
    // other event is irrelevant here.
    while let Some(event) = instance.next_event().await {
        if event.method == EMULATION_VIRTUAL_TIME_BUDGET_EXPIRED {
            break;
        }
    }

    let html = instance.get_outer_html().await?;
    Ok(sanitize(&html))
}
