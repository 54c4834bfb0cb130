//! Streaming shell: serves the stub page that rebuilds the document from
//! the update stream, and kicks off navigation in the background.

use std::path::Path;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use rust_embed::RustEmbed;
use tracing::{debug, error, info};
use url::Url;

use super::proxy::{
    absolute_url, bad_request, gateway_error, is_preview_request, passthrough, query_param,
};
use super::AppState;
use crate::handlers::encoding::gzip_bytes;

/// Requests whose URL contains this marker block until the identified
/// instance finishes its page load. The shell page references such a script
/// so its `onload` cannot fire before the stream has delivered the page.
pub const SLOW_SCRIPT_MARKER: &str = "slow_script_for_blocking_streaming_hd_previews.js";

const TEMPLATE_FILENAME: &str = "template.html";
const BUNDLE_FILENAME: &str = "streaming_hdp.js";

/// Compiled-in copies of the shell assets.
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// The shell template and the client JS bundle, loaded at startup.
pub struct ShellAssets {
    template: String,
    bundle: String,
}

impl ShellAssets {
    /// Loads assets from `static_dir` when given, falling back to the
    /// embedded copies for any file not found there.
    pub fn load(static_dir: Option<&Path>) -> std::io::Result<Self> {
        Ok(Self {
            template: load_asset(static_dir, TEMPLATE_FILENAME)?,
            bundle: load_asset(static_dir, BUNDLE_FILENAME)?,
        })
    }

    /// Renders the shell page for one acquired instance.
    pub fn render_shell(&self, host: &str, id: u64) -> String {
        self.template
            .replace("{{host}}", host)
            .replace("{{id}}", &id.to_string())
            .replace("{{bundle}}", &self.bundle)
    }
}

fn load_asset(static_dir: Option<&Path>, name: &str) -> std::io::Result<String> {
    if let Some(dir) = static_dir {
        let path = dir.join(name);
        if path.exists() {
            return std::fs::read_to_string(path);
        }
    }
    let embedded = StaticAssets::get(name).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("embedded asset {name} missing"),
        )
    })?;
    String::from_utf8(embedded.data.into_owned())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Serves every path of the streaming proxy except `/stream`.
pub async fn handle(State(state): State<AppState>, req: Request) -> Response {
    let Some(url) = absolute_url(&req) else {
        return bad_request();
    };
    info!("[shell] handling request for {url}");

    if url.as_str().contains(SLOW_SCRIPT_MARKER) {
        return handle_slow_script(&state, &url).await;
    }

    if !is_preview_request(&url) {
        return passthrough(&state.http, url).await;
    }

    let id = match state.manager.acquire(url.as_str()).await {
        Ok(id) => id,
        Err(e) => {
            error!("failed to acquire a renderer: {e}");
            return gateway_error();
        }
    };

    // Kick off navigation while the shell page travels to the client; the
    // stream endpoint picks the instance up by its ID.
    {
        let manager = state.manager.clone();
        let target = url.clone();
        tokio::spawn(async move {
            let instance = match manager.get(id) {
                Ok(instance) => instance,
                Err(e) => {
                    error!("instance {id} vanished before navigation: {e}");
                    return;
                }
            };
            debug!("waiting for chrome {id} to become ready");
            if let Err(e) = instance.wait_until_ready().await {
                error!("chrome {id} never became ready: {e}");
                return;
            }
            if !instance.reset_timeout() {
                error!("chrome {id} timed out before navigation");
                return;
            }
            if let Err(e) = instance.enable_domains(&["DOM"]).await {
                error!("enabling DOM events on chrome {id} failed: {e}");
                return;
            }
            if let Err(e) = instance.navigate(target.as_str()).await {
                error!("navigation of chrome {id} failed: {e}");
            }
        });
    }

    let page = state
        .assets
        .render_shell(url.host_str().unwrap_or_default(), id);
    let compressed = match gzip_bytes(page.as_bytes()) {
        Ok(compressed) => compressed,
        Err(e) => {
            error!("gzip failed: {e}");
            return gateway_error();
        }
    };
    let body = Body::from_stream(futures::stream::once(async move {
        Ok::<_, std::io::Error>(Bytes::from(compressed))
    }));
    (
        StatusCode::OK,
        [
            (header::CONTENT_ENCODING, "gzip"),
            (header::CONTENT_TYPE, "text/html"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

/// Blocks until the identified instance finishes loading its page, then
/// answers 200. Keeps the shell's `onload` from firing too early.
async fn handle_slow_script(state: &AppState, url: &Url) -> Response {
    let Some(id) = query_param(url, "id") else {
        error!("slow-script request without an id");
        return bad_request();
    };
    let Ok(id) = id.parse::<u64>() else {
        error!("slow-script id is not an integer");
        return bad_request();
    };

    let instance = match state.manager.get(id) {
        Ok(instance) => instance,
        Err(e) => {
            error!("slow-script lookup failed: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(e) = instance.wait_until_ready().await {
        error!("slow-script wait failed: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if !instance.reset_timeout() {
        instance.disconnect_and_terminate().await;
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    instance.await_page_load().await;
    debug!("slow-script release for instance {id}");
    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_assets_are_present() {
        let assets = ShellAssets::load(None).unwrap();
        assert!(assets.template.contains("{{bundle}}"));
        assert!(!assets.bundle.is_empty());
    }

    #[test]
    fn shell_substitutes_host_id_and_bundle() {
        let assets = ShellAssets {
            template: "<html>{{host}}:{{id}}<script>{{bundle}}</script></html>".to_string(),
            bundle: "var x = 1;".to_string(),
        };
        let page = assets.render_shell("example.com", 12);
        assert_eq!(page, "<html>example.com:12<script>var x = 1;</script></html>");
    }

    #[test]
    fn filesystem_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TEMPLATE_FILENAME), "override {{id}}").unwrap();
        let assets = ShellAssets::load(Some(dir.path())).unwrap();
        assert_eq!(assets.template, "override {{id}}");
        // The bundle was not overridden and falls back to the embedded copy.
        assert!(!assets.bundle.is_empty());
    }
}
