//! HTTP preview handlers composing the pool, the DOM model, and the
//! sanitizer behind the `req_for_preview` query trigger.

pub mod batch;
pub mod encoding;
pub mod proxy;
pub mod shell;
pub mod stream;

use std::sync::Arc;

use crate::chrome::InstanceManager;
use crate::handlers::shell::ShellAssets;

/// Query key that opts a request into preview mode. The value is ignored.
pub const PREVIEW_QUERY_KEY: &str = "req_for_preview";

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<InstanceManager>,
    pub assets: Arc<ShellAssets>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(manager: Arc<InstanceManager>, assets: Arc<ShellAssets>) -> Self {
        Self {
            manager,
            assets,
            http: reqwest::Client::new(),
        }
    }
}
