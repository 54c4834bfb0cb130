//! Transparent passthrough for non-preview traffic, plus shared request
//! helpers.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};
use url::Url;

use super::PREVIEW_QUERY_KEY;

/// Reconstructs the absolute URL of a proxied request. Proxy-style requests
/// arrive with an absolute request target; origin-style ones are rebuilt
/// from the `Host` header, defaulting to the http scheme the way the
/// upstream origin is reached.
pub fn absolute_url(req: &Request) -> Option<Url> {
    let uri = req.uri();
    if uri.scheme().is_some() {
        return Url::parse(&uri.to_string()).ok();
    }
    let host = req.headers().get(header::HOST)?.to_str().ok()?;
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Url::parse(&format!("http://{host}{path}")).ok()
}

/// Whether the URL opts into preview mode.
pub fn is_preview_request(url: &Url) -> bool {
    url.query_pairs().any(|(key, _)| key == PREVIEW_QUERY_KEY)
}

/// First value of a query parameter.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Fetches the URL and mirrors status, content type, and body back.
pub async fn passthrough(client: &reqwest::Client, url: Url) -> Response {
    debug!("proxying {url}");
    let upstream = match client.get(url.as_str()).send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("passthrough fetch of {url} failed: {e}");
            return gateway_error();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    match builder.body(Body::from_stream(upstream.bytes_stream())) {
        Ok(response) => response,
        Err(_) => gateway_error(),
    }
}

/// The single 502 every failed preview collapses to.
pub fn gateway_error() -> Response {
    StatusCode::BAD_GATEWAY.into_response()
}

pub fn bad_request() -> Response {
    StatusCode::BAD_REQUEST.into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    use super::*;

    fn request(uri: &str, host: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn origin_form_requests_rebuild_from_host() {
        let req = request("/page?x=1", Some("example.com"));
        let url = absolute_url(&req).unwrap();
        assert_eq!(url.as_str(), "http://example.com/page?x=1");
    }

    #[test]
    fn absolute_form_requests_pass_through() {
        let req = request("http://origin.test/a/b?c=d", None);
        let url = absolute_url(&req).unwrap();
        assert_eq!(url.as_str(), "http://origin.test/a/b?c=d");
    }

    #[test]
    fn missing_host_yields_none() {
        assert!(absolute_url(&request("/page", None)).is_none());
    }

    #[test]
    fn preview_trigger_matches_on_key_only() {
        let url = Url::parse("http://h/p?req_for_preview").unwrap();
        assert!(is_preview_request(&url));
        let url = Url::parse("http://h/p?req_for_preview=1").unwrap();
        assert!(is_preview_request(&url));
        let url = Url::parse("http://h/p?other=1").unwrap();
        assert!(!is_preview_request(&url));
    }

    #[test]
    fn query_param_returns_first_value() {
        let url = Url::parse("http://h/stream?id=12&id=34").unwrap();
        assert_eq!(query_param(&url, "id").as_deref(), Some("12"));
        assert!(query_param(&url, "missing").is_none());
    }
}
