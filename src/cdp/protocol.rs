//! DevTools protocol wire types and loose-JSON accessors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An RPC sent to the browser.
#[derive(Debug, Serialize)]
pub struct CdpRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// An unsolicited event received from the browser.
///
/// `sequence` is the monotonic arrival index of the frame that carried the
/// event; it exists for diagnostics only.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub method: String,
    pub params: Value,
    pub sequence: u64,
}

/// One entry of the browser's `/json` page listing. A page can be a tab, a
/// background process, or other target; only `type == "page"` entries accept
/// a debugger connection for our purposes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub page_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub web_socket_debugger_url: Option<String>,
}

/// `Page.Type` value identifying a browser tab.
pub const TAB_TYPE: &str = "page";

/// Looks up a dotted path (`"result.value.x"`) in a loose JSON tree.
pub fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for field in path.split('.') {
        current = current.as_object()?.get(field)?;
    }
    Some(current)
}

/// Numeric lookup. Protocol numbers arrive as JSON floats under generic
/// decoding; absent or non-numeric fields yield `None`.
pub fn float_at(root: &Value, path: &str) -> Option<f64> {
    value_at(root, path)?.as_f64()
}

/// Integer lookup, truncating toward zero.
pub fn int_at(root: &Value, path: &str) -> Option<i64> {
    float_at(root, path).map(|f| f.trunc() as i64)
}

/// String lookup.
pub fn str_at<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    value_at(root, path)?.as_str()
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
