//! The update stream endpoint: drives the DOM model off live protocol
//! events and writes `\r`-delimited gzip frames until the page stabilizes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, trace, warn};

use super::proxy::{absolute_url, bad_request, gateway_error, query_param};
use super::AppState;
use crate::cdp::protocol::int_at;
use crate::chrome::{Instance, InstanceManager};
use crate::dom::{DomModel, DomUpdate, UpdateBatch};
use crate::handlers::encoding::FrameEncoder;

pub const DOM_DOCUMENT_UPDATED: &str = "DOM.documentUpdated";
pub const DOM_CHILD_NODE_COUNT_UPDATED: &str = "DOM.childNodeCountUpdated";
pub const DOM_SET_CHILD_NODES: &str = "DOM.setChildNodes";
pub const DOM_CHILD_NODE_INSERTED: &str = "DOM.childNodeInserted";
pub const DOM_CHILD_NODE_REMOVED: &str = "DOM.childNodeRemoved";
pub const DOM_ATTRIBUTE_MODIFIED: &str = "DOM.attributeModified";
pub const EMULATION_VIRTUAL_TIME_BUDGET_EXPIRED: &str = "Emulation.virtualTimeBudgetExpired";

/// Delimiter between frames on the wire.
const FRAME_DELIMITER: u8 = b'\r';

/// `GET /stream?id=<int>`: attaches to the instance the shell page was
/// handed and streams its DOM updates.
pub async fn handle(State(state): State<AppState>, req: Request) -> Response {
    let Some(url) = absolute_url(&req) else {
        return bad_request();
    };
    let Some(id) = query_param(&url, "id") else {
        warn!("stream request missing \"id\"");
        return bad_request();
    };
    let Ok(id) = id.parse::<u64>() else {
        warn!("stream request \"id\" is not an integer");
        return bad_request();
    };
    info!("serving stream for instance {id}");

    let instance = match state.manager.get(id) {
        Ok(instance) => instance,
        Err(e) => {
            error!("stream lookup failed: {e}");
            state.manager.release(id);
            return gateway_error();
        }
    };
    if let Err(e) = instance.wait_until_ready().await {
        error!("chrome {id} never became ready: {e}");
        state.manager.release(id);
        return gateway_error();
    }
    if !instance.reset_timeout() {
        error!("chrome {id} timed out before streaming began");
        // Wait out the teardown so the client cannot race a half-dead
        // instance by retrying immediately.
        instance.disconnect_and_terminate().await;
        state.manager.release(id);
        return gateway_error();
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    tokio::spawn(pump(state.manager.clone(), instance, id, tx));

    (
        StatusCode::OK,
        [
            (header::CONTENT_ENCODING, "gzip"),
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// Event loop feeding the response body. Translation failures skip the
/// event; write failures (including a vanished client) end the stream. The
/// instance is always terminated and released on the way out.
async fn pump(
    manager: Arc<InstanceManager>,
    instance: Arc<Instance>,
    id: u64,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut model = DomModel::new();
    let mut encoder = FrameEncoder::new();

    'events: while let Some(event) = instance.next_event().await {
        match event.method.as_str() {
            DOM_DOCUMENT_UPDATED => {
                debug!("document updated on instance {id}");
                model.begin_document();
                let root = match instance.get_dom_root().await {
                    Ok(root) => root,
                    Err(e) => {
                        error!("failed to fetch document root: {e}");
                        break 'events;
                    }
                };
                match model.emit_initial(&root) {
                    Ok(updates) => {
                        if send_frame(&mut encoder, &tx, updates).await.is_err() {
                            break 'events;
                        }
                    }
                    Err(e) => {
                        error!("failed to translate initial document: {e}");
                        break 'events;
                    }
                }
            }
            DOM_CHILD_NODE_COUNT_UPDATED => {
                if let Some(node_id) = int_at(&event.params, "nodeId") {
                    let _ = instance.request_child_nodes(node_id).await;
                }
            }
            DOM_SET_CHILD_NODES => match model.on_set_child_nodes(&event.params) {
                Ok(updates) => {
                    if send_frame(&mut encoder, &tx, updates).await.is_err() {
                        break 'events;
                    }
                }
                Err(e) => warn!("skipping setChildNodes event: {e}"),
            },
            DOM_CHILD_NODE_INSERTED => {
                // Subscribe to the subtree before translating, so changes
                // beneath the new node keep flowing.
                if let Some(node_id) = int_at(&event.params, "node.nodeId") {
                    let _ = instance.request_child_nodes(node_id).await;
                }
                match model.on_child_inserted(&event.params) {
                    Ok(Some(update)) => {
                        if send_frame(&mut encoder, &tx, vec![update]).await.is_err() {
                            break 'events;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("skipping childNodeInserted event: {e}"),
                }
            }
            DOM_CHILD_NODE_REMOVED => match model.on_child_removed(&event.params) {
                Ok(Some(update)) => {
                    if send_frame(&mut encoder, &tx, vec![update]).await.is_err() {
                        break 'events;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("skipping childNodeRemoved event: {e}"),
            },
            DOM_ATTRIBUTE_MODIFIED => match model.on_attribute_modified(&event.params) {
                Ok(Some(update)) => {
                    if send_frame(&mut encoder, &tx, vec![update]).await.is_err() {
                        break 'events;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("skipping attributeModified event: {e}"),
            },
            EMULATION_VIRTUAL_TIME_BUDGET_EXPIRED => {
                debug!("page stabilized on instance {id}");
                model.finish();
                break 'events;
            }
            _ => {}
        }
    }

    if let Ok(trailer) = encoder.finish() {
        let _ = tx.send(Ok(trailer)).await;
    }
    instance.disconnect_and_terminate().await;
    manager.release(id);
}

/// Serializes one update batch as a frame and hands it to the response
/// body. An error means the stream is dead.
async fn send_frame(
    encoder: &mut FrameEncoder,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    updates: Vec<DomUpdate>,
) -> Result<(), ()> {
    let batch = UpdateBatch { updates };
    let json = match serde_json::to_string(&batch) {
        Ok(json) => json,
        Err(e) => {
            error!("failed to serialize update batch: {e}");
            return Err(());
        }
    };
    trace!(frame = %json, "stream frame");

    let mut payload = json.into_bytes();
    payload.push(FRAME_DELIMITER);
    let chunk = match encoder.encode(&payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            error!("gzip frame failed: {e}");
            return Err(());
        }
    };
    tx.send(Ok(chunk)).await.map_err(|_| ())
}
