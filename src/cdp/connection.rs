//! The multiplexed RPC + event connection to a single browser tab.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use super::error::CdpError;
use super::protocol::{CdpRequest, EventMessage, PageInfo, TAB_TYPE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type ResultSink = oneshot::Sender<Result<Value, CdpError>>;

/// Capacity of the outgoing send queue.
const SEND_QUEUE_SIZE: usize = 256;

/// A connection to one tab of a browser running with remote debugging
/// enabled. RPC calls and unsolicited events share one WebSocket: a writer
/// task owns the sink and drains the send queue, a reader task owns the
/// source and demultiplexes frames into per-call result sinks and a buffered
/// event queue.
///
/// RPC replies are delivered on dedicated one-shot channels, so a consumer
/// that is slow to drain events can never stall its own replies.
#[derive(Debug)]
pub struct Connection {
    call_tx: mpsc::Sender<String>,
    stop_tx: watch::Sender<bool>,
    pending: Arc<Mutex<HashMap<u64, ResultSink>>>,
    event_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EventMessage>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    reader: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connects to the active tab of the browser at `hostport`.
    ///
    /// The active tab is discovered through `GET http://{hostport}/json`; the
    /// first listed entry of type `"page"` wins. A browser that just started
    /// may refuse the connection for a few seconds, so callers retry.
    pub async fn dial(hostport: &str) -> Result<Self, CdpError> {
        let listing = format!("http://{hostport}/json");
        let pages: Vec<PageInfo> = reqwest::get(&listing).await?.json().await?;

        let tab = pages
            .into_iter()
            .find(|p| p.page_type == TAB_TYPE)
            .ok_or(CdpError::NoActiveTab)?;
        let ws_url = tab.web_socket_debugger_url.ok_or_else(|| {
            CdpError::MalformedResponse("page listing entry without webSocketDebuggerUrl".into())
        })?;

        let (ws, _) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| CdpError::ConnectionFailed(format!("{ws_url}: {e}")))?;
        debug!("connected to devtools at {ws_url}");

        let (sink, source) = ws.split();
        let (call_tx, call_rx) = mpsc::channel(SEND_QUEUE_SIZE);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: Arc<Mutex<HashMap<u64, ResultSink>>> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(Self::send_loop(sink, call_rx, stop_rx, closed.clone()));
        let reader = tokio::spawn(Self::receive_loop(
            source,
            pending.clone(),
            event_tx,
            closed.clone(),
        ));

        Ok(Self {
            call_tx,
            stop_tx,
            pending,
            event_rx: tokio::sync::Mutex::new(event_rx),
            next_id: AtomicU64::new(0),
            closed,
            writer: tokio::sync::Mutex::new(Some(writer)),
            reader: tokio::sync::Mutex::new(Some(reader)),
        })
    }

    /// Invokes a method without waiting for its reply.
    pub async fn invoke(&self, method: &str, params: Value) -> Result<(), CdpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CdpError::Closed);
        }
        let request = CdpRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&request)?;
        self.call_tx.send(json).await.map_err(|_| CdpError::Closed)
    }

    /// Invokes a method and waits for its reply. A protocol `error` envelope
    /// surfaces as [`CdpError::Protocol`].
    pub async fn invoke_and_wait(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CdpError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&request)?;

        // The sink must be registered before the request hits the wire.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if self.call_tx.send(json).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(CdpError::Closed);
        }
        trace!("sent {method} (id={id})");

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CdpError::Closed),
        }
    }

    /// Returns the next buffered event, in arrival order. `None` once the
    /// connection has drained.
    pub async fn next_event(&self) -> Option<EventMessage> {
        self.event_rx.lock().await.recv().await
    }

    /// Orderly shutdown: stop the writer (its last act is the WebSocket
    /// close frame), then wait for the reader to observe the peer's close,
    /// then drop the socket. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.writer.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn send_loop(
        mut sink: WsSink,
        mut call_rx: mpsc::Receiver<String>,
        mut stop_rx: watch::Receiver<bool>,
        closed: Arc<AtomicBool>,
    ) {
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                msg = call_rx.recv() => match msg {
                    Some(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            // Send errors after an orderly close are expected.
                            if !closed.swap(true, Ordering::SeqCst) {
                                error!("devtools send failed: {e}");
                            }
                            break;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    }

    async fn receive_loop(
        mut source: WsSource,
        pending: Arc<Mutex<HashMap<u64, ResultSink>>>,
        event_tx: mpsc::UnboundedSender<EventMessage>,
        closed: Arc<AtomicBool>,
    ) {
        let mut sequence: u64 = 0;
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let msg: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("unparseable devtools frame: {e}");
                            continue;
                        }
                    };
                    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
                        let sink = pending.lock().remove(&id);
                        match sink {
                            Some(tx) => {
                                let result = if let Some(err) = msg.get("error") {
                                    Err(CdpError::Protocol {
                                        code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                                        message: err
                                            .get("message")
                                            .and_then(Value::as_str)
                                            .unwrap_or("unknown")
                                            .to_string(),
                                    })
                                } else {
                                    Ok(msg.get("result").cloned().unwrap_or(Value::Null))
                                };
                                let _ = tx.send(result);
                            }
                            // Stale result, e.g. a reply raced with close.
                            None => trace!("dropping result for unknown id {id}"),
                        }
                    } else if let Some(method) = msg.get("method").and_then(Value::as_str) {
                        let event = EventMessage {
                            method: method.to_string(),
                            params: msg.get("params").cloned().unwrap_or(Value::Null),
                            sequence,
                        };
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    sequence += 1;
                }
                Ok(Message::Close(_)) => {
                    debug!("devtools socket closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if !closed.swap(true, Ordering::SeqCst) {
                        error!("devtools receive failed: {e}");
                    }
                    break;
                }
            }
        }
        // Wake any callers still waiting on a reply; they observe Closed.
        pending.lock().clear();
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
