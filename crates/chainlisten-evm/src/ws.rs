//! WebSocket JSON-RPC node client with blocking dial and auto-reconnect.
//!
//! A background task owns the socket. Callers talk to it over a command
//! channel; responses are matched by request id and `eth_subscription`
//! notifications are routed through the [`SubscriptionManager`].
//!
//! When the socket drops, in-flight requests and all subscriptions fail with
//! [`TransportError::Closed`] and the task re-dials using the backoff policy.
//! Requests made while the task is re-dialing fail immediately with the same
//! error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainlisten_core::error::TransportError;
use chainlisten_core::policy::BackoffPolicy;
use chainlisten_core::types::{EventFilter, RawLog};

use crate::client::{LogSubscription, NodeClient, SubscriptionId};
use crate::rpc::{parse_hex_u64, parse_log, JsonRpcRequest, JsonRpcResponse, RpcId, WireLog};
use crate::subscriptions::SubscriptionManager;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum WsCommand {
    Call {
        req: JsonRpcRequest,
        tx: oneshot::Sender<Result<Value, TransportError>>,
    },
    Subscribe {
        req: JsonRpcRequest,
        tx: oneshot::Sender<Result<LogSubscription, TransportError>>,
    },
    Close,
}

impl WsCommand {
    fn fail(self, err: TransportError) {
        match self {
            Self::Call { tx, .. } => {
                let _ = tx.send(Err(err));
            }
            Self::Subscribe { tx, .. } => {
                let _ = tx.send(Err(err));
            }
            Self::Close => {}
        }
    }
}

/// Request waiting for its response on the current connection.
enum Pending {
    Call(oneshot::Sender<Result<Value, TransportError>>),
    Subscribe(oneshot::Sender<Result<LogSubscription, TransportError>>),
}

impl Pending {
    fn fail(self, err: TransportError) {
        match self {
            Self::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Subscribe(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

enum Exit {
    Disconnected,
    Shutdown,
}

pub struct WsNodeClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subscriptions: SubscriptionManager,
    next_id: AtomicU64,
}

impl WsNodeClient {
    /// Dial `url`, retrying with `policy` until it succeeds, then start the
    /// background connection task. Never fails.
    pub async fn connect(url: impl Into<String>, policy: Arc<dyn BackoffPolicy>) -> Self {
        let url = url.into();
        let ws = dial(&url, policy.as_ref()).await;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new();
        tokio::spawn(ws_task(url.clone(), ws, cmd_rx, subscriptions.clone(), policy));

        Self {
            url,
            cmd_tx,
            subscriptions,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of live subscriptions on the current connection.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    fn request(&self, method: &str, params: Vec<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params)
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Call {
                req: self.request(method, params),
                tx,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }
}

impl Drop for WsNodeClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl NodeClient for WsNodeClient {
    async fn block_number(&self) -> Result<u64, TransportError> {
        let value = self.call("eth_blockNumber", vec![]).await?;
        let hex = value
            .as_str()
            .ok_or_else(|| TransportError::Malformed(format!("eth_blockNumber returned {value}")))?;
        parse_hex_u64(hex)
    }

    async fn get_logs(&self, filter: &EventFilter) -> Result<Vec<RawLog>, TransportError> {
        let value = self.call("eth_getLogs", vec![filter.to_rpc_params()]).await?;
        let wire: Vec<WireLog> = serde_json::from_value(value)?;
        wire.into_iter().map(RawLog::try_from).collect()
    }

    async fn subscribe_logs(&self, address: Address) -> Result<LogSubscription, TransportError> {
        let params = vec![json!("logs"), json!({ "address": format!("{address:#x}") })];
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Subscribe {
                req: self.request("eth_subscribe", params),
                tx,
            })
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        self.subscriptions.remove(id);
        self.call("eth_unsubscribe", vec![json!(id.0)]).await.map(|_| ())
    }
}

async fn dial(url: &str, policy: &dyn BackoffPolicy) -> WsStream {
    let mut attempt = 0u32;
    loop {
        tracing::info!(url = %url, "connecting via WebSocket");
        match tokio_tungstenite::connect_async(url).await {
            Ok((ws, _)) => {
                tracing::info!(url = %url, "WebSocket connected");
                return ws;
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                let delay = policy.next_delay(attempt);
                tracing::warn!(error = %e, url = %url, attempt, "WebSocket dial failed, retrying in {delay:?}");
                time::sleep(delay).await;
            }
        }
    }
}

/// Re-dial after a disconnect while failing commands that arrive meanwhile.
/// Returns `None` if the client was dropped.
async fn redial(
    url: &str,
    policy: &dyn BackoffPolicy,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
) -> Option<WsStream> {
    let dialing = dial(url, policy);
    tokio::pin!(dialing);
    loop {
        tokio::select! {
            ws = &mut dialing => return Some(ws),
            cmd = cmd_rx.recv() => match cmd {
                None | Some(WsCommand::Close) => return None,
                Some(cmd) => cmd.fail(TransportError::Closed),
            },
        }
    }
}

async fn ws_task(
    url: String,
    mut ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: SubscriptionManager,
    policy: Arc<dyn BackoffPolicy>,
) {
    loop {
        let mut pending = HashMap::new();
        let exit = run_connection(ws, &mut cmd_rx, &subscriptions, &mut pending).await;

        for (_, p) in pending.drain() {
            p.fail(TransportError::Closed);
        }
        subscriptions.close_all();

        if let Exit::Shutdown = exit {
            tracing::debug!(url = %url, "WebSocket client closed");
            return;
        }

        tracing::warn!(url = %url, "WebSocket disconnected, reconnecting");
        ws = match redial(&url, policy.as_ref(), &mut cmd_rx).await {
            Some(ws) => ws,
            None => return,
        };
    }
}

async fn run_connection(
    ws: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    subscriptions: &SubscriptionManager,
    pending: &mut HashMap<u64, Pending>,
) -> Exit {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let (req, waiter) = match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.close().await;
                        return Exit::Shutdown;
                    }
                    Some(WsCommand::Call { req, tx }) => (req, Pending::Call(tx)),
                    Some(WsCommand::Subscribe { req, tx }) => (req, Pending::Subscribe(tx)),
                };
                let msg = match serde_json::to_string(&req) {
                    Ok(msg) => msg,
                    Err(e) => {
                        waiter.fail(e.into());
                        continue;
                    }
                };
                let RpcId::Number(id) = req.id else {
                    waiter.fail(TransportError::Malformed("non-numeric request id".into()));
                    continue;
                };
                pending.insert(id, waiter);
                if let Err(e) = sink.send(Message::Text(msg)).await {
                    tracing::warn!(error = %e, "WebSocket send failed");
                    return Exit::Disconnected;
                }
            }
            msg = stream.next() => {
                match msg {
                    None => return Exit::Disconnected,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket receive error");
                        return Exit::Disconnected;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, pending, subscriptions);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            return Exit::Disconnected;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::warn!(?frame, "WebSocket closed by node");
                        return Exit::Disconnected;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn handle_message(text: &str, pending: &mut HashMap<u64, Pending>, subscriptions: &SubscriptionManager) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(Value::as_str) == Some("eth_subscription") {
        let params = &val["params"];
        let Some(id) = params["subscription"].as_str() else {
            return;
        };
        let id = SubscriptionId(id.to_string());
        let log = match parse_log(params["result"].clone()) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(error = %e, subscription = %id, "dropping malformed log notification");
                return;
            }
        };
        if log.removed {
            tracing::debug!(tx = %log.transaction_hash, log_index = log.log_index, "skipping removed log");
            return;
        }
        if !subscriptions.dispatch(&id, Ok(log)) {
            tracing::debug!(subscription = %id, "notification for unknown subscription");
        }
        return;
    }

    let resp: JsonRpcResponse = match serde_json::from_value(val) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognised WS message");
            return;
        }
    };
    let RpcId::Number(id) = resp.id else {
        return;
    };
    match pending.remove(&id) {
        Some(Pending::Call(tx)) => {
            let _ = tx.send(resp.into_result());
        }
        Some(Pending::Subscribe(tx)) => {
            let result = resp.into_result().and_then(|v| {
                v.as_str()
                    .map(|s| subscriptions.register(SubscriptionId(s.to_string())))
                    .ok_or_else(|| TransportError::Malformed(format!("subscription id {v}")))
            });
            let _ = tx.send(result);
        }
        None => tracing::debug!(id, "response for unknown request"),
    }
}
