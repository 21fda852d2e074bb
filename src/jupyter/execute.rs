//! WebSocket client for the kernel execute protocol.
//!
//! One connection per execution: connect to the kernel channels endpoint,
//! send an `execute_request` on the shell channel, then demux the response
//! stream until the kernel goes idle and the reply has been observed.

use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::types::{
    Auth, ErrorOutput, ExecuteReply, ExecuteRequestContent, ExecuteResult, MessageHeader,
    StatusUpdate, StreamOutput, WireMessage, PROTOCOL_VERSION, STATE_IDLE,
};
use super::JupyterError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Progress of a single kernel execution, delivered in protocol order.
#[derive(Debug, Clone)]
pub enum ExecutionUpdate {
    /// An `execute_result` bundle with its execution counter.
    Result {
        execution_count: i64,
        data: Map<String, Value>,
    },
    /// A `stream` chunk on stdout or stderr.
    Stream { name: String, text: String },
    /// A kernel `status` transition.
    Status { execution_state: String },
    /// An `error` reply from the kernel.
    Error(ErrorOutput),
    /// Terminal update: the kernel went idle and the reply was recorded.
    Completed { elapsed: Duration },
}

/// WebSocket connection to one kernel's channels endpoint.
pub struct KernelChannels {
    ws: WsStream,
    session: String,
    counter: u64,
}

impl KernelChannels {
    /// Dial `ws(s)://…/api/kernels/{id}/channels`, with query-token auth when
    /// a token is configured.
    pub async fn connect(
        base_url: &str,
        kernel_id: &str,
        auth: &Auth,
    ) -> Result<Self, JupyterError> {
        let url = channels_url(base_url, kernel_id, auth)?;
        debug!("connecting to kernel channels: {url}");
        let (ws, _response) = connect_async(url.as_str()).await?;

        Ok(Self {
            ws,
            session: Uuid::new_v4().to_string(),
            counter: 0,
        })
    }

    fn next_msg_id(&mut self) -> String {
        self.counter += 1;
        format!("{}-{}", self.session, self.counter)
    }

    /// Run one execution to completion, pushing updates in arrival order.
    ///
    /// The kernel may report `idle` before the `execute_reply` lands on the
    /// shell channel; reading continues until an execution count or an error
    /// has been recorded, so the terminal `Completed` update is only emitted
    /// once the execution is actually settled.
    pub async fn execute(
        mut self,
        code: String,
        updates: mpsc::Sender<ExecutionUpdate>,
    ) -> Result<(), JupyterError> {
        let request = WireMessage {
            header: MessageHeader {
                msg_id: self.next_msg_id(),
                username: "execd".to_string(),
                session: self.session.clone(),
                date: Utc::now().to_rfc3339(),
                msg_type: "execute_request".to_string(),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: json!({}),
            metadata: json!({}),
            content: serde_json::to_value(ExecuteRequestContent::new(code))?,
            buffers: Vec::new(),
            channel: "shell".to_string(),
        };

        self.ws
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;

        let started = Instant::now();
        let mut execution_count: Option<i64> = None;
        let mut errored = false;
        let mut idle = false;

        while let Some(frame) = self.ws.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let message: WireMessage = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(err) => {
                    warn!("skipping undecodable kernel message: {err}");
                    continue;
                }
            };

            let mut delivery = None;
            match message.header.msg_type.as_str() {
                "execute_reply" => {
                    if let Ok(reply) = serde_json::from_value::<ExecuteReply>(message.content) {
                        if reply.execution_count > 0 {
                            execution_count = Some(reply.execution_count);
                        }
                        if !reply.ename.is_empty() {
                            errored = true;
                        }
                    }
                }
                "execute_result" => {
                    if let Ok(result) = serde_json::from_value::<ExecuteResult>(message.content) {
                        execution_count = Some(result.execution_count);
                        delivery = Some(ExecutionUpdate::Result {
                            execution_count: result.execution_count,
                            data: result.data,
                        });
                    }
                }
                "stream" => {
                    if let Ok(stream) = serde_json::from_value::<StreamOutput>(message.content) {
                        delivery = Some(ExecutionUpdate::Stream {
                            name: stream.name,
                            text: stream.text,
                        });
                    }
                }
                "error" => {
                    if let Ok(error) = serde_json::from_value::<ErrorOutput>(message.content) {
                        errored = true;
                        delivery = Some(ExecutionUpdate::Error(error));
                    }
                }
                "status" => {
                    if let Ok(status) = serde_json::from_value::<StatusUpdate>(message.content) {
                        if status.execution_state == STATE_IDLE {
                            idle = true;
                        }
                        delivery = Some(ExecutionUpdate::Status {
                            execution_state: status.execution_state,
                        });
                    }
                }
                _ => {}
            }

            if let Some(update) = delivery {
                if updates.send(update).await.is_err() {
                    // consumer gone; stop reading
                    break;
                }
            }

            if idle && (execution_count.is_some() || errored) {
                let _ = updates
                    .send(ExecutionUpdate::Completed {
                        elapsed: started.elapsed(),
                    })
                    .await;
                break;
            }
        }

        let _ = self.ws.close(None).await;
        Ok(())
    }
}

/// Derive the kernel channels websocket URL from the server base URL.
fn channels_url(base_url: &str, kernel_id: &str, auth: &Auth) -> Result<String, JupyterError> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|err| JupyterError::InvalidUrl(format!("{base_url}: {err}")))?;

    let scheme = match parsed.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let host = parsed
        .host_str()
        .ok_or_else(|| JupyterError::InvalidUrl(base_url.to_string()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut url = format!("{scheme}://{authority}/api/kernels/{kernel_id}/channels");
    if let Some(token) = auth.query_token() {
        url.push_str("?token=");
        url.push_str(token);
    }
    Ok(url)
}
