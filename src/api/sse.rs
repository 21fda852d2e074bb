//! Event bridge: translate executor events into an ordered SSE frame stream.
//!
//! A single consumer drains the bounded event channel, so frames are totally
//! ordered per connection without any per-write locking. Dropping the stream
//! (client disconnect) cancels the execution through the embedded drop guard.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::DropGuard;

use super::error::ApiError;
use crate::jupyter::ErrorOutput;
use crate::runtime::ExecEvent;

/// Keepalive cadence once a run has started.
const PING_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Init,
    Status,
    Stdout,
    Stderr,
    Result,
    ExecutionCount,
    ExecutionComplete,
    Error,
    Ping,
}

/// One SSE frame: a JSON object terminated by a blank line.
#[derive(Debug, Serialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOutput>,
    pub timestamp: i64,
}

impl StreamFrame {
    fn new(kind: FrameType) -> Self {
        Self {
            kind,
            text: None,
            execution_count: None,
            execution_time: None,
            results: None,
            error: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    fn with_text(kind: FrameType, text: impl Into<String>) -> Self {
        let mut frame = Self::new(kind);
        frame.text = Some(text.into());
        frame
    }

    fn ping() -> Self {
        Self::with_text(FrameType::Ping, "pong")
    }

    fn encode(&self) -> Bytes {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.extend_from_slice(b"\n\n");
        Bytes::from(bytes)
    }
}

/// Frames produced by one executor event. Empty text payloads are
/// suppressed; a result bundle fans out into count and data frames.
pub(crate) fn frames_for(event: ExecEvent) -> Vec<StreamFrame> {
    match event {
        ExecEvent::Init { session } => vec![StreamFrame::with_text(FrameType::Init, session)],
        ExecEvent::Status { state } => vec![StreamFrame::with_text(FrameType::Status, state)],
        ExecEvent::Stdout { text } if text.is_empty() => Vec::new(),
        ExecEvent::Stdout { text } => vec![StreamFrame::with_text(FrameType::Stdout, text)],
        ExecEvent::Stderr { text } if text.is_empty() => Vec::new(),
        ExecEvent::Stderr { text } => vec![StreamFrame::with_text(FrameType::Stderr, text)],
        ExecEvent::Result { data, count } => {
            let mut frames = Vec::new();
            if count > 0 {
                let mut frame = StreamFrame::new(FrameType::ExecutionCount);
                frame.execution_count = Some(count);
                frames.push(frame);
            }
            if !data.is_empty() {
                let mut frame = StreamFrame::new(FrameType::Result);
                frame.results = Some(reshape_results(data));
                frames.push(frame);
            }
            frames
        }
        ExecEvent::Error { error } => {
            let mut frame = StreamFrame::new(FrameType::Error);
            frame.error = Some(error);
            vec![frame]
        }
        ExecEvent::Complete { elapsed } => {
            let mut frame = StreamFrame::new(FrameType::ExecutionComplete);
            frame.execution_time = Some(elapsed.as_millis() as i64);
            vec![frame]
        }
    }
}

/// Rename the `text/plain` MIME key to `text`; every other key passes
/// through untouched.
fn reshape_results(data: Map<String, Value>) -> Map<String, Value> {
    let mut reshaped = Map::with_capacity(data.len());
    for (key, value) in data {
        if key == "text/plain" {
            reshaped.insert("text".to_string(), value);
        } else {
            reshaped.insert(key, value);
        }
    }
    reshaped
}

/// The SSE body: drains executor events into frames, interleaves keepalive
/// pings after `init`, and holds the connection open for a grace window once
/// the executor finishes so trailing frames flush.
pub struct EventStream {
    rx: mpsc::Receiver<ExecEvent>,
    pending: VecDeque<StreamFrame>,
    ping: Option<Interval>,
    grace: Duration,
    draining: Option<Pin<Box<Sleep>>>,
    _cancel_on_drop: DropGuard,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<ExecEvent>, grace: Duration, cancel_on_drop: DropGuard) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            ping: None,
            grace,
            draining: None,
            _cancel_on_drop: cancel_on_drop,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame.encode())));
            }

            if let Some(sleep) = this.draining.as_mut() {
                return match sleep.as_mut().poll(cx) {
                    Poll::Ready(()) => Poll::Ready(None),
                    Poll::Pending => Poll::Pending,
                };
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if matches!(event, ExecEvent::Init { .. }) && this.ping.is_none() {
                        let mut ping =
                            interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
                        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        this.ping = Some(ping);
                    }
                    this.pending.extend(frames_for(event));
                }
                Poll::Ready(None) => {
                    this.draining = Some(Box::pin(tokio::time::sleep(this.grace)));
                }
                Poll::Pending => {
                    if let Some(ping) = this.ping.as_mut() {
                        if ping.poll_tick(cx).is_ready() {
                            return Poll::Ready(Some(Ok(StreamFrame::ping().encode())));
                        }
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Build the streaming response around an event channel.
pub fn sse_response(
    rx: mpsc::Receiver<ExecEvent>,
    grace: Duration,
    cancel_on_drop: DropGuard,
) -> Result<Response, ApiError> {
    let stream = EventStream::new(rx, grace, cancel_on_drop);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::runtime(format!("error building stream response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventSink;
    use futures::StreamExt;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn decode(bytes: &Bytes) -> Value {
        let text = std::str::from_utf8(bytes).unwrap();
        assert!(text.ends_with("\n\n"));
        serde_json::from_str(text.trim_end()).unwrap()
    }

    #[test]
    fn result_events_fan_out_into_count_and_data_frames() {
        let mut data = Map::new();
        data.insert("text/plain".to_string(), json!("2"));
        let frames = frames_for(ExecEvent::Result { data, count: 1 });

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, FrameType::ExecutionCount);
        assert_eq!(frames[0].execution_count, Some(1));
        assert_eq!(frames[1].kind, FrameType::Result);
        assert_eq!(frames[1].results.as_ref().unwrap()["text"], json!("2"));
    }

    #[test]
    fn empty_payloads_are_suppressed() {
        assert!(frames_for(ExecEvent::Stdout {
            text: String::new()
        })
        .is_empty());
        assert!(frames_for(ExecEvent::Result {
            data: Map::new(),
            count: 0
        })
        .is_empty());
    }

    #[test]
    fn mime_keys_other_than_text_plain_pass_through() {
        let mut data = Map::new();
        data.insert("text/plain".to_string(), json!("plain"));
        data.insert("image/png".to_string(), json!("base64data"));
        let reshaped = reshape_results(data);

        assert_eq!(reshaped["text"], json!("plain"));
        assert_eq!(reshaped["image/png"], json!("base64data"));
        assert!(!reshaped.contains_key("text/plain"));
    }

    #[test]
    fn frames_are_json_objects_with_double_newline_terminators() {
        let frame = StreamFrame::with_text(FrameType::Init, "abc");
        let bytes = frame.encode();
        let value = decode(&bytes);
        assert_eq!(value["type"], "init");
        assert_eq!(value["text"], "abc");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn stream_preserves_event_order_and_ends_after_grace() {
        let (sink, rx) = EventSink::channel();
        let cancel = CancellationToken::new();
        let mut stream = EventStream::new(rx, Duration::from_millis(10), cancel.drop_guard());

        sink.init("s1").await;
        sink.stdout("hello").await;
        sink.complete(Duration::from_millis(5)).await;
        drop(sink);

        let kinds: Vec<String> = async {
            let mut kinds = Vec::new();
            while let Some(Ok(bytes)) = stream.next().await {
                kinds.push(decode(&bytes)["type"].as_str().unwrap().to_string());
            }
            kinds
        }
        .await;

        assert_eq!(kinds, vec!["init", "stdout", "execution_complete"]);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_execution() {
        let (_sink, rx) = EventSink::channel();
        let cancel = CancellationToken::new();
        let watch = cancel.clone();
        let stream = EventStream::new(rx, Duration::from_millis(10), cancel.drop_guard());

        assert!(!watch.is_cancelled());
        drop(stream);
        assert!(watch.is_cancelled());
    }

    #[tokio::test]
    async fn pings_flow_while_the_executor_is_quiet() {
        tokio::time::pause();

        let (sink, rx) = EventSink::channel();
        let cancel = CancellationToken::new();
        let mut stream = EventStream::new(rx, Duration::from_millis(10), cancel.drop_guard());

        sink.init("s1").await;
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(decode(&first)["type"], "init");

        // no events for over a ping interval
        let ping = tokio::time::timeout(Duration::from_secs(4), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(decode(&ping)["type"], "ping");
        assert_eq!(decode(&ping)["text"], "pong");
    }
}
