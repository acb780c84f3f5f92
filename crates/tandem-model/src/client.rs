// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use tandem_config::{Protocol, ThinkingConfig};
use tandem_protocol::{ConversationItem, ResponseMetadataItem, StreamErrorItem, ToolSchema};

/// HTTP timeouts shared by every adapter.
pub const HTTP_TIMEOUT_CONNECT_S: u64 = 15;
pub const HTTP_TIMEOUT_READ_S: u64 = 285;
pub const HTTP_TIMEOUT_TOTAL_S: u64 = 300;

/// Everything one provider call needs.
///
/// The history slice is the canonical conversation; each adapter's input
/// builder maps it to the wire schema (reminder injection and truncation
/// happened upstream).
#[derive(Debug, Clone, Default)]
pub struct LlmCallParameter {
    pub input: Vec<ConversationItem>,
    pub system: Option<String>,
    pub tools: Vec<ToolSchema>,
    pub thinking: Option<ThinkingConfig>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub context_limit: Option<u64>,
    pub session_id: Option<String>,
}

/// The ordered item stream one provider call yields.
///
/// Failures past request setup are data, not `Err`: the stream emits a
/// `StreamError` item followed by the terminal `ResponseMetadata` item, and
/// the turn executor decides whether the task retries.
pub type ResponseStream = Pin<Box<dyn Stream<Item = ConversationItem> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Wire protocol this client speaks.
    fn protocol(&self) -> Protocol;

    /// Model identifier sent on the wire and recorded on reasoning items.
    fn model_name(&self) -> &str;

    /// Provider hint: whether a turn's tool calls may run concurrently.
    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }

    /// Send one completion request and stream the normalized items.
    ///
    /// The stream begins with exactly one `Start` item once the provider
    /// assigns a response id and ends with exactly one `ResponseMetadata`
    /// item; a `StreamError` item precedes the metadata when the response
    /// aborted.
    async fn call(&self, param: LlmCallParameter) -> ResponseStream;
}

/// Protocol-specific SSE event processing fed by [`drive_sse`].
///
/// `on_event` receives each parsed `data:` payload; `finish` runs once at
/// stream close and must emit the terminal `ResponseMetadata` item.
pub(crate) trait SseEventHandler: Send {
    fn on_event(&mut self, event: &serde_json::Value) -> Vec<ConversationItem>;
    fn finish(&mut self) -> Vec<ConversationItem>;
}

/// Spawn a driver task that decodes the response body as SSE, feeds the
/// handler, and bridges the produced items into a [`ResponseStream`].
///
/// Dropping the returned stream tears the driver down at its next send.
pub(crate) fn drive_sse<H>(resp: reqwest::Response, mut handler: H) -> ResponseStream
where
    H: SseEventHandler + 'static,
{
    use futures::StreamExt;

    let (tx, rx) = tokio::sync::mpsc::channel::<ConversationItem>(64);
    tokio::spawn(async move {
        let mut decoder = crate::sse::SseDecoder::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for data in decoder.push(&bytes) {
                        let value = match serde_json::from_str::<serde_json::Value>(&data) {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        for item in handler.on_event(&value) {
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let item = ConversationItem::StreamError(StreamErrorItem::new(e.to_string()));
                    if tx.send(item).await.is_err() {
                        return;
                    }
                    break;
                }
            }
        }
        for item in handler.finish() {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    });
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

/// A stream representing a request that failed before any tokens arrived.
pub fn error_stream(model_name: &str, error: impl Into<String>) -> ResponseStream {
    let items = vec![
        ConversationItem::StreamError(StreamErrorItem::new(error)),
        ConversationItem::ResponseMetadata(ResponseMetadataItem {
            model_name: model_name.to_string(),
            ..Default::default()
        }),
    ];
    Box::pin(futures::stream::iter(items))
}

/// The shared `reqwest` client with the per-stage timeouts every adapter
/// uses (connect / read / total).
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_TIMEOUT_CONNECT_S))
        .read_timeout(Duration::from_secs(HTTP_TIMEOUT_READ_S))
        .timeout(Duration::from_secs(HTTP_TIMEOUT_TOTAL_S))
        .build()
        .expect("reqwest client construction cannot fail with static options")
}
