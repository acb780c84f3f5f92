// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolResultUiExtra, ToolSideEffect};
use crate::usage::{TaskMetadataItem, Usage};

fn default_now() -> DateTime<Utc> {
    Utc::now()
}

// ─── Content parts ────────────────────────────────────────────────────────────

/// An image attached to a user message or tool result.
///
/// `Url` carries either a data URL (`data:<mime>;base64,<b64>`) or a public
/// HTTPS URL.  `File` is a lazy reference resolved at call time by the
/// provider adapter (read, mime-sniff, resize, base64-encode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImagePart {
    Url {
        url: String,
    },
    File {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
}

impl ImagePart {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::File { path: path.into(), mime: None }
    }
}

// ─── Conversation items ───────────────────────────────────────────────────────

/// Marks the beginning of one provider stream.  Emitted as soon as the
/// provider assigns a response id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartItem {
    pub response_id: String,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl StartItem {
    pub fn new(response_id: impl Into<String>) -> Self {
        Self { response_id: response_id.into(), created_at: Utc::now() }
    }
}

/// Human input for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageItem {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImagePart>>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl UserMessageItem {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), images: None, created_at: Utc::now() }
    }

    pub fn with_images(content: impl Into<String>, images: Vec<ImagePart>) -> Self {
        let images = if images.is_empty() { None } else { Some(images) };
        Self { content: content.into(), images, created_at: Utc::now() }
    }
}

/// System/reminder text injected into the model input ahead of the next user
/// message, or shown as a UI notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeveloperMessageItem {
    pub content: String,
    /// Reminder kind that produced this message, used for de-duplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl DeveloperMessageItem {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), reminder: None, created_at: Utc::now() }
    }

    pub fn reminder(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reminder: Some(kind.into()),
            created_at: Utc::now(),
        }
    }
}

/// Finalized assistant text block for one turn.  May be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageItem {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl AssistantMessageItem {
    pub fn new(content: impl Into<String>, response_id: Option<String>) -> Self {
        Self { content: content.into(), response_id, created_at: Utc::now() }
    }
}

/// Incremental assistant text chunk.  Streaming-only, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessageDelta {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl AssistantMessageDelta {
    pub fn new(content: impl Into<String>, response_id: Option<String>) -> Self {
        Self { content: content.into(), response_id, created_at: Utc::now() }
    }
}

/// Visible chain-of-thought text from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTextItem {
    pub content: String,
    /// Model that produced the reasoning.  Replayed to the provider only when
    /// it matches the current model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl ReasoningTextItem {
    pub fn new(
        content: impl Into<String>,
        model: impl Into<String>,
        response_id: Option<String>,
    ) -> Self {
        Self {
            content: content.into(),
            model: Some(model.into()),
            response_id,
            created_at: Utc::now(),
        }
    }
}

/// Opaque reasoning continuation token: an Anthropic thinking signature or a
/// Responses-style encrypted reasoning blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEncryptedItem {
    pub encrypted_content: String,
    /// Wire format tag so the input builder can route the blob on replay
    /// (e.g. `"anthropic-claude-v1"`, `"openai-responses-v1"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl ReasoningEncryptedItem {
    pub fn new(
        encrypted_content: impl Into<String>,
        format: Option<String>,
        model: impl Into<String>,
        response_id: Option<String>,
    ) -> Self {
        Self {
            encrypted_content: encrypted_content.into(),
            format,
            model: Some(model.into()),
            response_id,
            created_at: Utc::now(),
        }
    }
}

/// Transient signal that a tool call is forming.  Streaming-only, never
/// persisted; exists so the UI can show "Calling Bash ..." before the
/// arguments finish streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallStartItem {
    pub call_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl ToolCallStartItem {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        response_id: Option<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            response_id,
            created_at: Utc::now(),
        }
    }
}

/// Finalized tool invocation request.  `arguments` is the raw JSON string as
/// produced by the model; the tool executor parses and validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallItem {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl ToolCallItem {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
        response_id: Option<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            response_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Result of one tool invocation, linked back by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultItem {
    #[serde(default)]
    pub call_id: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Structured render hints (diff, todo list, truncation record).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_extra: Option<ToolResultUiExtra>,
    /// Images echoed back through the next turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImagePart>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<ToolSideEffect>,
    /// Sub-agent task metadata, propagated into the parent accumulator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_metadata: Option<crate::usage::TaskMetadata>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl ToolResultItem {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            status: ToolStatus::Success,
            output: Some(output.into()),
            tool_name: None,
            ui_extra: None,
            images: None,
            side_effects: Vec::new(),
            task_metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self { status: ToolStatus::Error, ..Self::success(output) }
    }

    pub fn with_ui_extra(mut self, ui_extra: ToolResultUiExtra) -> Self {
        self.ui_extra = Some(ui_extra);
        self
    }

    pub fn with_side_effect(mut self, effect: ToolSideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// Per-turn metrics from one provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResponseMetadataItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model_name: String,
    /// Upstream provider name when routed (OpenRouter).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Terminal response status when the wire protocol reports one
    /// (`"completed"`, `"incomplete"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

/// Stream aborted mid-response.  Persisted only for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorItem {
    pub error: String,
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl StreamErrorItem {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into(), created_at: Utc::now() }
    }
}

/// User-initiated cancellation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptItem {
    #[serde(default = "default_now")]
    pub created_at: DateTime<Utc>,
}

impl InterruptItem {
    pub fn new() -> Self {
        Self { created_at: Utc::now() }
    }
}

impl Default for InterruptItem {
    fn default() -> Self {
        Self::new()
    }
}

// ─── The tagged union ─────────────────────────────────────────────────────────

/// The tagged union exchanged between provider adapters, the session log,
/// tool execution, and the UI event stream.
///
/// A typical provider response stream is:
/// `Start`, `ReasoningText`/`ReasoningEncrypted`*, `AssistantDelta`*,
/// `Assistant`, `ToolCall`*, `ResponseMetadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Start(StartItem),
    User(UserMessageItem),
    Developer(DeveloperMessageItem),
    Assistant(AssistantMessageItem),
    AssistantDelta(AssistantMessageDelta),
    ReasoningText(ReasoningTextItem),
    ReasoningEncrypted(ReasoningEncryptedItem),
    ToolCallStart(ToolCallStartItem),
    ToolCall(ToolCallItem),
    ToolResult(ToolResultItem),
    ResponseMetadata(ResponseMetadataItem),
    TaskMetadata(TaskMetadataItem),
    StreamError(StreamErrorItem),
    Interrupt(InterruptItem),
}

impl ConversationItem {
    /// Streaming-only items (`AssistantDelta`, `ToolCallStart`) exist for UI
    /// consumption and are never written to the session log.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, Self::AssistantDelta(_) | Self::ToolCallStart(_))
    }

    pub fn response_metadata(response_id: Option<String>, model_name: &str) -> Self {
        Self::ResponseMetadata(ResponseMetadataItem {
            response_id,
            model_name: model_name.to_string(),
            ..Default::default()
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
