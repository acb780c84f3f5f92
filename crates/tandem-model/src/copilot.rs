// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! GitHub Copilot proxy adapter.
//!
//! Copilot fronts both Anthropic- and OpenAI-family models behind one OAuth
//! token.  The adapter picks the wire dialect from the model id (Claude
//! family → Messages, everything else → Responses) and reuses those
//! adapters' payload builders and event handlers.  The short-lived API token
//! is exchanged from the stored OAuth token and refreshed transparently; a
//! 401 gets one retry with a fresh token before surfacing.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tandem_config::{ModelConfig, Protocol, ThinkingConfig};
use tandem_protocol::ConversationItem;

use crate::anthropic::{self, AnthropicEventHandler};
use crate::client::{
    drive_sse, error_stream, http_client, LlmCallParameter, LlmClient, ResponseStream,
};
use crate::images;
use crate::responses::{self, ResponsesEventHandler};

const TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const DEFAULT_API_BASE: &str = "https://api.githubcopilot.com";
/// Refresh this many seconds before the reported expiry.
const EXPIRY_MARGIN_S: u64 = 60;

const STATIC_HEADERS: &[(&str, &str)] = &[
    ("Editor-Version", "vscode/1.96.0"),
    ("Editor-Plugin-Version", "copilot-chat/0.23.2"),
    ("Copilot-Integration-Id", "vscode-chat"),
    ("User-Agent", "GitHubCopilotChat/0.23.2"),
];

fn is_claude_model(model: &str) -> bool {
    model.to_lowercase().contains("claude")
}

/// The negotiated request host is embedded in the token string as a
/// `proxy-ep=` field; the `proxy.` prefix maps to the `api.` host.
fn base_url_from_token(token: &str) -> String {
    for field in token.split(';') {
        if let Some(ep) = field.trim().strip_prefix("proxy-ep=") {
            let host = ep.trim().replacen("proxy.", "api.", 1);
            return format!("https://{host}");
        }
    }
    DEFAULT_API_BASE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    token: String,
    expires_at: u64,
}

#[derive(Debug, Clone)]
struct ApiToken {
    token: String,
    base_url: String,
    expires_at: u64,
}

/// Exchanges the long-lived OAuth token for short-lived API tokens and
/// caches them until shortly before expiry.
pub struct CopilotTokenManager {
    oauth_token: String,
    client: reqwest::Client,
    cached: Mutex<Option<ApiToken>>,
}

impl CopilotTokenManager {
    pub fn new(oauth_token: impl Into<String>) -> Self {
        Self {
            oauth_token: oauth_token.into(),
            client: http_client(),
            cached: Mutex::new(None),
        }
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Current `(api_token, base_url)`, refreshing when stale.
    pub async fn token(&self) -> anyhow::Result<(String, String)> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if Self::now_unix() + EXPIRY_MARGIN_S < cached.expires_at {
                return Ok((cached.token.clone(), cached.base_url.clone()));
            }
        }
        debug!("exchanging Copilot OAuth token for API token");
        let mut request = self
            .client
            .get(TOKEN_URL)
            .header("Authorization", format!("token {}", self.oauth_token))
            .header("Accept", "application/json");
        for (name, value) in STATIC_HEADERS {
            request = request.header(*name, *value);
        }
        let resp = request.send().await.context("Copilot token request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("Copilot token exchange failed with status {}", resp.status());
        }
        let token: TokenResponse = resp.json().await.context("invalid Copilot token response")?;
        let api = ApiToken {
            base_url: base_url_from_token(&token.token),
            token: token.token,
            expires_at: token.expires_at,
        };
        let out = (api.token.clone(), api.base_url.clone());
        *guard = Some(api);
        Ok(out)
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

pub struct CopilotClient {
    model: String,
    tokens: CopilotTokenManager,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    thinking: Option<ThinkingConfig>,
    context_limit: Option<u64>,
    parallel_tool_calls: bool,
    client: reqwest::Client,
}

impl CopilotClient {
    /// The `api_key` slot of the model config carries the GitHub OAuth
    /// token (typically via `env:`).
    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let oauth = config
            .resolve_api_key()
            .context("Copilot OAuth token not configured")?;
        Ok(Self {
            model: config.model_id.clone(),
            tokens: CopilotTokenManager::new(oauth),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            thinking: config.thinking.clone(),
            context_limit: config.context_limit,
            parallel_tool_calls: config.parallel_tool_calls,
            client: http_client(),
        })
    }

    /// `user` when the human spoke last, `agent` when the model is iterating
    /// on its own tool results.
    fn infer_initiator(input: &[ConversationItem]) -> &'static str {
        for item in input.iter().rev() {
            match item {
                ConversationItem::User(_) | ConversationItem::Developer(_) => return "user",
                ConversationItem::Assistant(_)
                | ConversationItem::ToolCall(_)
                | ConversationItem::ToolResult(_) => return "agent",
                _ => continue,
            }
        }
        "user"
    }

    fn has_vision_input(input: &[ConversationItem]) -> bool {
        input.iter().any(|item| match item {
            ConversationItem::User(m) => m.images.as_ref().map(|i| !i.is_empty()).unwrap_or(false),
            ConversationItem::ToolResult(r) => {
                r.images.as_ref().map(|i| !i.is_empty()).unwrap_or(false)
            }
            _ => false,
        })
    }

    async fn send(
        &self,
        path: &str,
        body: &serde_json::Value,
        param: &LlmCallParameter,
        input_items: &[ConversationItem],
    ) -> Result<reqwest::Response, String> {
        for attempt in 0..2 {
            let (token, base) = match self.tokens.token().await {
                Ok(pair) => pair,
                Err(e) => return Err(format!("Copilot auth failed: {e}")),
            };
            let mut request = self
                .client
                .post(format!("{base}{path}"))
                .bearer_auth(token)
                .header("X-Initiator", Self::infer_initiator(input_items))
                .header("Openai-Intent", "conversation-edits");
            for (name, value) in STATIC_HEADERS {
                request = request.header(*name, *value);
            }
            if path == "/responses" {
                request = request.header("OpenAI-Beta", "responses=experimental");
            }
            if Self::has_vision_input(input_items) {
                request = request.header("Copilot-Vision-Request", "true");
            }
            if let Some(session_id) = &param.session_id {
                request = request
                    .header("conversation_id", session_id)
                    .header("session_id", session_id);
            }
            let resp = match request.json(body).send().await {
                Ok(r) => r,
                Err(e) => return Err(format!("Copilot request failed: {e}")),
            };
            if resp.status() == reqwest::StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!("Copilot API token rejected; refreshing and retrying once");
                self.tokens.invalidate().await;
                continue;
            }
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(format!("Copilot error {status}: {text}"));
            }
            return Ok(resp);
        }
        Err("Copilot request failed after token refresh".into())
    }
}

#[async_trait]
impl LlmClient for CopilotClient {
    fn protocol(&self) -> Protocol {
        Protocol::Copilot
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }

    async fn call(&self, param: LlmCallParameter) -> ResponseStream {
        let input_items = images::resolve_input_images(param.input.clone()).await;
        let thinking = param.thinking.as_ref().or(self.thinking.as_ref());
        let context_limit = param.context_limit.or(self.context_limit);

        if is_claude_model(&self.model) {
            let body = anthropic::build_request_body(
                &input_items,
                param.system.as_deref(),
                &param.tools,
                &self.model,
                param.max_tokens.or(self.max_tokens),
                param.temperature.or(self.temperature),
                thinking,
            );
            match self.send("/v1/messages", &body, &param, &input_items).await {
                Ok(resp) => drive_sse(resp, AnthropicEventHandler::new(&self.model, context_limit)),
                Err(e) => error_stream(&self.model, e),
            }
        } else {
            let body = responses::build_request_body(
                &input_items,
                param.system.as_deref(),
                &param.tools,
                &self.model,
                // The Copilot codex-style endpoint rejects these knobs.
                None,
                None,
                thinking,
                self.parallel_tool_calls,
            );
            match self.send("/responses", &body, &param, &input_items).await {
                Ok(resp) => drive_sse(resp, ResponsesEventHandler::new(&self.model, context_limit)),
                Err(e) => error_stream(&self.model, e),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
