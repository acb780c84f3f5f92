// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-response usage and timing accounting shared by every adapter.

use std::time::Instant;

use tandem_protocol::{ResponseMetadataItem, Usage};

/// Minimum stream duration before a throughput figure is trustworthy.
const THROUGHPUT_MIN_DURATION_S: f64 = 0.15;

/// Tracks request timing and token usage across one streamed response and
/// produces the terminal [`ResponseMetadataItem`].
#[derive(Debug)]
pub struct MetadataTracker {
    request_start: Instant,
    first_token: Option<Instant>,
    last_token: Option<Instant>,
    usage: Usage,
    model_name: String,
    provider: Option<String>,
    response_id: Option<String>,
    status: Option<String>,
    context_limit: Option<u64>,
}

impl MetadataTracker {
    pub fn new(model_name: impl Into<String>, context_limit: Option<u64>) -> Self {
        Self {
            request_start: Instant::now(),
            first_token: None,
            last_token: None,
            usage: Usage::default(),
            model_name: model_name.into(),
            provider: None,
            response_id: None,
            status: None,
            context_limit,
        }
    }

    /// Record the arrival of a streamed token (text, reasoning, or tool
    /// arguments).  Drives first-token latency and throughput.
    pub fn record_token(&mut self) {
        let now = Instant::now();
        if self.first_token.is_none() {
            self.first_token = Some(now);
        }
        self.last_token = Some(now);
    }

    /// Replace the token counters with a complete usage report (protocols
    /// that send usage once, in the final chunk).
    pub fn set_usage(&mut self, usage: Usage) {
        let window = usage.context_window_size.or(self.usage.context_window_size);
        self.usage = usage;
        self.usage.context_window_size = window;
    }

    /// Additively merge a partial usage report (protocols that spread usage
    /// across `message_start` / `message_delta` events).
    pub fn add_usage(&mut self, usage: &Usage) {
        self.usage.accumulate(usage);
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn set_model_name(&mut self, model_name: impl Into<String>) {
        self.model_name = model_name.into();
    }

    pub fn set_provider(&mut self, provider: impl Into<String>) {
        self.provider = Some(provider.into());
    }

    pub fn set_response_id(&mut self, response_id: Option<String>) {
        self.response_id = response_id;
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    /// Build the terminal metadata item.  Computes first-token latency and,
    /// when the stream ran long enough to be meaningful, throughput.
    pub fn finalize(mut self) -> ResponseMetadataItem {
        if let Some(first) = self.first_token {
            self.usage.first_token_latency_ms =
                Some(first.duration_since(self.request_start).as_secs_f64() * 1000.0);
            if let Some(last) = self.last_token {
                let duration = last.duration_since(first).as_secs_f64();
                if duration >= THROUGHPUT_MIN_DURATION_S && self.usage.output_tokens > 0 {
                    self.usage.throughput_tps = Some(self.usage.output_tokens as f64 / duration);
                }
            }
        }
        self.usage.context_limit = self.context_limit;
        if self.usage.context_window_size.is_none() {
            // Fall back to the accumulated view of this response.
            self.usage.context_window_size =
                Some(self.usage.input_tokens + self.usage.cached_tokens + self.usage.output_tokens);
        }
        ResponseMetadataItem {
            response_id: self.response_id,
            usage: Some(self.usage),
            model_name: self.model_name,
            provider: self.provider,
            status: self.status,
            created_at: chrono::Utc::now(),
        }
    }
}
