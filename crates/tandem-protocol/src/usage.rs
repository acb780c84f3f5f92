// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token usage for one provider response.
///
/// Primary state is the four token counters; totals and the context
/// percentage are computed so accumulation never double-books them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub reasoning_tokens: u64,
    pub output_tokens: u64,
    /// Peak total tokens seen this response, per the provider's own
    /// definition (Responses reports it directly; Anthropic accumulates
    /// input + cache + output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_tps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_token_latency_ms: Option<f64>,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Context usage as a percentage, when the context limit is known.
    pub fn context_usage_percent(&self) -> Option<f64> {
        let limit = self.context_limit?;
        if limit == 0 {
            return None;
        }
        let window = self.context_window_size?;
        Some((window as f64 / limit as f64) * 100.0)
    }

    /// Add another usage's token counters into this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.cached_tokens += other.cached_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.output_tokens += other.output_tokens;
        if other.context_window_size.is_some() {
            self.context_window_size = other.context_window_size;
        }
        if other.context_limit.is_some() {
            self.context_limit = other.context_limit;
        }
    }
}

/// Metadata for one task execution, for the main agent or a sub-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_duration_s: Option<f64>,
    /// Set on sub-agent entries: which sub-agent type produced this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskMetadata {
    pub fn for_model(model_name: impl Into<String>) -> Self {
        Self { model_name: model_name.into(), ..Default::default() }
    }

    /// Aggregate a list of metadata by `(model_name, provider)`, summing the
    /// primary token counters.  Sorted by total tokens descending.
    pub fn aggregate_by_model(metadata: &[TaskMetadata]) -> Vec<TaskMetadata> {
        let mut grouped: HashMap<(String, Option<String>), TaskMetadata> = HashMap::new();
        for meta in metadata {
            let Some(usage) = &meta.usage else { continue };
            let key = (meta.model_name.clone(), meta.provider.clone());
            let entry = grouped.entry(key).or_insert_with(|| TaskMetadata {
                model_name: meta.model_name.clone(),
                provider: meta.provider.clone(),
                usage: Some(Usage::default()),
                ..Default::default()
            });
            if let Some(acc) = entry.usage.as_mut() {
                acc.accumulate(usage);
            }
        }
        let mut out: Vec<TaskMetadata> = grouped.into_values().collect();
        out.sort_by_key(|m| {
            std::cmp::Reverse(m.usage.as_ref().map(Usage::total_tokens).unwrap_or(0))
        });
        out
    }
}

/// Aggregated metadata for one complete task, stored in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskMetadataItem {
    pub main: TaskMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_agent_task_metadata: Vec<TaskMetadata>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
