// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming LLM provider adapters.
//!
//! Each adapter normalizes one wire protocol (Anthropic Messages, OpenAI
//! Chat Completions, OpenAI Responses, GitHub Copilot proxy) into the same
//! ordered stream of [`tandem_protocol::ConversationItem`]s.  Adapters are
//! stateless across turns: one `call` is one provider request.

pub mod anthropic;
pub mod client;
pub mod copilot;
pub mod images;
pub mod input;
pub mod mock;
pub mod openai_compat;
pub mod registry;
pub mod responses;
pub mod sse;
pub mod stream_state;
pub mod usage;

pub use client::{LlmCallParameter, LlmClient, ResponseStream};
pub use registry::create_client;
pub use tandem_config::Protocol;
