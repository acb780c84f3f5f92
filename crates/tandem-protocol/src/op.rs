// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::item::ImagePart;

/// Structured user input: text plus optional attached images.
///
/// The one payload shape carried across the UI → executor → agent → task
/// chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInputPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImagePart>>,
}

impl UserInputPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), images: None }
    }
}

/// Operations the UI layer submits to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Load or create a session and register it as an active agent.
    InitAgent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Run a task against a registered agent.
    UserInput {
        session_id: String,
        payload: UserInputPayload,
    },
    /// Cancel the active task on the matching session, or on all sessions
    /// when no target is given.
    Interrupt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_session_id: Option<String>,
    },
}

/// An operation stamped with its submission id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub op: Operation,
}

impl Submission {
    pub fn new(op: Operation) -> Self {
        Self { id: Uuid::new_v4().to_string(), op }
    }
}
