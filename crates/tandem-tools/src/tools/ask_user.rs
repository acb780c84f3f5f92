// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tandem_protocol::{ToolCallItem, ToolResultItem, ToolSchema};

use crate::context::{Question, ToolContext};
use crate::names::ASK_USER_QUESTION;
use crate::tool::Tool;

#[derive(Debug, Deserialize)]
struct AskUserArguments {
    questions: Vec<Question>,
}

pub struct AskUserQuestionTool;

#[async_trait]
impl Tool for AskUserQuestionTool {
    fn name(&self) -> &str {
        ASK_USER_QUESTION
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: ASK_USER_QUESTION.into(),
            description: "Asks the user one or more questions and waits for their answer. \
                Use this when a decision genuinely requires user input (choosing between \
                approaches, confirming a risky assumption) rather than guessing. Each \
                question may offer predefined options; the user can always answer in free \
                text."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "questions": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "question": { "type": "string" },
                                "options": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "properties": {
                                            "label": { "type": "string" },
                                            "description": { "type": "string" }
                                        },
                                        "required": ["label"],
                                        "additionalProperties": false
                                    }
                                },
                                "multi_select": { "type": "boolean", "default": false }
                            },
                            "required": ["question"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["questions"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: AskUserArguments = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        if args.questions.is_empty() {
            return ToolResultItem::error("<tool_use_error>No questions provided.</tool_use_error>");
        }
        let Some(interaction) = ctx.user_interaction.clone() else {
            return ToolResultItem::error(
                "User interaction is not available in this context.",
            );
        };

        let cancel = ctx.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResultItem::error("Interrupted"),
            answer = interaction.ask(args.questions) => match answer {
                Some(answer) => ToolResultItem::success(format!("User answered: {answer}")),
                None => ToolResultItem::error("User dismissed the question."),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
