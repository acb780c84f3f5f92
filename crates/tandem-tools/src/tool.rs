// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

use tandem_protocol::{ToolCallItem, ToolResultItem, ToolSchema};

use crate::context::ToolContext;

/// Trait every built-in and sub-agent tool implements.
///
/// `call` receives the finalized tool call (the executor has already checked
/// that `arguments` parses as JSON) and the per-session context.  Tools
/// return error results rather than panicking; the executor wraps anything
/// that still escapes.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> ToolSchema;

    /// Tools that enforce their own output limits (`Read`) skip the shared
    /// truncation layer.
    fn exempt_from_truncation(&self) -> bool {
        false
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem;
}
