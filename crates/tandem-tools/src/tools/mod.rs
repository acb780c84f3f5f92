// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in tools.

mod apply_patch;
mod ask_user;
mod bash;
mod edit;
mod multi_edit;
mod read;
mod todo_write;
mod write;

pub use apply_patch::ApplyPatchTool;
pub use ask_user::AskUserQuestionTool;
pub use bash::BashTool;
pub use edit::EditTool;
pub use multi_edit::MultiEditTool;
pub use read::ReadTool;
pub use todo_write::TodoWriteTool;
pub use write::WriteTool;

pub(crate) mod diff;

use crate::registry::ToolRegistry;

/// Registry pre-loaded with every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ReadTool);
    registry.register(EditTool);
    registry.register(MultiEditTool);
    registry.register(WriteTool);
    registry.register(ApplyPatchTool);
    registry.register(BashTool);
    registry.register(TodoWriteTool);
    registry.register(AskUserQuestionTool);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names;

    #[test]
    fn builtin_registry_contains_every_tool() {
        let registry = builtin_registry();
        for name in [
            names::READ,
            names::EDIT,
            names::MULTI_EDIT,
            names::WRITE,
            names::APPLY_PATCH,
            names::BASH,
            names::TODO_WRITE,
            names::ASK_USER_QUESTION,
        ] {
            assert!(registry.get(name).is_some(), "{name} missing");
        }
    }
}
