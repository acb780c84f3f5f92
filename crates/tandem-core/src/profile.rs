// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent profiles: the immutable bundle of client, prompt, tools, and
//! reminders an agent runs with, plus the sub-agent profile registry.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use tandem_model::LlmClient;
use tandem_protocol::{
    SubAgentState, ToolCallItem, ToolResultItem, ToolResultUiExtra, ToolSchema,
};
use tandem_tools::{builtin_registry, names, Tool, ToolContext, ToolRegistry};

use crate::prompts;
use crate::reminders::{main_agent_reminders, Reminder};

/// Immutable bundle describing how an agent talks to its model.
///
/// `tools` is what the model sees; `registry` is what executes.  The two
/// can differ (a sub-agent's registry omits the sub-agent tools entirely).
#[derive(Clone)]
pub struct AgentProfile {
    pub llm_client: Arc<dyn LlmClient>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSchema>,
    pub reminders: Vec<Reminder>,
    pub registry: Arc<ToolRegistry>,
    /// Set when a `report_back` schema wraps this profile.
    pub structured_output: bool,
}

// ─── Sub-agent profile registry ───────────────────────────────────────────────

type PromptBuilder = fn(&Value) -> String;
type ModelFilter = fn(&str) -> bool;

/// Registry entry describing one sub-agent type.
pub struct SubAgentProfile {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
    pub tool_set: &'static [&'static str],
    pub prompt_builder: PromptBuilder,
    pub system_prompt: &'static str,
    pub active_form: &'static str,
    pub enabled_by_default: bool,
    pub show_in_main_agent: bool,
    pub target_model_filter: Option<ModelFilter>,
}

impl SubAgentProfile {
    pub fn enabled_for_model(&self, model_name: &str) -> bool {
        if !self.enabled_by_default {
            return false;
        }
        match self.target_model_filter {
            Some(filter) => filter(model_name),
            None => true,
        }
    }
}

fn default_prompt_builder(args: &Value) -> String {
    args["prompt"].as_str().unwrap_or("").to_string()
}

fn oracle_prompt_builder(args: &Value) -> String {
    let context = args["context"].as_str().unwrap_or("");
    let task = args["task"].as_str().unwrap_or("");
    let mut prompt = format!("Context: {context}\n\nTask: {task}\n");
    if let Some(files) = args["files"].as_array() {
        let listing: Vec<String> = files
            .iter()
            .filter_map(|f| f.as_str())
            .map(|f| format!("@{f}"))
            .collect();
        if !listing.is_empty() {
            prompt.push_str(&format!("\nRelated files to review:\n{}", listing.join("\n")));
        }
    }
    prompt
}

fn explore_prompt_builder(args: &Value) -> String {
    let prompt = args["prompt"].as_str().unwrap_or("").trim();
    let thoroughness = args["thoroughness"].as_str().unwrap_or("medium");
    format!("{prompt}\nthoroughness: {thoroughness}")
}

fn web_fetch_prompt_builder(args: &Value) -> String {
    let url = args["url"].as_str().unwrap_or("");
    let prompt = args["prompt"].as_str().unwrap_or("");
    format!("URL to fetch: {url}\nTask: {prompt}")
}

fn description_and_prompt_parameters(extra: Value) -> Value {
    let mut base = json!({
        "type": "object",
        "properties": {
            "description": {
                "type": "string",
                "description": "A short (3-5 word) description of the task"
            },
            "prompt": {
                "type": "string",
                "description": "The task for the agent to perform"
            }
        },
        "required": ["description", "prompt"],
        "additionalProperties": false
    });
    if let Some(extra_props) = extra.as_object() {
        for (key, value) in extra_props {
            base["properties"][key] = value.clone();
        }
    }
    base
}

/// All registered sub-agent profiles.
pub fn sub_agent_profiles() -> &'static [SubAgentProfile] {
    static PROFILES: OnceLock<Vec<SubAgentProfile>> = OnceLock::new();
    PROFILES.get_or_init(|| {
        vec![
            SubAgentProfile {
                name: "Task",
                description: "Launch a new agent to handle complex, multi-step tasks \
                    autonomously. Each invocation is stateless: give the agent a highly \
                    detailed task description and state exactly what it should return in \
                    its final message. Launch multiple agents concurrently whenever \
                    possible by putting several tool calls in one message. Pass an \
                    existing agentId as `resume` to continue a previous agent's work.",
                parameters: description_and_prompt_parameters(json!({
                    "resume": {
                        "type": "string",
                        "description": "Session id of a previous agent to resume"
                    }
                })),
                tool_set: &[names::BASH, names::READ, names::EDIT, names::WRITE],
                prompt_builder: default_prompt_builder,
                system_prompt: prompts::TASK_AGENT_PROMPT,
                active_form: "Tasking",
                enabled_by_default: true,
                show_in_main_agent: true,
                target_model_filter: None,
            },
            SubAgentProfile {
                name: "Oracle",
                description: "Consult the Oracle - an advisor powered by a strong \
                    reasoning model for code review, architecture feedback, debugging \
                    across multiple files, and planning complex implementations. Provide \
                    the task, optional context, and the files involved. Not for simple \
                    reading or searching; use Read or Explore for that.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "description": {
                            "type": "string",
                            "description": "A short (3-5 word) description of the task"
                        },
                        "task": {
                            "type": "string",
                            "description": "The task or question for the Oracle"
                        },
                        "context": {
                            "type": "string",
                            "description": "Background about the situation and what you have tried"
                        },
                        "files": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "File paths the Oracle should examine"
                        }
                    },
                    "required": ["task", "description"],
                    "additionalProperties": false
                }),
                tool_set: &[names::READ, names::BASH],
                prompt_builder: oracle_prompt_builder,
                system_prompt: prompts::ORACLE_AGENT_PROMPT,
                active_form: "Consulting Oracle",
                enabled_by_default: true,
                show_in_main_agent: true,
                target_model_filter: Some(|model| {
                    !model.contains("gpt-5") && !model.contains("gemini-3")
                }),
            },
            SubAgentProfile {
                name: "Explore",
                description: "Spin up a fast agent specialized for exploring codebases: \
                    finding files by pattern, searching code for keywords, and answering \
                    questions about how things work. Specify the desired thoroughness \
                    (quick, medium, very thorough). Spawn multiple explore agents in \
                    parallel to maximise speed.",
                parameters: description_and_prompt_parameters(json!({
                    "thoroughness": {
                        "type": "string",
                        "enum": ["quick", "medium", "very thorough"],
                        "description": "How deep the agent should search"
                    }
                })),
                tool_set: &[names::BASH, names::READ],
                prompt_builder: explore_prompt_builder,
                system_prompt: prompts::EXPLORE_AGENT_PROMPT,
                active_form: "Exploring",
                enabled_by_default: true,
                show_in_main_agent: true,
                target_model_filter: Some(|model| {
                    !model.contains("haiku") && !model.contains("kimi") && !model.contains("grok")
                }),
            },
            SubAgentProfile {
                name: "WebFetchAgent",
                description: "Launch a sub-agent to fetch and analyze web content. \
                    Provide the URL and clear instructions for what to extract. Large \
                    pages may be truncated with the full content saved to a file the \
                    agent can search.",
                parameters: description_and_prompt_parameters(json!({
                    "url": {
                        "type": "string",
                        "description": "The URL to fetch and analyze"
                    }
                })),
                tool_set: &[names::BASH, names::READ],
                prompt_builder: web_fetch_prompt_builder,
                system_prompt: prompts::WEB_FETCH_AGENT_PROMPT,
                active_form: "Fetching Web",
                enabled_by_default: true,
                show_in_main_agent: true,
                target_model_filter: None,
            },
        ]
    })
}

pub fn get_sub_agent_profile(sub_agent_type: &str) -> Option<&'static SubAgentProfile> {
    sub_agent_profiles().iter().find(|p| p.name == sub_agent_type)
}

// ─── Sub-agent tool ───────────────────────────────────────────────────────────

/// The tool surface of one sub-agent profile: invoking it runs a nested
/// agent through the context's [`tandem_tools::SubAgentRunner`].
pub struct SubAgentTool {
    profile: &'static SubAgentProfile,
}

impl SubAgentTool {
    pub fn new(profile: &'static SubAgentProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        self.profile.name
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.profile.name.into(),
            description: self.profile.description.into(),
            parameters: self.profile.parameters.clone(),
        }
    }

    async fn call(&self, call: &ToolCallItem, ctx: &ToolContext) -> ToolResultItem {
        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => return ToolResultItem::error(format!("Invalid arguments: {e}")),
        };
        let Some(runner) = ctx.sub_agents.clone() else {
            return ToolResultItem::error("Sub-agents are not available in this context.");
        };

        let state = SubAgentState {
            sub_agent_type: self.profile.name.to_string(),
            sub_agent_desc: args["description"].as_str().unwrap_or("").to_string(),
            sub_agent_prompt: (self.profile.prompt_builder)(&args),
            resume: args["resume"].as_str().map(str::to_string),
            output_schema: None,
        };

        let result = runner.run(state, &call.call_id, &ctx.partial_reports).await;
        let mut item = if result.error {
            ToolResultItem::error(result.task_result)
        } else {
            ToolResultItem::success(result.task_result)
        };
        if !result.session_id.is_empty() {
            item = item.with_ui_extra(ToolResultUiExtra::SessionId {
                session_id: result.session_id,
            });
        }
        item.task_metadata = result.task_metadata;
        item
    }
}

// ─── report_back tool ─────────────────────────────────────────────────────────

/// Structured-output terminator for sub-agents: echoes its arguments, which
/// the sub-agent manager extracts as the task result.
pub struct ReportBackTool {
    schema: Value,
}

impl ReportBackTool {
    pub const NAME: &'static str = "report_back";

    pub fn for_schema(schema: Value) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Tool for ReportBackTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "Report the final structured result of this task. Call this \
                exactly once, when the task is complete."
                .into(),
            parameters: self.schema.clone(),
        }
    }

    async fn call(&self, call: &ToolCallItem, _ctx: &ToolContext) -> ToolResultItem {
        match serde_json::from_str::<Value>(&call.arguments) {
            Ok(_) => ToolResultItem::success("Result recorded."),
            Err(e) => ToolResultItem::error(format!("Invalid arguments: {e}")),
        }
    }
}

// ─── Profile providers ────────────────────────────────────────────────────────

/// Strategy for building agent profiles.
pub trait ModelProfileProvider: Send + Sync {
    fn build_profile(
        &self,
        llm_client: Arc<dyn LlmClient>,
        sub_agent_type: Option<&str>,
        output_schema: Option<Value>,
    ) -> AgentProfile;
}

const MAIN_TOOL_NAMES: &[&str] = &[
    names::BASH,
    names::READ,
    names::EDIT,
    names::MULTI_EDIT,
    names::WRITE,
    names::APPLY_PATCH,
    names::TODO_WRITE,
    names::ASK_USER_QUESTION,
];

fn with_structured_output(mut profile: AgentProfile, output_schema: Value) -> AgentProfile {
    let report_back = ReportBackTool::for_schema(output_schema);
    profile.tools.push(report_back.schema());
    let mut registry = builtin_subset_registry(&profile.tools);
    registry.register(report_back);
    profile.registry = Arc::new(registry);
    profile.system_prompt = Some(format!(
        "{}{}",
        profile.system_prompt.unwrap_or_default(),
        prompts::STRUCTURED_OUTPUT_PROMPT
    ));
    profile.structured_output = true;
    profile
}

fn builtin_subset_registry(tools: &[ToolSchema]) -> ToolRegistry {
    let builtin = builtin_registry();
    let mut registry = ToolRegistry::new();
    for schema in tools {
        if let Some(tool) = builtin.get(&schema.name) {
            registry.register_arc(tool);
        }
    }
    registry
}

/// Default provider: full prompt, full tool set, sub-agent tools filtered by
/// model, main-agent reminders.
pub struct DefaultModelProfileProvider {
    work_dir: std::path::PathBuf,
}

impl DefaultModelProfileProvider {
    pub fn new(work_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { work_dir: work_dir.into() }
    }
}

impl ModelProfileProvider for DefaultModelProfileProvider {
    fn build_profile(
        &self,
        llm_client: Arc<dyn LlmClient>,
        sub_agent_type: Option<&str>,
        output_schema: Option<Value>,
    ) -> AgentProfile {
        let model_name = llm_client.model_name().to_string();

        let profile = match sub_agent_type.and_then(get_sub_agent_profile) {
            Some(sub) => {
                let registry = builtin_registry();
                let tools = registry.schema_subset(sub.tool_set);
                AgentProfile {
                    llm_client,
                    system_prompt: Some(sub.system_prompt.to_string()),
                    registry: Arc::new(builtin_subset_registry(&tools)),
                    tools,
                    reminders: Vec::new(),
                    structured_output: false,
                }
            }
            None => {
                let mut registry = builtin_registry();
                let mut tools = registry.schema_subset(MAIN_TOOL_NAMES);
                for sub in sub_agent_profiles() {
                    if sub.show_in_main_agent && sub.enabled_for_model(&model_name) {
                        let tool = SubAgentTool::new(sub);
                        tools.push(tool.schema());
                        registry.register(tool);
                    }
                }
                let system_prompt = format!(
                    "{}{}",
                    prompts::MAIN_SYSTEM_PROMPT,
                    prompts::build_env_info(&self.work_dir, &model_name)
                );
                AgentProfile {
                    llm_client,
                    system_prompt: Some(system_prompt),
                    tools,
                    reminders: main_agent_reminders(),
                    registry: Arc::new(registry),
                    structured_output: false,
                }
            }
        };
        match output_schema {
            Some(schema) => with_structured_output(profile, schema),
            None => profile,
        }
    }
}

/// Image-generation provider: dedicated prompt, no tools, no reminders.
pub struct NanoBananaModelProfileProvider;

impl ModelProfileProvider for NanoBananaModelProfileProvider {
    fn build_profile(
        &self,
        llm_client: Arc<dyn LlmClient>,
        _sub_agent_type: Option<&str>,
        output_schema: Option<Value>,
    ) -> AgentProfile {
        let profile = AgentProfile {
            llm_client,
            system_prompt: Some(prompts::NANO_BANANA_SYSTEM_PROMPT.to_string()),
            tools: Vec::new(),
            reminders: Vec::new(),
            registry: Arc::new(ToolRegistry::new()),
            structured_output: false,
        };
        match output_schema {
            Some(schema) => with_structured_output(profile, schema),
            None => profile,
        }
    }
}

/// Vanilla provider: no prompt, no reminders, the bare file/shell tool set.
pub struct VanillaModelProfileProvider;

impl ModelProfileProvider for VanillaModelProfileProvider {
    fn build_profile(
        &self,
        llm_client: Arc<dyn LlmClient>,
        _sub_agent_type: Option<&str>,
        output_schema: Option<Value>,
    ) -> AgentProfile {
        let registry = builtin_registry();
        let tools = registry.schema_subset(&[names::BASH, names::EDIT, names::WRITE, names::READ]);
        let profile = AgentProfile {
            llm_client,
            system_prompt: None,
            registry: Arc::new(builtin_subset_registry(&tools)),
            tools,
            reminders: Vec::new(),
            structured_output: false,
        };
        match output_schema {
            Some(schema) => with_structured_output(profile, schema),
            None => profile,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
