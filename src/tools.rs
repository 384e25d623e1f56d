//! Tool registry and tool-call round-trip plumbing
//!
//! A response may embed fenced invocation blocks naming a tool and a
//! payload. The runner parses every block, executes them in document
//! order, and feeds the results back to the backend in a single follow-up
//! call.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

/// An executable capability exposed to tasks by name.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Run the tool on a raw text payload.
    fn execute(&self, input: &str) -> anyhow::Result<String>;
}

/// Explicit tool registry, handed to the engine at construction time.
/// Register once, look up by name; toolset members are registered under
/// `<set>.<tool>` names and resolved by prefix.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the builtin tools.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(crate::builtin::FileTool));
        registry.register(Arc::new(crate::builtin::CalcTool));
        registry
    }

    /// Add a tool under its own name, replacing any previous registration.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Resolve an explicit tool list; unknown names fail the whole lookup.
    pub fn by_names(&self, names: &[String]) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        let tools = self.tools.read();
        let mut result = Vec::with_capacity(names.len());
        for name in names {
            match tools.get(name) {
                Some(tool) => result.push(Arc::clone(tool)),
                None => anyhow::bail!("tool not found: {name}"),
            }
        }
        Ok(result)
    }

    /// All tools whose name starts with `prefix`, e.g. `"web."` for the
    /// members of the `web` toolset.
    pub fn by_prefix(&self, prefix: &str) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.read();
        let mut result: Vec<_> = tools
            .iter()
            .filter(|(name, _)| name.len() > prefix.len() && name.starts_with(prefix))
            .map(|(_, tool)| Arc::clone(tool))
            .collect();
        result.sort_by(|a, b| a.name().cmp(b.name()));
        result
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Execute parsed calls in document order. An unknown tool name
    /// produces a per-call error without stopping the rest.
    pub fn execute_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        calls
            .iter()
            .map(|call| {
                let outcome = match self.get(&call.name) {
                    Some(tool) => {
                        debug!(tool = %call.name, "Executing tool");
                        tool.execute(&call.input)
                    }
                    None => Err(anyhow::anyhow!("unknown tool: {}", call.name)),
                };
                ToolResult {
                    tool: call.name.clone(),
                    outcome,
                }
            })
            .collect()
    }
}

/// A parsed tool invocation from a backend response
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub input: String,
}

/// Result of one tool execution
#[derive(Debug)]
pub struct ToolResult {
    pub tool: String,
    pub outcome: anyhow::Result<String>,
}

const BLOCK_MARKER: &str = "```tool:";

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```tool:([A-Za-z_][A-Za-z0-9_.]*)\n(.*?)```").expect("valid block regex")
    })
}

/// Fast check for the invocation marker before paying for a full parse.
pub fn has_tool_calls(response: &str) -> bool {
    response.contains(BLOCK_MARKER)
}

/// Extract every invocation block, in document order.
pub fn parse_tool_calls(response: &str) -> Vec<ToolCall> {
    block_regex()
        .captures_iter(response)
        .map(|cap| ToolCall {
            name: cap[1].trim().to_string(),
            input: cap[2].trim().to_string(),
        })
        .collect()
}

/// Render execution results as a single block for the follow-up prompt.
pub fn format_results(results: &[ToolResult]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n\n=== Tool Results ===\n");
    for result in results {
        out.push_str(&format!("\n[{}]:\n", result.tool));
        match &result.outcome {
            Ok(output) => {
                out.push_str(output);
                out.push('\n');
            }
            Err(err) => out.push_str(&format!("ERROR: {err}\n")),
        }
    }
    out
}

/// Describe the given tools for a prompt: name, description, and the exact
/// invocation syntax the backend must emit.
pub fn format_for_prompt(tools: &[Arc<dyn Tool>]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut out = String::from("You have access to the following tools:\n\n");
    for tool in tools {
        out.push_str(&format!("- **{}**: {}\n", tool.name(), tool.description()));
    }
    out.push_str("\nTo use a tool, write your response in this format:\n");
    out.push_str("```tool:<tool_name>\n<input for the tool>\n```\n");
    out.push_str("\nThe tool output will be provided to you for further processing.\n");
    out
}
