//! The tool set bound to the runtime, plus the dispatch helper the
//! agent loop uses.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pal_domain::message::{ToolCall, ToolDefinition};
use pal_domain::tool::{Tool, ToolOutcome};

/// All tools enabled for this runtime, keyed by name.
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions advertised to the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Execute one tool call. A missing tool or a tool-reported failure
/// becomes an error outcome rather than aborting the turn.
pub async fn dispatch_tool(tools: &ToolSet, call: &ToolCall, ct: CancellationToken) -> ToolOutcome {
    let Some(tool) = tools.get(&call.tool_name) else {
        return ToolOutcome::Error(format!("unknown tool: {}", call.tool_name));
    };
    let outcome = tool.invoke(call.arguments.clone(), ct).await;
    if outcome.is_error() {
        tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, "tool reported error");
    }
    outcome
}
