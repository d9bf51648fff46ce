//! The tool contract.
//!
//! Tool failures are data, not exceptions: [`ToolOutcome`] is a sum
//! type the agent loop pattern-matches, and an `Error` outcome becomes
//! a structured tool-result message the LLM sees on the next call.

use tokio_util::sync::CancellationToken;

use crate::message::ToolDefinition;

/// The result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Text(String),
    Json(serde_json::Value),
    Error(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }

    /// Render the outcome as the content of a tool-result message.
    pub fn into_content(self) -> String {
        match self {
            ToolOutcome::Text(text) => text,
            ToolOutcome::Json(value) => value.to_string(),
            ToolOutcome::Error(reason) => {
                serde_json::json!({ "status": "error", "error": reason }).to_string()
            }
        }
    }
}

/// Trait every tool implements. Concrete tools (file I/O, HTTP,
/// calendar, search) live outside this repository.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Invoke the tool. Implementations return `ToolOutcome::Error`
    /// for their own failures instead of bubbling an `Err`; the `ct`
    /// must be honored for long-running work.
    async fn invoke(&self, arguments: serde_json::Value, ct: CancellationToken) -> ToolOutcome;

    /// The definition advertised to the LLM.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_outcome_renders_structured_content() {
        let content = ToolOutcome::Error("disk full".into()).into_content();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "disk full");
    }

    #[test]
    fn text_and_json_outcomes_pass_through() {
        assert_eq!(ToolOutcome::Text("ok".into()).into_content(), "ok");
        assert_eq!(
            ToolOutcome::Json(serde_json::json!({"n": 1})).into_content(),
            r#"{"n":1}"#
        );
    }

    #[test]
    fn only_error_is_error() {
        assert!(ToolOutcome::Error("x".into()).is_error());
        assert!(!ToolOutcome::Text("x".into()).is_error());
        assert!(!ToolOutcome::Json(serde_json::Value::Null).is_error());
    }
}
