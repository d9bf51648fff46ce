//! The LLM contract — the single seam between the runtime and any
//! concrete model provider.

use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::{ChatMessage, Role, ToolCall, ToolDefinition};

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One streaming update from a provider.
///
/// Providers are free to populate any subset of fields; the runtime
/// tolerates mid-stream `message_id` changes by treating them as the
/// start of a new logical assistant turn.
#[derive(Debug, Clone, Default)]
pub struct ModelUpdate {
    pub role: Option<Role>,
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Marks the final update of the model turn.
    pub terminal: bool,
    /// Provider-assigned message id.
    pub message_id: Option<String>,
    /// Provider-side sequence number, when exposed.
    pub sequence: Option<u64>,
}

impl ModelUpdate {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::default()
        }
    }

    pub fn terminal() -> Self {
        Self {
            terminal: true,
            ..Self::default()
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Trait every model adapter implements.
///
/// The runtime drives the turn loop exclusively through this contract;
/// concrete HTTP providers live outside this repository.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stream a completion for the given conversation snapshot.
    ///
    /// Implementations must honor `ct` cooperatively: a cancelled token
    /// ends the stream early with `Error::Cancelled`.
    async fn prompt(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
        ct: CancellationToken,
    ) -> Result<BoxStream<'static, Result<ModelUpdate>>>;

    /// A unique identifier for this model instance.
    fn model_id(&self) -> &str;
}
