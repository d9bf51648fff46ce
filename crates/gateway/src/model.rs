//! Development model.
//!
//! Concrete LLM providers live outside this repository; the server
//! binary falls back to this echo model so the full pipeline (intake,
//! streaming, buffering, routing, resume) can be exercised without
//! one.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pal_domain::error::{Error, Result};
use pal_domain::message::{ChatMessage, Role, ToolDefinition};
use pal_domain::model::{BoxStream, LanguageModel, ModelUpdate};

pub struct DevEchoModel;

#[async_trait::async_trait]
impl LanguageModel for DevEchoModel {
    async fn prompt(
        &self,
        messages: Vec<ChatMessage>,
        _tools: Vec<ToolDefinition>,
        _temperature: Option<f32>,
        ct: CancellationToken,
    ) -> Result<BoxStream<'static, Result<ModelUpdate>>> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let message_id = Uuid::new_v4().to_string();

        let stream = async_stream::stream! {
            // Word-by-word echo keeps the streaming path honest.
            for word in last_user.split_inclusive(' ') {
                if ct.is_cancelled() {
                    yield Err(Error::Cancelled);
                    return;
                }
                yield Ok(ModelUpdate::content(word).with_message_id(&message_id));
            }
            yield Ok(ModelUpdate::terminal().with_message_id(&message_id));
        };
        Ok(stream.boxed())
    }

    fn model_id(&self) -> &str {
        "dev/echo"
    }
}
