use serde::{Deserialize, Serialize};

/// The transport a prompt originated from. Pinned on the envelope at
/// ingest and copied onto every chunk emitted for that turn; drives the
/// response routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    WebUi,
    ServiceBus,
    Telegram,
    Cli,
}

impl Source {
    /// The web UI mirrors every conversation regardless of origin.
    pub fn is_observer(self) -> bool {
        self == Source::WebUi
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Source::WebUi => "webUi",
            Source::ServiceBus => "serviceBus",
            Source::Telegram => "telegram",
            Source::Cli => "cli",
        };
        f.write_str(s)
    }
}

/// A prompt on its way into the runtime. Receivers may allocate the
/// conversation/thread/agent ids when the transport leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEnvelope {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Message ordering within the originating transport.
    pub sequence: u64,
    pub sender_id: String,
    pub source: Source,
}

impl PromptEnvelope {
    pub fn new(prompt: impl Into<String>, sender_id: impl Into<String>, source: Source) -> Self {
        Self {
            prompt: prompt.into(),
            conversation_id: None,
            thread_id: None,
            agent_id: None,
            sequence: 0,
            sender_id: sender_id.into(),
            source,
        }
    }
}
