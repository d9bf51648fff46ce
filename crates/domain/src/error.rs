//! Shared error taxonomy for all palaver crates.
//!
//! Cancellation is a first-class variant rather than an exception:
//! [`Error::is_transient_cancellation`] is the single classifier the
//! runtime uses to decide whether a failed turn is silently
//! interrupted (resumable) or surfaced to the user as an error chunk.

/// Case-insensitive fragments that mark a provider-wrapped error as a
/// transient cancellation. Matching by type is preferred; this set is
/// the fallback for errors that only carry text.
const TRANSIENT_CANCEL_PATTERNS: &[&str] = &[
    "operationcanceled",
    "taskcanceled",
    "operation was canceled",
];

/// Reasons an inbound queue message is dead-lettered instead of being
/// turned into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// A required envelope field was absent or empty.
    MissingField,
    /// The `agentId` does not match any configured agent.
    InvalidAgentId,
    /// The payload was not valid JSON.
    DeserializationError,
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeadLetterReason::MissingField => "MissingField",
            DeadLetterReason::InvalidAgentId => "InvalidAgentId",
            DeadLetterReason::DeserializationError => "DeserializationError",
        };
        f.write_str(s)
    }
}

/// Shared error type used across all palaver crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("session registry is closed")]
    RegistryClosed,

    #[error("session faulted: {0}")]
    SessionFaulted(String),

    #[error("agent loop exceeded depth limit ({0})")]
    AgentLoopLimit(usize),

    #[error("provider: {0}")]
    Provider(String),

    #[error("operation was canceled")]
    Cancelled,

    #[error("transport: {0}")]
    Transport(String),

    #[error("dead-letter: {0}")]
    DeadLetter(DeadLetterReason),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error represents a transient cancellation that
    /// should end the turn silently (interrupted, not failed).
    ///
    /// Type-based matching first; the string set covers errors wrapped
    /// by providers that only preserve message text.
    pub fn is_transient_cancellation(&self) -> bool {
        match self {
            Error::Cancelled => true,
            other => {
                let text = other.to_string().to_lowercase();
                TRANSIENT_CANCEL_PATTERNS.iter().any(|p| text.contains(p))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
