//! Tool whitelist — decides which tool calls run without approval.
//!
//! Two layers: configured patterns (compiled once into a `RegexSet`,
//! matched against the call signature) and per-session exact
//! signatures installed by `approvedAndRemember` resolutions.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use pal_domain::error::{Error, Result};
use pal_domain::key::SessionKey;
use pal_domain::message::ToolCall;

#[derive(Debug)]
pub struct Whitelist {
    /// Patterns from config, matched against `tool(argsJson)`.
    patterns: regex::RegexSet,
    /// Signatures remembered per session.
    remembered: RwLock<HashMap<SessionKey, HashSet<String>>>,
}

impl Whitelist {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = regex::RegexSet::new(patterns)
            .map_err(|e| Error::Config(format!("invalid whitelist pattern: {e}")))?;
        Ok(Self {
            patterns,
            remembered: RwLock::new(HashMap::new()),
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: regex::RegexSet::empty(),
            remembered: RwLock::new(HashMap::new()),
        }
    }

    /// Whether this call may execute without human approval.
    pub fn allows(&self, key: &SessionKey, call: &ToolCall) -> bool {
        let signature = call.signature();
        if self.patterns.is_match(&signature) {
            return true;
        }
        self.remembered
            .read()
            .get(key)
            .is_some_and(|set| set.contains(&signature))
    }

    /// Install a remembered signature for this session.
    pub fn remember(&self, key: &SessionKey, call: &ToolCall) {
        self.remembered
            .write()
            .entry(key.clone())
            .or_default()
            .insert(call.signature());
    }

    /// Drop all remembered signatures for a session (on clean).
    pub fn forget_session(&self, key: &SessionKey) {
        self.remembered.write().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    fn key() -> SessionKey {
        SessionKey::new(1, 1, "a")
    }

    #[test]
    fn configured_pattern_allows() {
        let wl = Whitelist::new(&[r"^search\(".into()]).unwrap();
        assert!(wl.allows(&key(), &call("search", serde_json::json!({"q": "x"}))));
        assert!(!wl.allows(&key(), &call("deleteAll", serde_json::json!({}))));
    }

    #[test]
    fn remembered_signature_is_per_session_and_per_arguments() {
        let wl = Whitelist::empty();
        let c = call("deploy", serde_json::json!({"env": "prod"}));

        assert!(!wl.allows(&key(), &c));
        wl.remember(&key(), &c);
        assert!(wl.allows(&key(), &c));

        // Different arguments: not covered.
        assert!(!wl.allows(&key(), &call("deploy", serde_json::json!({"env": "dev"}))));
        // Different session: not covered.
        assert!(!wl.allows(&SessionKey::new(2, 1, "a"), &c));
    }

    #[test]
    fn forget_session_clears_rules() {
        let wl = Whitelist::empty();
        let c = call("deploy", serde_json::json!({}));
        wl.remember(&key(), &c);
        wl.forget_session(&key());
        assert!(!wl.allows(&key(), &c));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        assert!(matches!(
            Whitelist::new(&["(unclosed".into()]).unwrap_err(),
            Error::Config(_)
        ));
    }
}
