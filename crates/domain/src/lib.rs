//! Shared domain types for the palaver chat runtime.
//!
//! Everything wire- and contract-shaped lives here: conversation
//! messages, stream chunks, prompt envelopes, the LLM and tool
//! contracts, persistence contracts, configuration, and the error
//! taxonomy. The gateway, sessions, and client crates all depend on
//! this crate and nothing in it depends on them.

pub mod approval;
pub mod chunk;
pub mod config;
pub mod error;
pub mod key;
pub mod message;
pub mod model;
pub mod persist;
pub mod prompt;
pub mod tool;

pub use error::{Error, Result};
