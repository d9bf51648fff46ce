//! The palaver gateway — prompt intake, agent loop, stream routing.
//!
//! The binary (`src/main.rs`) wires the runtime together; everything
//! here is also usable as a library so tests and embedders can build
//! an [`state::AppState`] with their own model, tools, and transports.

pub mod api;
pub mod cli;
pub mod model;
pub mod runtime;
pub mod state;
pub mod stores;
pub mod transport;
