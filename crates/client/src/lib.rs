//! Client-side runtime for the interactive web client.
//!
//! An observable, action-driven state container with per-feature
//! slices ([`slices`]), a render throttle for streaming projections
//! ([`render`]), the message assembly pipeline ([`pipeline`]), and the
//! resume reconciler that merges a reconnecting client's history with
//! the server stream buffer ([`resume`]).

pub mod pipeline;
pub mod render;
pub mod resume;
pub mod slices;
pub mod store;
