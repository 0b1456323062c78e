//! Command handlers, grouped by the surface that drives them.
//!
//! Handlers are inherent methods on [`crate::session::Session`]. Each
//! returns a `Result` for the caller to render as a status line, and emits
//! a [`crate::session::SessionEvent`] for every state change.

pub mod scan;
pub mod supervisor;
