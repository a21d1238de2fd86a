//! HTTP binding for the Model Context Protocol
//!
//! Maps `/mcp` requests onto sessions and exposes the public metadata endpoints.

pub mod handlers;
pub mod store;

pub use store::SessionStore;
