//! Model Context Protocol (MCP) dispatch and JSON-RPC envelopes
//!
//! Frames are decoded and answered here; the session decides what is allowed.

pub mod handler;
pub mod rpc;
pub mod server;
