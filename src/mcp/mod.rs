//! The MCP protocol layer
//!
//! `rpc` parses and serializes JSON-RPC 2.0 envelopes, `protocol` holds the
//! typed MCP payloads, and `dispatch` routes requests to the wired providers,
//! logging each call with params masked by `audit`.

pub mod audit;
pub mod dispatch;
pub mod protocol;
pub mod rpc;
