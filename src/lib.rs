//! A stdio Model Context Protocol server engine.
//!
//! The engine reads JSON-RPC 2.0 envelopes from a single peer, routes them to
//! injected tool, resource and prompt providers, and writes the replies back
//! over the same stream.

pub mod config;
pub mod errors;
pub mod logging;
pub mod mcp;
pub mod providers;
pub mod registry;
pub mod server;
pub mod transport;

pub use errors::AppError;
pub use mcp::dispatch::{Capabilities, Capability, Dispatcher, Providers};
pub use mcp::rpc::{Envelope, ErrorObject, RequestId};
pub use providers::{PromptProvider, ResourceProvider, ToolProvider};
pub use registry::{PromptRegistry, ResourceRegistry, ToolRegistry};
pub use server::{AdmissionPolicy, Server, ServerError, ServerHandle, ServerOptions};
pub use transport::{Framing, HeaderTransport, LineTransport, Transport, TransportError};
