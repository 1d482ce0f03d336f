//! Collaborator interfaces injected into the dispatcher
//!
//! Providers may be invoked concurrently from independent handler tasks; any
//! synchronisation they need is their own responsibility.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppError;
use crate::mcp::protocol::{
    CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
};

#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Tool>, AppError>;

    /// Unknown tool names resolve to `CallToolResult::error`, not to `Err`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, AppError>;
}

#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn list_resources(&self) -> Result<Vec<Resource>, AppError>;

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, AppError>;

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, AppError>;
}

#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn list_prompts(&self) -> Result<Vec<Prompt>, AppError>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, AppError>;
}
