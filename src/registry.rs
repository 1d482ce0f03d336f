//! In-memory providers built from registered closures
//!
//! Each registry implements one provider trait so a server can be assembled
//! without writing a provider type by hand. Registration order is the order
//! items are listed in.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppError;
use crate::mcp::protocol::{
    CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
};
use crate::providers::{PromptProvider, ResourceProvider, ToolProvider};

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send>>;

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<CallToolResult> + Send + Sync>;
type ResourceReader = Arc<dyn Fn(String) -> BoxFuture<ReadResourceResult> + Send + Sync>;
type PromptRenderer =
    Arc<dyn Fn(HashMap<String, String>) -> BoxFuture<GetPromptResult> + Send + Sync>;

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool. Registering a name twice replaces the earlier entry.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, AppError>> + Send + 'static,
    {
        let tool = Tool {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        };
        self.tools.retain(|existing| existing.name != tool.name);
        self.handlers.insert(
            tool.name.clone(),
            Arc::new(move |arguments: Value| -> BoxFuture<CallToolResult> {
                Box::pin(handler(arguments))
            }),
        );
        self.tools.push(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<Tool>, AppError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, AppError> {
        let Some(handler) = self.handlers.get(name) else {
            return Ok(CallToolResult::error(format!("unknown tool: {name}")));
        };
        handler(arguments).await
    }
}

/// Static resources keyed by URI, plus templates for parameterized URIs.
///
/// A URI with no exact match is offered to the template whose literal prefix
/// (the text before the first `{`) is the longest match.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Vec<Resource>,
    readers: HashMap<String, ResourceReader>,
    templates: Vec<(ResourceTemplate, ResourceReader)>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource<F, Fut>(&mut self, resource: Resource, reader: F) -> &mut Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult, AppError>> + Send + 'static,
    {
        self.resources.retain(|existing| existing.uri != resource.uri);
        self.readers.insert(
            resource.uri.clone(),
            Arc::new(move |uri: String| -> BoxFuture<ReadResourceResult> {
                Box::pin(reader(uri))
            }),
        );
        self.resources.push(resource);
        self
    }

    pub fn register_template<F, Fut>(&mut self, template: ResourceTemplate, reader: F) -> &mut Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult, AppError>> + Send + 'static,
    {
        self.templates
            .retain(|(existing, _)| existing.uri_template != template.uri_template);
        let reader: ResourceReader = Arc::new(move |uri: String| -> BoxFuture<ReadResourceResult> {
            Box::pin(reader(uri))
        });
        self.templates.push((template, reader));
        self
    }

    fn template_reader(&self, uri: &str) -> Option<&ResourceReader> {
        self.templates
            .iter()
            .filter_map(|(template, reader)| {
                let prefix = template_prefix(&template.uri_template);
                uri.starts_with(prefix).then_some((prefix.len(), reader))
            })
            .max_by_key(|(prefix_len, _)| *prefix_len)
            .map(|(_, reader)| reader)
    }
}

fn template_prefix(uri_template: &str) -> &str {
    uri_template
        .split_once('{')
        .map_or(uri_template, |(prefix, _)| prefix)
}

#[async_trait]
impl ResourceProvider for ResourceRegistry {
    async fn list_resources(&self) -> Result<Vec<Resource>, AppError> {
        Ok(self.resources.clone())
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, AppError> {
        let reader = self
            .readers
            .get(uri)
            .or_else(|| self.template_reader(uri))
            .ok_or_else(|| {
                AppError::not_found("resource_not_found", format!("unknown resource: {uri}"))
            })?;
        reader(uri.to_string()).await
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, AppError> {
        Ok(self
            .templates
            .iter()
            .map(|(template, _)| template.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct PromptRegistry {
    prompts: Vec<Prompt>,
    renderers: HashMap<String, PromptRenderer>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, prompt: Prompt, renderer: F) -> &mut Self
    where
        F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult, AppError>> + Send + 'static,
    {
        self.prompts.retain(|existing| existing.name != prompt.name);
        self.renderers.insert(
            prompt.name.clone(),
            Arc::new(
                move |arguments: HashMap<String, String>| -> BoxFuture<GetPromptResult> {
                    Box::pin(renderer(arguments))
                },
            ),
        );
        self.prompts.push(prompt);
        self
    }
}

#[async_trait]
impl PromptProvider for PromptRegistry {
    async fn list_prompts(&self) -> Result<Vec<Prompt>, AppError> {
        Ok(self.prompts.clone())
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, AppError> {
        let renderer = self.renderers.get(name).ok_or_else(|| {
            AppError::not_found("prompt_not_found", format!("unknown prompt: {name}"))
        })?;
        renderer(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mcp::protocol::{ContentBlock, PromptMessage, ResourceContents, Role};

    fn echo_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            "echo",
            "Echoes back the message",
            json!({"type": "object", "properties": {"message": {"type": "string"}}}),
            |arguments: Value| async move {
                match arguments.get("message").and_then(Value::as_str) {
                    Some(message) => Ok(CallToolResult::text(message)),
                    None => Err(AppError::bad_request(
                        "invalid_arguments",
                        "message is required",
                    )),
                }
            },
        );
        registry
    }

    #[tokio::test]
    async fn registered_tool_is_listed_and_callable() {
        let registry = echo_registry();

        let tools = registry.list_tools().await.expect("list");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = registry
            .call_tool("echo", json!({"message": "hello"}))
            .await
            .expect("call");
        assert_eq!(result, CallToolResult::text("hello"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result_not_a_failure() {
        let result = echo_registry()
            .call_tool("missing", json!({}))
            .await
            .expect("unknown tools are not collaborator failures");
        assert!(result.is_error);
        assert_eq!(result.content, vec![ContentBlock::text("unknown tool: missing")]);
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let err = echo_registry()
            .call_tool("echo", json!({}))
            .await
            .expect_err("missing message");
        assert_eq!(err.code(), "invalid_arguments");
    }

    #[tokio::test]
    async fn re_registering_a_tool_replaces_it() {
        let mut registry = echo_registry();
        registry.register("echo", "Shouts", json!({"type": "object"}), |_| async {
            Ok(CallToolResult::text("HELLO"))
        });

        assert_eq!(registry.len(), 1);
        let tools = registry.list_tools().await.expect("list");
        assert_eq!(tools[0].description.as_deref(), Some("Shouts"));
    }

    fn greeting_resource() -> Resource {
        Resource {
            uri: "example://greeting".to_string(),
            name: "Greeting".to_string(),
            description: None,
            mime_type: Some("text/plain".to_string()),
        }
    }

    #[tokio::test]
    async fn resources_resolve_exact_uris_then_templates() {
        let mut registry = ResourceRegistry::new();
        registry
            .register_resource(greeting_resource(), |uri| async move {
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(uri, "text/plain", "Hello!")],
                })
            })
            .register_template(
                ResourceTemplate {
                    uri_template: "example://users/{id}".to_string(),
                    name: "User".to_string(),
                    description: None,
                    mime_type: None,
                },
                |uri| async move {
                    Ok(ReadResourceResult {
                        contents: vec![ResourceContents::text(uri.clone(), "text/plain", uri)],
                    })
                },
            );

        let greeting = registry
            .read_resource("example://greeting")
            .await
            .expect("static resource");
        assert_eq!(greeting.contents[0].text.as_deref(), Some("Hello!"));

        let user = registry
            .read_resource("example://users/42")
            .await
            .expect("template resource");
        assert_eq!(user.contents[0].uri, "example://users/42");

        assert_eq!(registry.list_resources().await.expect("list").len(), 1);
        assert_eq!(
            registry.list_resource_templates().await.expect("list")[0].uri_template,
            "example://users/{id}"
        );
    }

    #[tokio::test]
    async fn unknown_resource_is_a_collaborator_error() {
        let err = ResourceRegistry::new()
            .read_resource("example://nope")
            .await
            .expect_err("unknown");
        assert_eq!(err.message(), "unknown resource: example://nope");
    }

    #[tokio::test]
    async fn prompts_render_with_arguments() {
        let mut registry = PromptRegistry::new();
        registry.register(
            Prompt {
                name: "greeting".to_string(),
                description: Some("Greets someone".to_string()),
                arguments: vec![],
            },
            |arguments: HashMap<String, String>| async move {
                let name = arguments.get("name").map_or("there", String::as_str);
                Ok(GetPromptResult {
                    description: None,
                    messages: vec![PromptMessage {
                        role: Role::User,
                        content: ContentBlock::text(format!("Say hello to {name}.")),
                    }],
                })
            },
        );

        let rendered = registry
            .get_prompt("greeting", HashMap::from([("name".to_string(), "Ada".to_string())]))
            .await
            .expect("render");
        assert_eq!(
            rendered.messages[0].content,
            ContentBlock::text("Say hello to Ada.")
        );

        let err = registry
            .get_prompt("farewell", HashMap::new())
            .await
            .expect_err("unknown prompt");
        assert_eq!(err.message(), "unknown prompt: farewell");
    }

    #[test]
    fn template_prefix_stops_at_first_placeholder() {
        assert_eq!(template_prefix("file:///{path}"), "file:///");
        assert_eq!(template_prefix("example://static"), "example://static");
    }
}
