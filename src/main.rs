use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use stdio_mcp_engine::{
    config::Config,
    logging,
    mcp::protocol::{
        CallToolResult, ContentBlock, GetPromptResult, Prompt, PromptArgument, PromptMessage,
        ReadResourceResult, Resource, ResourceContents, Role,
    },
    transport, AppError, PromptRegistry, ResourceRegistry, Server, ServerError, ToolRegistry,
};
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn example_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools
        .register(
            "get_current_time",
            "Returns the current UTC time in RFC 3339 format",
            json!({"type": "object", "properties": {}}),
            |_arguments: Value| async {
                Ok(CallToolResult::text(
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                ))
            },
        )
        .register(
            "echo",
            "Echoes back the provided message",
            json!({
                "type": "object",
                "properties": {"message": {"type": "string", "description": "Text to echo"}},
                "required": ["message"]
            }),
            |arguments: Value| async move {
                match arguments.get("message").and_then(Value::as_str) {
                    Some(message) => Ok(CallToolResult::text(message)),
                    None => Ok(CallToolResult::error("message is required")),
                }
            },
        );
    tools
}

fn text_resource(uri: &str, name: &str, description: &str) -> Resource {
    Resource {
        uri: uri.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        mime_type: Some("text/plain".to_string()),
    }
}

fn example_resources(server_name: String, server_version: String) -> ResourceRegistry {
    let mut resources = ResourceRegistry::new();
    resources
        .register_resource(
            text_resource("example://greeting", "Greeting", "A friendly greeting"),
            |uri: String| async move {
                Ok(ReadResourceResult {
                    contents: vec![ResourceContents::text(uri, "text/plain", "Hello from MCP!")],
                })
            },
        )
        .register_resource(
            text_resource("example://info", "Server info", "Name and version of this server"),
            move |uri: String| {
                let info = format!("{server_name} {server_version}");
                async move {
                    Ok(ReadResourceResult {
                        contents: vec![ResourceContents::text(uri, "text/plain", info)],
                    })
                }
            },
        );
    resources
}

fn example_prompts() -> PromptRegistry {
    let mut prompts = PromptRegistry::new();
    prompts.register(
        Prompt {
            name: "greeting".to_string(),
            description: Some("Asks the assistant to greet someone".to_string()),
            arguments: vec![PromptArgument {
                name: "name".to_string(),
                description: Some("Who to greet".to_string()),
                required: true,
            }],
        },
        |arguments: HashMap<String, String>| async move {
            let Some(name) = arguments.get("name") else {
                return Err(AppError::bad_request(
                    "missing_argument",
                    "argument \"name\" is required",
                ));
            };
            Ok(GetPromptResult {
                description: Some("Greeting".to_string()),
                messages: vec![PromptMessage {
                    role: Role::User,
                    content: ContentBlock::text(format!("Please greet {name} warmly.")),
                }],
            })
        },
    );
    prompts
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let options = config
        .server_options()
        .with_tools(Arc::new(example_tools()))
        .with_resources(Arc::new(example_resources(
            config.server_name.clone(),
            config.server_version.clone(),
        )))
        .with_prompts(Arc::new(example_prompts()));
    let server = Server::new(options)?;
    let stdio = transport::stdio(config.framing, config.max_message_bytes);

    info!(
        server = %config.server_name,
        framing = %config.framing,
        max_message_bytes = config.max_message_bytes,
        "serving over stdio"
    );

    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    // The stdin read is not preempted: after ctrl-c the server stops once the
    // peer sends another frame or hangs up, or gives up after the grace period.
    match server.run_until(stdio, interrupt, SHUTDOWN_GRACE).await {
        Ok(()) => Ok(()),
        Err(ServerError::Cancelled { reason }) => {
            info!(%reason, "server stopped");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
