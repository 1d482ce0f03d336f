//! The central Model Context Protocol dispatcher
//!
//! Routes decoded envelopes through a method table, gates optional method
//! groups on the providers wired at construction, records session
//! negotiation (`initialize`), and shapes every handler outcome into a
//! JSON-RPC reply.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::mcp::audit::audited_params;
use crate::mcp::protocol::{
    CallToolParams, GetPromptParams, Implementation, InitializeParams, InitializeResult,
    ListChangedCapability, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, ReadResourceParams, ResourcesCapability, ServerCapabilities,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST,
    METHOD_RESOURCES_LIST, METHOD_RESOURCES_READ, METHOD_RESOURCES_TEMPLATES_LIST,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, PROTOCOL_VERSION,
};
use crate::mcp::rpc::{
    app_error_to_error_object, is_json_rpc_error, json_rpc_result, Envelope, ErrorObject,
    Notification, Request, Response,
};
use crate::providers::{PromptProvider, ResourceProvider, ToolProvider};

/// Optional method group served by a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Tools,
    Resources,
    Prompts,
}

impl Capability {
    fn unsupported_message(self) -> &'static str {
        match self {
            Self::Tools => "tools not supported",
            Self::Resources => "resources not supported",
            Self::Prompts => "prompts not supported",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

impl Capabilities {
    pub fn supports(self, capability: Capability) -> bool {
        match capability {
            Capability::Tools => self.tools,
            Capability::Resources => self.resources,
            Capability::Prompts => self.prompts,
        }
    }

    pub fn to_server_capabilities(self) -> ServerCapabilities {
        ServerCapabilities {
            tools: self.tools.then(ListChangedCapability::default),
            resources: self.resources.then(ResourcesCapability::default),
            prompts: self.prompts.then(ListChangedCapability::default),
        }
    }
}

/// The collaborator wiring of one server instance.
#[derive(Clone, Default)]
pub struct Providers {
    pub tools: Option<Arc<dyn ToolProvider>>,
    pub resources: Option<Arc<dyn ResourceProvider>>,
    pub prompts: Option<Arc<dyn PromptProvider>>,
}

impl Providers {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            tools: self.tools.is_some(),
            resources: self.resources.is_some(),
            prompts: self.prompts.is_some(),
        }
    }
}

/// An internal failure that prevented a reply from being shaped.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to encode {method} result: {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

enum HandlerError {
    Rpc(ErrorObject),
    Encode(serde_json::Error),
}

impl From<ErrorObject> for HandlerError {
    fn from(error: ErrorObject) -> Self {
        Self::Rpc(error)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Encode(error)
    }
}

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>>;
type MethodHandler = for<'a> fn(&'a Dispatcher, Option<Value>) -> HandlerFuture<'a>;

#[derive(Clone, Copy)]
struct Route {
    requires: Option<Capability>,
    replies: bool,
    handler: MethodHandler,
}

impl Route {
    fn open(handler: MethodHandler) -> Self {
        Self {
            requires: None,
            replies: true,
            handler,
        }
    }

    fn gated(capability: Capability, handler: MethodHandler) -> Self {
        Self {
            requires: Some(capability),
            replies: true,
            handler,
        }
    }

    fn silent(handler: MethodHandler) -> Self {
        Self {
            requires: None,
            replies: false,
            handler,
        }
    }
}

fn routing_table() -> HashMap<&'static str, Route> {
    HashMap::from([
        (METHOD_INITIALIZE, Route::open(initialize)),
        (METHOD_INITIALIZED, Route::silent(initialized)),
        (METHOD_PING, Route::open(ping)),
        (METHOD_TOOLS_LIST, Route::gated(Capability::Tools, tools_list)),
        (METHOD_TOOLS_CALL, Route::gated(Capability::Tools, tools_call)),
        (
            METHOD_RESOURCES_LIST,
            Route::gated(Capability::Resources, resources_list),
        ),
        (
            METHOD_RESOURCES_READ,
            Route::gated(Capability::Resources, resources_read),
        ),
        (
            METHOD_RESOURCES_TEMPLATES_LIST,
            Route::gated(Capability::Resources, resources_templates_list),
        ),
        (
            METHOD_PROMPTS_LIST,
            Route::gated(Capability::Prompts, prompts_list),
        ),
        (METHOD_PROMPTS_GET, Route::gated(Capability::Prompts, prompts_get)),
    ])
}

pub struct Dispatcher {
    server_info: Implementation,
    providers: Providers,
    routes: HashMap<&'static str, Route>,
    initialized: AtomicBool,
}

impl Dispatcher {
    pub fn new(server_info: Implementation, providers: Providers) -> Self {
        Self {
            server_info,
            providers,
            routes: routing_table(),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.providers.capabilities()
    }

    /// Recorded only; no method is refused before initialization.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Handles one inbound envelope. Returns the reply to write, if any.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<Option<Envelope>, DispatchError> {
        match envelope {
            Envelope::Request(request) => self.handle_request(request).await,
            Envelope::Notification(notification) => {
                self.handle_notification(notification).await;
                Ok(None)
            }
            Envelope::Response(response) => {
                debug!(id = ?response.id(), "ignoring response envelope from peer");
                Ok(None)
            }
        }
    }

    async fn handle_request(&self, request: Request) -> Result<Option<Envelope>, DispatchError> {
        let Request { id, method, params } = request;
        let audit_params = audited_params(params.as_ref());

        let Some(route) = self.routes.get(method.as_str()).copied() else {
            info!(
                method = %method,
                params = %audit_params,
                outcome = "failure",
                "mcp action audited"
            );
            return Ok(Some(Envelope::Response(Response::failure(
                id,
                ErrorObject::method_not_found(&method),
            ))));
        };

        let outcome = self.invoke(route, params).await;
        if !route.replies {
            debug!(method = %method, "request routed to a no-reply method");
            return Ok(None);
        }

        let response = match outcome {
            Ok(result) => json_rpc_result(id, result),
            Err(HandlerError::Rpc(error)) => Envelope::Response(Response::failure(id, error)),
            Err(HandlerError::Encode(source)) => {
                info!(
                    method = %method,
                    params = %audit_params,
                    outcome = "failure",
                    "mcp action audited"
                );
                return Err(DispatchError::Encode { method, source });
            }
        };

        info!(
            method = %method,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        Ok(Some(response))
    }

    async fn handle_notification(&self, notification: Notification) {
        let Notification { method, params } = notification;
        let Some(route) = self.routes.get(method.as_str()).copied() else {
            debug!(method = %method, "ignoring unknown notification");
            return;
        };

        let audit_params = audited_params(params.as_ref());
        let outcome = match self.invoke(route, params).await {
            Ok(_) => "success",
            Err(_) => "failure",
        };
        info!(method = %method, params = %audit_params, outcome, "mcp notification audited");
    }

    async fn invoke(&self, route: Route, params: Option<Value>) -> Result<Value, HandlerError> {
        if let Some(capability) = route.requires {
            if !self.capabilities().supports(capability) {
                return Err(ErrorObject::internal(capability.unsupported_message()).into());
            }
        }

        (route.handler)(self, params).await
    }

    fn mark_initialized(&self, params: &InitializeParams) {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(
                client = params.client_info.as_ref().map_or("unknown", |info| info.name.as_str()),
                requested_version = %params.protocol_version,
                "session initialized"
            );
        }
    }

    fn tool_provider(&self) -> Result<&Arc<dyn ToolProvider>, HandlerError> {
        self.providers
            .tools
            .as_ref()
            .ok_or_else(|| unsupported(Capability::Tools))
    }

    fn resource_provider(&self) -> Result<&Arc<dyn ResourceProvider>, HandlerError> {
        self.providers
            .resources
            .as_ref()
            .ok_or_else(|| unsupported(Capability::Resources))
    }

    fn prompt_provider(&self) -> Result<&Arc<dyn PromptProvider>, HandlerError> {
        self.providers
            .prompts
            .as_ref()
            .ok_or_else(|| unsupported(Capability::Prompts))
    }
}

/// Decodes required params. The decode detail is logged, never sent.
fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, HandlerError> {
    let Some(raw_params) = params else {
        return Err(ErrorObject::invalid_params().into());
    };

    serde_json::from_value(raw_params).map_err(|err| {
        debug!(error = %err, "params failed to decode");
        ErrorObject::invalid_params().into()
    })
}

fn collaborator_error(err: AppError) -> HandlerError {
    HandlerError::Rpc(app_error_to_error_object(&err))
}

fn unsupported(capability: Capability) -> HandlerError {
    HandlerError::Rpc(ErrorObject::internal(capability.unsupported_message()))
}

// Route entries are plain fn pointers; each boxes the matching async method.
fn initialize(dispatcher: &Dispatcher, params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.initialize(params))
}

fn initialized(dispatcher: &Dispatcher, _params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.initialized())
}

fn ping(dispatcher: &Dispatcher, _params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.ping())
}

fn tools_list(dispatcher: &Dispatcher, _params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.tools_list())
}

fn tools_call(dispatcher: &Dispatcher, params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.tools_call(params))
}

fn resources_list(dispatcher: &Dispatcher, _params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.resources_list())
}

fn resources_read(dispatcher: &Dispatcher, params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.resources_read(params))
}

fn resources_templates_list(dispatcher: &Dispatcher, _params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.resources_templates_list())
}

fn prompts_list(dispatcher: &Dispatcher, _params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.prompts_list())
}

fn prompts_get(dispatcher: &Dispatcher, params: Option<Value>) -> HandlerFuture<'_> {
    Box::pin(dispatcher.prompts_get(params))
}

impl Dispatcher {
    async fn initialize(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let params: InitializeParams = decode_params(params)?;
        self.mark_initialized(&params);

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities().to_server_capabilities(),
            server_info: self.server_info.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn initialized(&self) -> Result<Value, HandlerError> {
        debug!("peer confirmed initialization");
        Ok(Value::Null)
    }

    async fn ping(&self) -> Result<Value, HandlerError> {
        Ok(json!({}))
    }

    async fn tools_list(&self) -> Result<Value, HandlerError> {
        let tools = self
            .tool_provider()?
            .list_tools()
            .await
            .map_err(collaborator_error)?;
        Ok(serde_json::to_value(ListToolsResult { tools })?)
    }

    async fn tools_call(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let provider = self.tool_provider()?;
        let params: CallToolParams = decode_params(params)?;
        let arguments = params
            .arguments
            .unwrap_or_else(|| Value::Object(Map::new()));
        let result = provider
            .call_tool(&params.name, arguments)
            .await
            .map_err(collaborator_error)?;
        Ok(serde_json::to_value(result)?)
    }

    async fn resources_list(&self) -> Result<Value, HandlerError> {
        let resources = self
            .resource_provider()?
            .list_resources()
            .await
            .map_err(collaborator_error)?;
        Ok(serde_json::to_value(ListResourcesResult { resources })?)
    }

    async fn resources_read(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let provider = self.resource_provider()?;
        let params: ReadResourceParams = decode_params(params)?;
        let result = provider
            .read_resource(&params.uri)
            .await
            .map_err(collaborator_error)?;
        Ok(serde_json::to_value(result)?)
    }

    async fn resources_templates_list(&self) -> Result<Value, HandlerError> {
        let resource_templates = self
            .resource_provider()?
            .list_resource_templates()
            .await
            .map_err(collaborator_error)?;
        Ok(serde_json::to_value(ListResourceTemplatesResult {
            resource_templates,
        })?)
    }

    async fn prompts_list(&self) -> Result<Value, HandlerError> {
        let prompts = self
            .prompt_provider()?
            .list_prompts()
            .await
            .map_err(collaborator_error)?;
        Ok(serde_json::to_value(ListPromptsResult { prompts })?)
    }

    async fn prompts_get(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let provider = self.prompt_provider()?;
        let params: GetPromptParams = decode_params(params)?;
        let result = provider
            .get_prompt(&params.name, params.arguments)
            .await
            .map_err(collaborator_error)?;
        Ok(serde_json::to_value(result)?)
    }
}
