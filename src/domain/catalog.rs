//! In-memory resources, prompts and tools served over MCP
//!
//! A [`Catalog`] only serves what was registered on it. Which of its methods a
//! client may reach is decided by the session's negotiated capabilities, not here.

use std::{collections::BTreeMap, sync::Arc, sync::OnceLock};

use async_trait::async_trait;
use regex::Regex;
use rust_mcp_sdk::{
    macros,
    schema::{
        CallToolRequestParams, CallToolResult, ContentBlock, GetPromptResult, ListPromptsResult,
        ListResourcesResult, ListToolsResult, Prompt, PromptArgument, PromptMessage,
        ReadResourceContent, ReadResourceRequestParams, ReadResourceResult, Resource, Role,
        TextContent, TextResourceContents, Tool,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::HandlerError;
use crate::mcp::handler::{RequestContext, RequestHandler};
use crate::session::guard::EXPERIMENTAL_PREFIX;

const MAX_COMPLETION_VALUES: usize = 100;

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult, HandlerError>;
}

/// Backs an `experimental/{feature}` method.
#[async_trait]
pub trait ExperimentalMethod: Send + Sync {
    async fn invoke(&self, params: Option<Value>) -> Result<Value, HandlerError>;
}

/// One named input of a [`PromptTemplate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateArgument {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
    /// Offered by `completion/complete`; never sent in `prompts/list`.
    pub suggestions: Vec<String>,
}

impl TemplateArgument {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: true,
            suggestions: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions = suggestions.into_iter().map(Into::into).collect();
        self
    }

    fn to_argument(&self) -> PromptArgument {
        PromptArgument {
            description: self.description.clone(),
            name: self.name.clone(),
            required: Some(self.required),
            title: None,
        }
    }
}

/// A prompt whose single user message is rendered from `{{argument}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<TemplateArgument>,
    pub template: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            template: template.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_argument(mut self, argument: TemplateArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// The `prompts/list` entry for this template.
    pub fn to_prompt(&self) -> Prompt {
        Prompt {
            arguments: self.arguments.iter().map(TemplateArgument::to_argument).collect(),
            description: self.description.clone(),
            icons: vec![],
            meta: None,
            name: self.name.clone(),
            title: None,
        }
    }

    pub fn render(&self, arguments: &Map<String, Value>) -> Result<String, HandlerError> {
        for argument in self.arguments.iter().filter(|argument| argument.required) {
            if !arguments.contains_key(&argument.name) {
                return Err(HandlerError::invalid_params(
                    "missing_prompt_argument",
                    format!("prompt argument {} is required", argument.name),
                ));
            }
        }

        let substitute = |captures: &regex::Captures<'_>| match arguments.get(&captures[1]) {
            Some(Value::String(value)) => value.clone(),
            Some(value) => value.to_string(),
            None => String::new(),
        };
        let rendered = placeholder_pattern().replace_all(&self.template, substitute);
        Ok(rendered.into_owned())
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

#[derive(Debug, Clone)]
struct StaticResource {
    resource: Resource,
    text: String,
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CompletionReference {
    #[serde(rename = "ref/prompt")]
    Prompt { name: String },
    #[serde(rename = "ref/resource")]
    Resource { uri: String },
}

#[derive(Debug, Deserialize)]
struct CompletionArgument {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct CompleteParams {
    #[serde(rename = "ref")]
    reference: CompletionReference,
    argument: CompletionArgument,
}

#[derive(Default, Clone)]
pub struct Catalog {
    resources: BTreeMap<String, StaticResource>,
    prompts: BTreeMap<String, PromptTemplate>,
    tools: BTreeMap<String, (Tool, Arc<dyn ToolExecutor>)>,
    experimental: BTreeMap<String, Arc<dyn ExperimentalMethod>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog the server binary ships with.
    pub fn builtin(server_name: &str) -> Self {
        Self::new()
            .with_text_resource(
                "mem://server/about",
                "About",
                "text/plain",
                format!("{server_name} is a capability-gated MCP server."),
            )
            .with_prompt(
                PromptTemplate::new(
                    "summarize",
                    "Summarize the following text in a {{style}} style:\n{{text}}",
                )
                .with_description("Summarize a piece of text")
                .with_argument(TemplateArgument::required("text"))
                .with_argument(
                    TemplateArgument::optional("style")
                        .with_description("brief, bullet or detailed")
                        .with_suggestions(["brief", "bullet", "detailed"]),
                ),
            )
            .with_tool(EchoTool::tool(), Arc::new(EchoExecutor))
    }

    pub fn with_text_resource(
        mut self,
        uri: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let uri = uri.into();
        let resource = Resource {
            annotations: None,
            description: None,
            icons: vec![],
            meta: None,
            mime_type: Some(mime_type.into()),
            name: name.into(),
            size: None,
            title: None,
            uri: uri.clone(),
        };
        self.resources.insert(
            uri,
            StaticResource {
                resource,
                text: text.into(),
            },
        );
        self
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompts.insert(prompt.name.clone(), prompt);
        self
    }

    pub fn with_tool(mut self, tool: Tool, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tools.insert(tool.name.clone(), (tool, executor));
        self
    }

    pub fn with_experimental(
        mut self,
        feature: impl Into<String>,
        method: Arc<dyn ExperimentalMethod>,
    ) -> Self {
        self.experimental.insert(feature.into(), method);
        self
    }

    fn list_resources(&self) -> Result<Value, HandlerError> {
        to_result(ListResourcesResult {
            meta: None,
            next_cursor: None,
            resources: self
                .resources
                .values()
                .map(|entry| entry.resource.clone())
                .collect(),
        })
    }

    fn read_resource(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let params: ReadResourceRequestParams = parse_params(params)?;
        let entry = self
            .resources
            .get(&params.uri)
            .ok_or_else(|| HandlerError::ResourceNotFound(params.uri.clone()))?;

        to_result(ReadResourceResult {
            contents: vec![ReadResourceContent::from(TextResourceContents {
                meta: None,
                mime_type: entry.resource.mime_type.clone(),
                text: entry.text.clone(),
                uri: params.uri,
            })],
            meta: None,
        })
    }

    fn list_tools(&self) -> Result<Value, HandlerError> {
        to_result(ListToolsResult {
            meta: None,
            next_cursor: None,
            tools: self.tools.values().map(|(tool, _)| tool.clone()).collect(),
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let params: CallToolRequestParams = parse_params(params)?;
        let (_, executor) = self
            .tools
            .get(&params.name)
            .ok_or_else(|| HandlerError::ToolNotFound(params.name.clone()))?;

        let result = executor.call(params.arguments.unwrap_or_default()).await?;
        to_result(result)
    }

    fn list_prompts(&self) -> Result<Value, HandlerError> {
        to_result(ListPromptsResult {
            meta: None,
            next_cursor: None,
            prompts: self.prompts.values().map(PromptTemplate::to_prompt).collect(),
        })
    }

    fn get_prompt(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let params: GetPromptParams = parse_params(params)?;
        let prompt = self
            .prompts
            .get(&params.name)
            .ok_or_else(|| HandlerError::PromptNotFound(params.name.clone()))?;
        let text = prompt.render(&params.arguments)?;

        to_result(GetPromptResult {
            description: prompt.description.clone(),
            messages: vec![PromptMessage {
                content: ContentBlock::from(TextContent::new(text, None, None)),
                role: Role::User,
            }],
            meta: None,
        })
    }

    fn complete(&self, params: Option<Value>) -> Result<Value, HandlerError> {
        let params: CompleteParams = parse_params(params)?;
        let prefix = params.argument.value.as_str();

        let candidates: Vec<&str> = match &params.reference {
            CompletionReference::Prompt { name } => {
                let prompt = self
                    .prompts
                    .get(name)
                    .ok_or_else(|| HandlerError::PromptNotFound(name.clone()))?;
                prompt
                    .arguments
                    .iter()
                    .find(|argument| argument.name == params.argument.name)
                    .map(|argument| argument.suggestions.iter().map(String::as_str).collect())
                    .unwrap_or_default()
            }
            CompletionReference::Resource { uri } => self
                .resources
                .keys()
                .map(String::as_str)
                .filter(|candidate| candidate.starts_with(uri.as_str()))
                .collect(),
        };

        let matching: Vec<&str> = candidates
            .into_iter()
            .filter(|candidate| candidate.starts_with(prefix))
            .collect();
        let total = matching.len();
        let values: Vec<&str> = matching.into_iter().take(MAX_COMPLETION_VALUES).collect();

        Ok(json!({
            "completion": {
                "values": values,
                "total": total,
                "hasMore": total > values.len(),
            }
        }))
    }
}

#[async_trait]
impl RequestHandler for Catalog {
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> Result<Value, HandlerError> {
        match method {
            "resources/list" => self.list_resources(),
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            "resources/read" => self.read_resource(params),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(params).await,
            "prompts/list" => self.list_prompts(),
            "prompts/get" => self.get_prompt(params),
            "completion/complete" => self.complete(params),
            other => match other
                .strip_prefix(EXPERIMENTAL_PREFIX)
                .and_then(|feature| self.experimental.get(feature))
            {
                Some(method) => method.invoke(params).await,
                None => Err(HandlerError::MethodNotFound(other.to_string())),
            },
        }
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, HandlerError> {
    let Some(params) = params else {
        return Err(HandlerError::invalid_params("missing_params", "params are required"));
    };
    serde_json::from_value(params)
        .map_err(|err| HandlerError::invalid_params("invalid_params", err.to_string()))
}

fn to_result<T: Serialize>(result: T) -> Result<Value, HandlerError> {
    serde_json::to_value(result).map_err(|err| HandlerError::internal(err.to_string()))
}

#[macros::mcp_tool(name = "echo", description = "Return the given text unchanged")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct EchoTool {
    pub text: String,
}

pub struct EchoExecutor;

#[async_trait]
impl ToolExecutor for EchoExecutor {
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult, HandlerError> {
        let args: EchoTool = serde_json::from_value(Value::Object(arguments)).map_err(|_| {
            HandlerError::invalid_params("invalid_arguments", "echo expects a text argument")
        })?;

        Ok(CallToolResult {
            content: vec![ContentBlock::from(TextContent::new(args.text.clone(), None, None))],
            is_error: None,
            meta: None,
            structured_content: Some(Map::from_iter([("text".to_string(), json!(args.text))])),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            session_id: "s1".to_string(),
            protocol_version: "2025-06-18".to_string(),
        }
    }

    struct Counter;

    #[async_trait]
    impl ExperimentalMethod for Counter {
        async fn invoke(&self, _params: Option<Value>) -> Result<Value, HandlerError> {
            Ok(json!({ "count": 1 }))
        }
    }

    #[tokio::test]
    async fn lists_and_reads_registered_resources() {
        let catalog = Catalog::builtin("test");

        let listed = catalog
            .handle_request("resources/list", None, &ctx())
            .await
            .expect("list");
        assert_eq!(listed["resources"][0]["uri"], "mem://server/about");

        let read = catalog
            .handle_request(
                "resources/read",
                Some(json!({ "uri": "mem://server/about" })),
                &ctx(),
            )
            .await
            .expect("read");
        assert_eq!(read["contents"][0]["mimeType"], "text/plain");
        assert!(read["contents"][0]["text"]
            .as_str()
            .is_some_and(|text| text.starts_with("test ")));
    }

    #[tokio::test]
    async fn unknown_items_map_to_not_found_errors() {
        let catalog = Catalog::builtin("test");

        let error = catalog
            .handle_request("resources/read", Some(json!({ "uri": "mem://nope" })), &ctx())
            .await
            .expect_err("missing resource");
        assert!(matches!(error, HandlerError::ResourceNotFound(uri) if uri == "mem://nope"));

        let error = catalog
            .handle_request("tools/call", Some(json!({ "name": "nope" })), &ctx())
            .await
            .expect_err("missing tool");
        assert!(matches!(error, HandlerError::ToolNotFound(_)));

        let error = catalog
            .handle_request("prompts/get", Some(json!({ "name": "nope" })), &ctx())
            .await
            .expect_err("missing prompt");
        assert!(matches!(error, HandlerError::PromptNotFound(_)));
    }

    #[tokio::test]
    async fn echo_tool_returns_text_and_structured_content() {
        let catalog = Catalog::builtin("test");

        let listed = catalog
            .handle_request("tools/list", None, &ctx())
            .await
            .expect("list");
        assert_eq!(listed["tools"][0]["name"], "echo");

        let result = catalog
            .handle_request(
                "tools/call",
                Some(json!({ "name": "echo", "arguments": { "text": "hi" } })),
                &ctx(),
            )
            .await
            .expect("call");
        assert_eq!(result["content"][0]["text"], "hi");
        assert_eq!(result["structuredContent"]["text"], "hi");

        let error = catalog
            .handle_request("tools/call", Some(json!({ "name": "echo" })), &ctx())
            .await
            .expect_err("missing argument");
        assert_eq!(error.code(), "invalid_arguments");
    }

    #[tokio::test]
    async fn prompts_render_placeholders() {
        let catalog = Catalog::builtin("test");

        let result = catalog
            .handle_request(
                "prompts/get",
                Some(json!({
                    "name": "summarize",
                    "arguments": { "text": "abc", "style": "brief" }
                })),
                &ctx(),
            )
            .await
            .expect("get");
        assert_eq!(
            result["messages"][0]["content"]["text"],
            "Summarize the following text in a brief style:\nabc"
        );
        assert_eq!(result["messages"][0]["role"], "user");
        assert_eq!(result["messages"][0]["content"]["type"], "text");
        assert_eq!(result["description"], "Summarize a piece of text");

        let error = catalog
            .handle_request("prompts/get", Some(json!({ "name": "summarize" })), &ctx())
            .await
            .expect_err("missing required argument");
        assert_eq!(error.code(), "missing_prompt_argument");

        let listed = catalog
            .handle_request("prompts/list", None, &ctx())
            .await
            .expect("list");
        assert_eq!(listed["prompts"][0]["name"], "summarize");
        assert_eq!(listed["prompts"][0]["arguments"][0]["name"], "text");
        assert_eq!(listed["prompts"][0]["arguments"][0]["required"], true);
        assert_eq!(listed["prompts"][0]["arguments"][1]["required"], false);
        assert!(listed["prompts"][0]["arguments"][1].get("suggestions").is_none());
    }

    #[tokio::test]
    async fn completion_filters_by_prefix() {
        let catalog = Catalog::builtin("test");

        let result = catalog
            .handle_request(
                "completion/complete",
                Some(json!({
                    "ref": { "type": "ref/prompt", "name": "summarize" },
                    "argument": { "name": "style", "value": "b" }
                })),
                &ctx(),
            )
            .await
            .expect("complete");
        assert_eq!(result["completion"]["values"], json!(["brief", "bullet"]));
        assert_eq!(result["completion"]["hasMore"], false);

        let result = catalog
            .handle_request(
                "completion/complete",
                Some(json!({
                    "ref": { "type": "ref/resource", "uri": "mem://" },
                    "argument": { "name": "uri", "value": "mem://server" }
                })),
                &ctx(),
            )
            .await
            .expect("complete");
        assert_eq!(result["completion"]["values"], json!(["mem://server/about"]));
    }

    #[tokio::test]
    async fn experimental_methods_resolve_by_feature() {
        let catalog = Catalog::new().with_experimental("counter", Arc::new(Counter));

        let result = catalog
            .handle_request("experimental/counter", None, &ctx())
            .await
            .expect("invoke");
        assert_eq!(result["count"], 1);

        let error = catalog
            .handle_request("experimental/other", None, &ctx())
            .await
            .expect_err("unregistered");
        assert!(matches!(error, HandlerError::MethodNotFound(_)));
    }
}
