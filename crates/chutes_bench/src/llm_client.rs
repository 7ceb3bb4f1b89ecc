//! Tool-calling chat client for OpenAI, Anthropic and OpenRouter.
//!
//! Every call offers the caller's tools and forces the model to pick one.
//! The [`Completion`] keeps the exact request body, the raw reply, token
//! usage and latency so the caller can persist the exchange.

use std::time::{Duration, Instant};

use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionTools,
        CreateChatCompletionRequestArgs, FunctionObject, ToolChoiceOptions,
    },
};
use derive_getters::Getters;
use derive_more::{Display, Error};
use derive_new::new;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1";

/// Model vendor a contestant talks to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI chat completions.
    #[display("openai")]
    OpenAI,
    /// Anthropic messages API.
    #[display("anthropic")]
    Anthropic,
    /// OpenRouter, spoken to through its OpenAI-compatible endpoint.
    #[display("openrouter")]
    OpenRouter,
}

impl LlmProvider {
    /// Environment variable holding this provider's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

/// Provider, credentials and limits for one contestant.
#[derive(Clone, new)]
pub struct LlmConfig {
    provider: LlmProvider,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmConfig {
    /// Provider the requests go to.
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Model identifier sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Completion token cap per request.
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, new)]
pub struct ToolSpec {
    name: String,
    description: String,
    /// JSON Schema of the argument object.
    parameters: Value,
}

/// The function the model chose and its decoded arguments.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize, new)]
pub struct ToolCall {
    name: String,
    arguments: Value,
}

impl ToolCall {
    /// Builds a call from an argument string as OpenAI sends it.
    ///
    /// Empty arguments decode to `null`. Text that is not JSON is kept as a
    /// string so the caller can report it.
    fn from_raw_arguments(name: String, arguments: &str) -> Self {
        let arguments = if arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
        };
        Self { name, arguments }
    }
}

/// Tokens billed for one call, when the provider reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: Option<u32>,
    /// Generated tokens.
    pub output_tokens: Option<u32>,
}

/// Result of one successful call.
#[derive(Debug, Clone, Getters)]
pub struct Completion {
    /// Model identifier the provider reported.
    model: String,
    /// Request body as sent.
    request: Value,
    /// Reply body as received.
    response: Value,
    /// Free text in the reply, if any.
    text: Option<String>,
    /// First tool call in the reply.
    tool_call: Option<ToolCall>,
    usage: TokenUsage,
    latency: Duration,
}

/// Durable record of one model call, successful or not.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize, new)]
pub struct LlmInvocation {
    provider: LlmProvider,
    model: String,
    /// Request body as sent.
    request: Value,
    /// Reply body, absent when the call failed.
    response: Option<Value>,
    tool_call: Option<ToolCall>,
    usage: TokenUsage,
    latency_ms: u64,
    /// Provider or transport failure.
    error: Option<String>,
}

impl LlmInvocation {
    /// Records a call that returned a reply.
    pub fn from_completion(provider: LlmProvider, completion: &Completion) -> Self {
        Self {
            provider,
            model: completion.model.clone(),
            request: completion.request.clone(),
            response: Some(completion.response.clone()),
            tool_call: completion.tool_call.clone(),
            usage: completion.usage,
            latency_ms: millis(completion.latency),
            error: None,
        }
    }

    /// Records a call that produced no reply.
    pub fn failed(
        provider: LlmProvider,
        model: impl Into<String>,
        request: Value,
        latency: Duration,
        error: &LlmError,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            request,
            response: None,
            tool_call: None,
            usage: TokenUsage::default(),
            latency_ms: millis(latency),
            error: Some(error.to_string()),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Chat client bound to one provider and model.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    /// Creates a client for `config`.
    #[instrument(skip(config), fields(provider = %config.provider(), model = %config.model()))]
    pub fn new(config: LlmConfig) -> Self {
        debug!("Creating LLM client");
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Provider and model settings.
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Sends one system and one user message and requires a tool call when
    /// `tools` is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on transport failure, a non-success status or an
    /// undecodable reply.
    #[instrument(
        skip(self, system, user, tools),
        fields(provider = %self.config.provider, model = %self.config.model, tools = tools.len())
    )]
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        tools: &[ToolSpec],
    ) -> Result<Completion, LlmError> {
        let started = Instant::now();
        let mut completion = match self.config.provider {
            LlmProvider::OpenAI => {
                let config = OpenAIConfig::new().with_api_key(self.config.api_key.clone());
                self.openai_chat(config, system, user, tools).await?
            }
            LlmProvider::OpenRouter => {
                let config = OpenAIConfig::new()
                    .with_api_key(self.config.api_key.clone())
                    .with_api_base(OPENROUTER_BASE);
                self.openai_chat(config, system, user, tools).await?
            }
            LlmProvider::Anthropic => self.anthropic_messages(system, user, tools).await?,
        };
        completion.latency = started.elapsed();

        info!(
            tool = completion.tool_call.as_ref().map(|call| call.name.as_str()),
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            latency_ms = millis(completion.latency),
            "Model replied"
        );
        Ok(completion)
    }

    /// Request body this client would send, for recording failed calls.
    pub fn request_body(&self, system: &str, user: &str, tools: &[ToolSpec]) -> Value {
        match self.config.provider {
            LlmProvider::Anthropic => self.anthropic_body(system, user, tools),
            LlmProvider::OpenAI | LlmProvider::OpenRouter => json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "tools": tools.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>(),
            }),
        }
    }

    async fn openai_chat(
        &self,
        config: OpenAIConfig,
        system: &str,
        user: &str,
        tools: &[ToolSpec],
    ) -> Result<Completion, LlmError> {
        let provider = self.config.provider;
        let invalid = |e: async_openai::error::OpenAIError| LlmError::Request {
            provider,
            message: e.to_string(),
        };

        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(invalid)?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()
                    .map_err(invalid)?,
            ),
        ];

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(self.config.model.as_str())
            .messages(messages)
            .max_completion_tokens(self.config.max_tokens);
        if !tools.is_empty() {
            builder
                .tools(tools.iter().map(openai_tool).collect::<Vec<_>>())
                .tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Required));
        }
        let request = builder.build().map_err(invalid)?;
        let request_body = serde_json::to_value(&request).map_err(|e| LlmError::Request {
            provider,
            message: e.to_string(),
        })?;

        let response = OpenAIClient::with_config(config)
            .chat()
            .create(request)
            .await
            .map_err(|e| {
                warn!(error = %e, "Chat completion failed");
                LlmError::Transport {
                    provider,
                    message: e.to_string(),
                }
            })?;
        let raw = serde_json::to_value(&response).map_err(|e| LlmError::Decode {
            provider,
            message: e.to_string(),
        })?;

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::Decode {
                provider,
                message: "reply has no choices".to_string(),
            })?;
        let tool_call = message
            .tool_calls
            .into_iter()
            .flatten()
            .find_map(|call| match call {
                ChatCompletionMessageToolCalls::Function(call) => Some(ToolCall::from_raw_arguments(
                    call.function.name,
                    &call.function.arguments,
                )),
                ChatCompletionMessageToolCalls::Custom(_) => None,
            });
        let usage = response
            .usage
            .map(|usage| TokenUsage::new(Some(usage.prompt_tokens), Some(usage.completion_tokens)))
            .unwrap_or_default();

        Ok(Completion {
            model: response.model,
            request: request_body,
            response: raw,
            text: message.content,
            tool_call,
            usage,
            latency: Duration::ZERO,
        })
    }

    fn anthropic_body(&self, system: &str, user: &str, tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            body["tool_choice"] = json!({"type": "any"});
        }
        body
    }

    async fn anthropic_messages(
        &self,
        system: &str,
        user: &str,
        tools: &[ToolSpec],
    ) -> Result<Completion, LlmError> {
        let provider = LlmProvider::Anthropic;
        let body = self.anthropic_body(system, user, tools);

        let response = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", self.config.api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport {
                provider,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::Transport {
            provider,
            message: e.to_string(),
        })?;
        if !status.is_success() {
            warn!(%status, "Messages request rejected");
            return Err(LlmError::Status {
                provider,
                status: status.as_u16(),
                body: text,
            });
        }

        let decode = |e: serde_json::Error| LlmError::Decode {
            provider,
            message: e.to_string(),
        };
        let raw: Value = serde_json::from_str(&text).map_err(decode)?;
        let reply: AnthropicReply = serde_json::from_value(raw.clone()).map_err(decode)?;

        let mut text = None;
        let mut tool_call = None;
        for block in reply.content {
            match block {
                AnthropicBlock::Text { text: chunk } => {
                    text.get_or_insert_with(String::new).push_str(&chunk);
                }
                AnthropicBlock::ToolUse { name, input } if tool_call.is_none() => {
                    tool_call = Some(ToolCall::new(name, input));
                }
                AnthropicBlock::ToolUse { .. } | AnthropicBlock::Other => {}
            }
        }
        let usage = reply
            .usage
            .map(|usage| TokenUsage::new(Some(usage.input_tokens), Some(usage.output_tokens)))
            .unwrap_or_default();

        Ok(Completion {
            model: reply.model,
            request: body,
            response: raw,
            text,
            tool_call,
            usage,
            latency: Duration::ZERO,
        })
    }
}

fn openai_tool(tool: &ToolSpec) -> ChatCompletionTools {
    ChatCompletionTools::Function(ChatCompletionTool {
        function: FunctionObject {
            name: tool.name.clone(),
            description: Some(tool.description.clone()),
            parameters: Some(tool.parameters.clone()),
            strict: None,
        },
    })
}

#[derive(Debug, Deserialize)]
struct AnthropicReply {
    model: String,
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Why a model call produced no reply.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum LlmError {
    /// The request could not be built.
    #[display("invalid {provider} request: {message}")]
    Request {
        /// Provider addressed.
        provider: LlmProvider,
        /// Builder or encoding failure.
        message: String,
    },
    /// The request did not complete.
    #[display("{provider} request failed: {message}")]
    Transport {
        /// Provider addressed.
        provider: LlmProvider,
        /// Transport or API failure.
        message: String,
    },
    /// The provider answered with an error status.
    #[display("{provider} returned HTTP {status}: {body}")]
    Status {
        /// Provider addressed.
        provider: LlmProvider,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The reply was not in the expected shape.
    #[display("{provider} reply could not be decoded: {message}")]
    Decode {
        /// Provider addressed.
        provider: LlmProvider,
        /// Decoder message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(provider: LlmProvider) -> LlmClient {
        LlmClient::new(LlmConfig::new(
            provider,
            "sk-test".to_string(),
            "test-model".to_string(),
            256,
        ))
    }

    fn spin_tool() -> ToolSpec {
        ToolSpec::new(
            "spin_spinner".to_string(),
            "Spin".to_string(),
            json!({"type": "object", "properties": {}}),
        )
    }

    #[test]
    fn anthropic_body_forces_a_tool() {
        let body = client(LlmProvider::Anthropic).request_body("rules", "view", &[spin_tool()]);
        assert_eq!(body["tool_choice"], json!({"type": "any"}));
        assert_eq!(body["tools"][0]["name"], "spin_spinner");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["content"], "view");
    }

    #[test]
    fn anthropic_reply_blocks_decode() {
        let raw = json!({
            "model": "claude-test",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Climbing."},
                {"type": "tool_use", "id": "t1", "name": "ascend_ladder_to_square", "input": {"square": 38}}
            ],
            "usage": {"input_tokens": 120, "output_tokens": 9}
        });
        let reply: AnthropicReply = serde_json::from_value(raw).expect("Reply decodes");
        assert_eq!(reply.content.len(), 3);
        assert!(matches!(reply.content[0], AnthropicBlock::Other));
        assert!(matches!(
            &reply.content[2],
            AnthropicBlock::ToolUse { name, input } if name == "ascend_ladder_to_square" && input["square"] == 38
        ));
        assert_eq!(reply.usage.map(|u| u.output_tokens), Some(9));
    }

    #[test]
    fn raw_arguments_are_decoded() {
        let call = ToolCall::from_raw_arguments("move_pawn_to_square".to_string(), r#"{"square": 7}"#);
        assert_eq!(call.arguments(), &json!({"square": 7}));

        let empty = ToolCall::from_raw_arguments("spin_spinner".to_string(), "  ");
        assert_eq!(empty.arguments(), &Value::Null);

        let broken = ToolCall::from_raw_arguments("spin_spinner".to_string(), "{square");
        assert_eq!(broken.arguments(), &json!("{square"));
    }

    #[test]
    fn failed_invocation_keeps_the_error() {
        let err = LlmError::Status {
            provider: LlmProvider::OpenAI,
            status: 429,
            body: "slow down".to_string(),
        };
        let invocation = LlmInvocation::failed(
            LlmProvider::OpenAI,
            "test-model",
            json!({"messages": []}),
            Duration::from_millis(1500),
            &err,
        );
        assert_eq!(*invocation.latency_ms(), 1500);
        assert!(invocation.response().is_none());
        assert_eq!(invocation.error().as_deref(), Some("openai returned HTTP 429: slow down"));
    }

    #[test]
    fn config_debug_hides_the_key() {
        let config = LlmConfig::new(LlmProvider::OpenRouter, "sk-secret".to_string(), "m".to_string(), 1);
        assert!(!format!("{config:?}").contains("sk-secret"));
        assert_eq!("openrouter".parse::<LlmProvider>().ok(), Some(LlmProvider::OpenRouter));
    }
}
