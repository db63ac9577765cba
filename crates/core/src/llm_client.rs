use anyhow::Result;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCallChunk,
        ChatCompletionRequestMessage, ChatCompletionTool, ChatCompletionToolChoiceOption,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::{collections::BTreeMap, pin::Pin, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Represents a tool call requested by the LLM.
pub type ToolCall = ChatCompletionMessageToolCall;

/// Represents the events that can be yielded from a streaming turn.
#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    /// An increment of the assistant's text.
    TextChunk(String),
    /// The fully assembled tool calls, emitted once the stream has finished.
    ToolCalls(Vec<ToolCall>),
}

/// A stream of events from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, OpenAIError>> + Send>>;

/// A generic client for interacting with an LLM.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Starts a streaming completion over `messages`, offering `tools`.
    async fn stream_turn(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMStream>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    /// * `connect_timeout` - Upper bound on establishing the HTTP connection.
    pub fn new(config: OpenAIConfig, model: String, connect_timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            model,
        })
    }
}

/// A tool call being assembled from stream fragments.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn absorb(&mut self, chunk: ChatCompletionMessageToolCallChunk) {
        if let Some(id) = chunk.id {
            self.id = id;
        }
        if let Some(function) = chunk.function {
            if let Some(name) = function.name {
                self.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                self.arguments.push_str(&arguments);
            }
        }
    }

    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: self.name,
                arguments: self.arguments,
            },
        }
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn stream_turn(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMStream> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages).stream(true);
        if !tools.is_empty() {
            args.tools(tools)
                .tool_choice(ChatCompletionToolChoiceOption::Auto);
        }
        let request = args.build()?;

        let mut upstream = self.client.chat().create_stream(request).await?;
        let (tx, rx) = mpsc::channel(64);

        // Text is forwarded as it arrives; tool-call fragments are keyed by
        // index and only released once the upstream stream is exhausted.
        tokio::spawn(async move {
            let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
            while let Some(result) = upstream.next().await {
                let response = match result {
                    Ok(response) => response,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                for choice in response.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty()
                            && tx.send(Ok(LLMStreamEvent::TextChunk(content))).await.is_err()
                        {
                            debug!("Stream receiver dropped, abandoning completion.");
                            return;
                        }
                    }
                    for chunk in choice.delta.tool_calls.unwrap_or_default() {
                        pending.entry(chunk.index).or_default().absorb(chunk);
                    }
                }
            }
            if !pending.is_empty() {
                let calls = pending
                    .into_values()
                    .map(PendingToolCall::into_tool_call)
                    .collect();
                let _ = tx.send(Ok(LLMStreamEvent::ToolCalls(calls))).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
