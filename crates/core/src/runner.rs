//! Drives one conversational turn: streams the model's reply, executes any
//! tool calls it requests and feeds their results back until the model
//! answers with plain text.

use crate::llm_client::{LLMClient, LLMStreamEvent, ToolCall};
use anyhow::{Context, Result, bail};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestToolMessageArgs, ChatCompletionTool,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The result of invoking one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

/// Executes the tools the model asks for.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome>;
}

/// Progress notifications emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Delta(String),
    ToolCall { name: String, arguments: Value },
    ToolOutput { name: String, output: String, is_error: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    /// Maximum model round-trips in a single turn.
    pub max_tool_rounds: usize,
    /// Longest allowed silence on the token stream.
    pub idle_timeout: Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs a turn over `messages`, appending the assistant and tool messages it
/// produces. Returns the final assistant text.
///
/// Events are sent to `events` as they happen; a closed receiver is ignored.
pub async fn run_turn(
    llm: &dyn LLMClient,
    invoker: &dyn ToolInvoker,
    messages: &mut Vec<ChatCompletionRequestMessage>,
    tools: &[ChatCompletionTool],
    events: mpsc::Sender<TurnEvent>,
    limits: TurnLimits,
) -> Result<String> {
    for round in 0..limits.max_tool_rounds {
        let mut stream = llm.stream_turn(messages.clone(), tools.to_vec()).await?;
        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        loop {
            let next = tokio::time::timeout(limits.idle_timeout, stream.next())
                .await
                .context("Model stream stalled")?;
            match next {
                Some(Ok(LLMStreamEvent::TextChunk(chunk))) => {
                    text.push_str(&chunk);
                    let _ = events.send(TurnEvent::Delta(chunk)).await;
                }
                Some(Ok(LLMStreamEvent::ToolCalls(calls))) => tool_calls.extend(calls),
                Some(Err(e)) => return Err(e).context("Model stream failed"),
                None => break,
            }
        }

        if tool_calls.is_empty() {
            if !text.is_empty() {
                messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(text.clone())
                        .build()?
                        .into(),
                );
            }
            return Ok(text);
        }

        debug!(round, calls = tool_calls.len(), "Model requested tools");
        let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
        assistant.tool_calls(tool_calls.clone());
        if !text.is_empty() {
            assistant.content(text);
        }
        messages.push(assistant.build()?.into());

        for call in tool_calls {
            let outcome = execute(invoker, &call, &events).await?;
            messages.push(
                ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(call.id.clone())
                    .content(outcome.output)
                    .build()?
                    .into(),
            );
        }
    }

    bail!(
        "Model kept calling tools after {} rounds",
        limits.max_tool_rounds
    )
}

async fn execute(
    invoker: &dyn ToolInvoker,
    call: &ToolCall,
    events: &mpsc::Sender<TurnEvent>,
) -> Result<ToolOutcome> {
    let name = call.function.name.clone();
    let arguments: Value = match serde_json::from_str(&call.function.arguments) {
        Ok(value) => value,
        Err(e) => {
            // Bad JSON is the model's mistake; tell it so and let it retry.
            warn!(tool = %name, error = %e, "Model sent unparseable tool arguments");
            let outcome = ToolOutcome {
                output: format!("Invalid JSON arguments: {}", e),
                is_error: true,
            };
            let _ = events
                .send(TurnEvent::ToolCall {
                    name: name.clone(),
                    arguments: Value::String(call.function.arguments.clone()),
                })
                .await;
            let _ = events
                .send(TurnEvent::ToolOutput {
                    name,
                    output: outcome.output.clone(),
                    is_error: true,
                })
                .await;
            return Ok(outcome);
        }
    };

    let _ = events
        .send(TurnEvent::ToolCall {
            name: name.clone(),
            arguments: arguments.clone(),
        })
        .await;
    let outcome = invoker.invoke(&name, arguments).await?;
    let _ = events
        .send(TurnEvent::ToolOutput {
            name,
            output: outcome.output.clone(),
            is_error: outcome.is_error,
        })
        .await;
    Ok(outcome)
}
