//! Runs one chat turn and relays its progress to the client as it happens.

use crate::{
    state::AppState,
    ws::{protocol::ServerMessage, session::send_msg},
};
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    FunctionObjectArgs,
};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use onboard_core::{
    field::FieldSchema,
    prompt::chat_instructions,
    runner::{ToolInvoker, ToolOutcome, TurnEvent, TurnLimits, run_turn},
    session::AnswerSaved,
};
use rmcp::{
    ServiceError,
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

/// Lists the MCP tools in the shape the chat completion API expects.
pub(crate) async fn chat_tools(
    mcp_client: &RunningService<RoleClient, ()>,
) -> Result<Vec<ChatCompletionTool>> {
    mcp_client
        .list_all_tools()
        .await?
        .into_iter()
        .map(|t| {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(t.name)
                        .description(t.description.unwrap_or_default())
                        .parameters(serde_json::to_value(&*t.input_schema)?)
                        .build()?,
                )
                .build()?)
        })
        .collect::<Result<Vec<_>>>()
}

/// Forwards model tool calls to the session's MCP server.
struct McpToolInvoker<'a> {
    client: &'a RunningService<RoleClient, ()>,
}

#[async_trait]
impl ToolInvoker for McpToolInvoker<'_> {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolOutcome> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Ok(ToolOutcome {
                    output: format!("Tool arguments must be a JSON object, got {}", other),
                    is_error: true,
                });
            }
        };

        let result = match self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
        {
            Ok(result) => result,
            // Unknown tool or bad arguments: the model can recover from this.
            Err(ServiceError::McpError(e)) => {
                warn!(tool = %name, error = %e.message, "Tool call rejected");
                return Ok(ToolOutcome {
                    output: e.message.to_string(),
                    is_error: true,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let is_error = result.is_error.unwrap_or(false);
        let annotated_content = result
            .content
            .context("Tool call returned no content")?
            .pop()
            .context("Content list was empty")?;
        let output = match annotated_content.raw {
            RawContent::Text(text_content) => text_content.text,
            _ => "{\"error\": \"Unexpected content type from tool\"}".to_string(),
        };
        Ok(ToolOutcome { output, is_error })
    }
}

fn to_server_message(event: TurnEvent) -> ServerMessage {
    match event {
        TurnEvent::Delta(content) => ServerMessage::Delta { content },
        TurnEvent::ToolCall { name, arguments } => ServerMessage::ToolCall { name, arguments },
        TurnEvent::ToolOutput {
            name,
            output,
            is_error,
        } => ServerMessage::ToolOutput {
            name,
            output,
            is_error,
        },
    }
}

fn saved_message(saved: AnswerSaved) -> ServerMessage {
    ServerMessage::AnswerSaved {
        key: saved.key,
        value: saved.value,
    }
}

/// Handles a single user utterance.
///
/// This involves:
/// 1.  Building the system prompt from the fields and the answers so far.
/// 2.  Running the turn, which may call tools several times.
/// 3.  Relaying deltas, tool activity and saved answers while it runs.
/// 4.  Recording the turn and sending `message_complete`.
#[allow(clippy::too_many_arguments)]
pub async fn handle_turn(
    state: &Arc<AppState>,
    session_id: Uuid,
    schema: &FieldSchema,
    history: &mut Vec<ChatCompletionRequestMessage>,
    mcp_client: &RunningService<RoleClient, ()>,
    tools: &[ChatCompletionTool],
    user_text: &str,
    socket_tx: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    saved_rx: &mut mpsc::Receiver<AnswerSaved>,
) -> Result<()> {
    let answers = state.sessions.get_session_data(session_id).await?.answers;

    let mut messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(chat_instructions(&schema.fields, &answers))
            .build()?
            .into(),
    ];
    messages.extend(history.iter().cloned());
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(user_text)
            .build()?
            .into(),
    );

    let invoker = McpToolInvoker { client: mcp_client };
    let limits = TurnLimits {
        idle_timeout: state.config.upstream_timeout,
        ..TurnLimits::default()
    };
    let (events_tx, mut events_rx) = mpsc::channel(64);

    let reply = {
        let turn = run_turn(
            state.llm_client.as_ref(),
            &invoker,
            &mut messages,
            tools,
            events_tx,
            limits,
        );
        tokio::pin!(turn);

        let reply = loop {
            tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    send_msg(&mut *socket_tx.lock().await, to_server_message(event)).await?;
                }
                Some(saved) = saved_rx.recv() => {
                    send_msg(&mut *socket_tx.lock().await, saved_message(saved)).await?;
                }
                result = &mut turn => break result?,
            }
        };

        // Flush whatever was queued as the turn completed.
        let mut sink = socket_tx.lock().await;
        while let Ok(event) = events_rx.try_recv() {
            send_msg(&mut sink, to_server_message(event)).await?;
        }
        while let Ok(saved) = saved_rx.try_recv() {
            send_msg(&mut sink, saved_message(saved)).await?;
        }
        reply
    };

    // Keep everything but the per-turn system prompt.
    messages.remove(0);
    *history = messages;

    let turn = state.sessions.record_turn(session_id, &reply).await?;
    info!(turn, reply_chars = reply.len(), "Turn complete");
    send_msg(
        &mut *socket_tx.lock().await,
        ServerMessage::MessageComplete {
            content: reply,
            turn,
        },
    )
    .await?;

    Ok(())
}
