//! Manages the WebSocket connection lifecycle for a chat onboarding session.

use super::{
    cycle::{chat_tools, handle_turn},
    protocol::{Inbound, ServerMessage, is_termination, parse_inbound},
};
use crate::state::AppState;
use anyhow::Result;
use async_openai::types::ChatCompletionRequestMessage;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use onboard_core::{agent::OnboardingService, field::FieldSchema};
use rmcp::ServiceExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

const GOODBYE: &str = "Thanks for your time! Your answers have been recorded. Goodbye.";

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Waits for the `start` handshake, creates the session and then spawns the
/// chat loop.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let temp_id: u32 = rand::random();
    tracing::Span::current().record("session_id", &temp_id.to_string());
    info!("New WebSocket connection. Awaiting start...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx_arc = Arc::new(Mutex::new(socket_tx));

    let Some((session_id, schema)) = await_start(&mut socket_rx, &socket_tx_arc, &state).await
    else {
        return;
    };
    tracing::Span::current().record("session_id", &session_id.to_string());

    if send_msg(
        &mut *socket_tx_arc.lock().await,
        ServerMessage::SessionStarted { session_id },
    )
    .await
    .is_err()
    {
        error!("Failed to send SessionStarted message to client.");
        return;
    }

    // Spawn the main session loop in a separate, instrumented task.
    let session_span = tracing::info_span!("onboarding_chat", %session_id);
    tokio::spawn(
        async move {
            if let Err(e) =
                run_chat_session(state, socket_tx_arc, socket_rx, session_id, schema).await
            {
                error!(error = ?e, "Chat session terminated with error.");
            }
            info!("Chat session finished.");
        }
        .instrument(session_span),
    );
}

/// Reads frames until a valid `start` message arrives.
///
/// Anything else is answered with an error and the wait continues. Returns
/// `None` if the client goes away first.
async fn await_start(
    socket_rx: &mut SplitStream<WebSocket>,
    socket_tx: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    state: &Arc<AppState>,
) -> Option<(Uuid, FieldSchema)> {
    while let Some(msg_result) = socket_rx.next().await {
        let reason = match msg_result {
            Ok(Message::Text(text)) => match parse_inbound(text.as_str()) {
                Inbound::Start { schema } => {
                    let fields = FieldSchema::from_echo(&schema)
                        .unwrap_or_else(|| state.schema.as_ref().clone());
                    let session_id = state.sessions.start(schema).await;
                    return Some((session_id, fields));
                }
                Inbound::Malformed(reason) => reason,
                Inbound::Utterance(_) | Inbound::End => {
                    "Send {\"action\":\"start\"} before chatting.".to_string()
                }
            },
            Ok(Message::Binary(_)) => "Binary frames are not supported.".to_string(),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                return None;
            }
        };

        warn!(%reason, "Rejected message before start");
        if send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::Error { message: reason },
        )
        .await
        .is_err()
        {
            return None;
        }
    }
    info!("Client disconnected before sending start message.");
    None
}

/// Keeps the session attached to this connection for as long as the chat
/// loop runs, so the idle sweeper never removes it mid-conversation.
async fn run_chat_session(
    state: Arc<AppState>,
    socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    socket_rx: SplitStream<WebSocket>,
    session_id: Uuid,
    schema: FieldSchema,
) -> Result<()> {
    state.sessions.attach(session_id).await?;
    let result = chat_loop(&state, socket_tx, socket_rx, session_id, schema).await;
    state.sessions.detach(session_id).await;
    result
}

/// The main event loop for an active chat session.
///
/// Turns are strictly serial: the next client frame is only read once the
/// current turn has finished streaming.
async fn chat_loop(
    state: &Arc<AppState>,
    socket_tx: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    mut socket_rx: SplitStream<WebSocket>,
    session_id: Uuid,
    schema: FieldSchema,
) -> Result<()> {
    let (saved_tx, mut saved_rx) = mpsc::channel(16);
    let service = OnboardingService::new(state.sessions.clone(), session_id, Some(saved_tx));
    let (server_transport, client_transport) = tokio::io::duplex(4096);

    // Spawn the agent's tool-handling service.
    let agent_tool_handle = tokio::spawn(async move {
        if let Ok(service) = service.serve(server_transport).await {
            let _ = service.waiting().await;
        }
    });
    let mcp_client = ().serve(client_transport).await?;
    let tools = chat_tools(&mcp_client).await?;

    let mut history: Vec<ChatCompletionRequestMessage> = Vec::new();

    loop {
        tokio::select! {
            // Handle messages from the client WebSocket.
            msg_result = socket_rx.next() => {
                let Some(msg_result) = msg_result else {
                    info!("Client disconnected.");
                    break;
                };
                let text = match msg_result {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(_)) => {
                        send_msg(&mut *socket_tx.lock().await, ServerMessage::Error { message: "Binary frames are not supported.".to_string() }).await?;
                        continue;
                    }
                    Ok(Message::Close(_)) => {
                        info!("Client sent close frame. Shutting down session.");
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                    Err(e) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                };

                state.sessions.touch(session_id).await?;

                match parse_inbound(text.as_str()) {
                    Inbound::End => {
                        end_conversation(state, &socket_tx, session_id).await?;
                        break;
                    }
                    Inbound::Utterance(utterance) if is_termination(&utterance) => {
                        end_conversation(state, &socket_tx, session_id).await?;
                        break;
                    }
                    Inbound::Utterance(utterance) => {
                        let turn = handle_turn(
                            state, session_id, &schema, &mut history, &mcp_client,
                            &tools, &utterance, &socket_tx, &mut saved_rx,
                        )
                        .await;
                        if let Err(e) = turn {
                            error!(error = ?e, "Turn failed, closing connection.");
                            let mut sink = socket_tx.lock().await;
                            let _ = send_msg(&mut sink, ServerMessage::Error { message: format!("The assistant failed to respond: {}", e) }).await;
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Inbound::Start { .. } => {
                        send_msg(&mut *socket_tx.lock().await, ServerMessage::Error { message: "Session already started.".to_string() }).await?;
                    }
                    Inbound::Malformed(reason) => {
                        warn!(%reason, "Malformed client message");
                        send_msg(&mut *socket_tx.lock().await, ServerMessage::Error { message: reason }).await?;
                    }
                }
            },
            // Answers saved outside of a turn.
            Some(saved) = saved_rx.recv() => {
                send_msg(&mut *socket_tx.lock().await, ServerMessage::AnswerSaved { key: saved.key, value: saved.value }).await?;
            },
        }
    }

    // Clean up background tasks on exit.
    drop(mcp_client);
    agent_tool_handle.abort();
    info!("WebSocket connection closed and chat session terminated.");
    Ok(())
}

/// Sends exactly one `conversation_ended` event followed by a close frame.
async fn end_conversation(
    state: &Arc<AppState>,
    socket_tx: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    session_id: Uuid,
) -> Result<()> {
    let answers = state
        .sessions
        .get_session_data(session_id)
        .await
        .map(|data| data.answers)
        .unwrap_or_default();
    info!(answers = answers.len(), "Conversation ended by user.");

    let mut sink = socket_tx.lock().await;
    send_msg(
        &mut sink,
        ServerMessage::ConversationEnded {
            message: GOODBYE.to_string(),
            session_id,
            answers,
        },
    )
    .await?;
    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
