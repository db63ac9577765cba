//! Defines the WebSocket message protocol between the chat client and the API server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Phrases that end the conversation when sent on their own.
pub const TERMINATION_PHRASES: &[&str] = &["exit", "quit", "done", "bye"];

/// Structured messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a session. This must be the first message.
    Start {
        #[serde(default)]
        schema: Value,
    },
    /// A user utterance wrapped in JSON.
    Message { text: String },
    /// Ends the conversation.
    End,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the session was created.
    SessionStarted { session_id: Uuid },
    /// An increment of the assistant's reply.
    Delta { content: String },
    /// The assistant invoked a tool.
    ToolCall { name: String, arguments: Value },
    /// A tool returned.
    ToolOutput {
        name: String,
        output: String,
        is_error: bool,
    },
    /// An answer was written to the session.
    AnswerSaved { key: String, value: String },
    /// The assistant finished its reply for this turn.
    MessageComplete { content: String, turn: u32 },
    /// The conversation is over; the connection closes next.
    ConversationEnded {
        message: String,
        session_id: Uuid,
        answers: HashMap<String, String>,
    },
    /// Reports an error to the client.
    Error { message: String },
}

/// A classified inbound text frame.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Start { schema: Value },
    Utterance(String),
    End,
    Malformed(String),
}

/// Classifies a text frame. JSON objects must be valid `ClientMessage`s; a
/// JSON string is unwrapped; anything else is a plain utterance.
pub fn parse_inbound(text: &str) -> Inbound {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Inbound::Malformed("Empty message".to_string());
    }

    if trimmed.starts_with('{') {
        return match serde_json::from_str::<ClientMessage>(trimmed) {
            Ok(ClientMessage::Start { schema }) => Inbound::Start { schema },
            Ok(ClientMessage::Message { text }) if text.trim().is_empty() => {
                Inbound::Malformed("Empty message".to_string())
            }
            Ok(ClientMessage::Message { text }) => Inbound::Utterance(text),
            Ok(ClientMessage::End) => Inbound::End,
            Err(e) => Inbound::Malformed(format!("Invalid message: {}", e)),
        };
    }

    if trimmed.starts_with('"') {
        if let Ok(inner) = serde_json::from_str::<String>(trimmed) {
            return Inbound::Utterance(inner);
        }
    }

    Inbound::Utterance(text.to_string())
}

/// Whether `text` is one of the termination phrases (trimmed, any case).
pub fn is_termination(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    TERMINATION_PHRASES.contains(&normalized.as_str())
}
