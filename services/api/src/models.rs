//! API Models
//!
//! Request and response bodies for the REST routes, annotated for `utoipa`.

use onboard_core::session::{HistoryEvent, Session};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One line of the voice conversation, as reported by the client.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SaveDataRequest {
    #[schema(value_type = Object, example = json!({"name": "Ana"}))]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub transcript: Vec<ConversationMessage>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SaveDataResponse {
    #[schema(example = "Data and transcript saved successfully!")]
    pub message: String,
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
    pub transcript_messages: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HistoryEntry {
    pub key: String,
    pub value: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl From<HistoryEvent> for HistoryEntry {
    fn from(event: HistoryEvent) -> Self {
        Self {
            key: event.key,
            value: event.value,
            recorded_at: event.recorded_at,
        }
    }
}

/// Public view of a chat session.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SessionSnapshot {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub answers: HashMap<String, String>,
    pub history: Vec<HistoryEntry>,
    pub turns: u32,
}

impl From<Session> for SessionSnapshot {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id,
            answers: session.answers,
            history: session.history.into_iter().map(HistoryEntry::from).collect(),
            turns: session.turn_count,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert!(serde_json::from_str::<Role>("\"system\"").is_err());
    }

    #[test]
    fn test_save_request_transcript_defaults_to_empty() {
        let request: SaveDataRequest = serde_json::from_str(r#"{"data": {"name": "Ana"}}"#).unwrap();
        assert_eq!(request.data["name"], "Ana");
        assert!(request.transcript.is_empty());
    }

    #[test]
    fn test_save_request_requires_data_object() {
        assert!(serde_json::from_str::<SaveDataRequest>(r#"{"transcript": []}"#).is_err());
        assert!(serde_json::from_str::<SaveDataRequest>(r#"{"data": [1, 2]}"#).is_err());
    }

    #[test]
    fn test_save_response_shape() {
        let response = SaveDataResponse {
            message: "Data and transcript saved successfully!".to_string(),
            data: json!({"name": "Ana"}).as_object().unwrap().clone(),
            transcript_messages: 0,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "message": "Data and transcript saved successfully!",
                "data": {"name": "Ana"},
                "transcript_messages": 0
            })
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            error: "Session not found".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"error":"Session not found"}"#
        );
    }
}
