//! Onboarding Tool Service
//!
//! Exposes the session store to the chat model through the Model Context
//! Protocol (MCP). One service instance is bound to one session; the model
//! decides when to call its tools, the store enforces no ordering.

use crate::session::{AnswerSaved, SessionStore};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Arguments for the `save_answer` tool.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct SaveAnswerArgs {
    /// The schema field name being answered.
    #[schemars(description = "The field name exactly as listed in the instructions")]
    pub key: String,
    /// The user's answer, as text.
    #[schemars(description = "The user's answer for that field, as plain text")]
    pub value: String,
}

/// MCP server exposing the session store to the agent.
pub struct OnboardingService {
    store: Arc<SessionStore>,
    session_id: Uuid,
    /// Receives a notification for every successful write.
    saved_tx: Option<mpsc::Sender<AnswerSaved>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for OnboardingService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl OnboardingService {
    pub fn new(
        store: Arc<SessionStore>,
        session_id: Uuid,
        saved_tx: Option<mpsc::Sender<AnswerSaved>>,
    ) -> Self {
        Self {
            store,
            session_id,
            saved_tx,
            tool_router: Self::tool_router(),
        }
    }

    /// Stores one answer for the bound session. Repeating a key replaces the
    /// previous value.
    #[tool(
        description = "Save the user's answer for one onboarding field. Call this each time the user provides or corrects a value."
    )]
    pub async fn save_answer(&self, args: Parameters<SaveAnswerArgs>) -> Result<String, String> {
        info!(session_id = %self.session_id, key = %args.0.key, "Executing tool 'save_answer'");
        let saved = self
            .store
            .save_answer(self.session_id, &args.0.key, &args.0.value)
            .await
            .map_err(|e| e.to_string())?;

        let reply = format!("OK. Saved '{}' = '{}'.", saved.key, saved.value);
        if let Some(tx) = &self.saved_tx {
            if tx.send(saved).await.is_err() {
                warn!("Failed to forward saved answer: receiver dropped.");
            }
        }
        Ok(reply)
    }

    /// Returns every answer collected so far together with the write history.
    #[tool(description = "Get all answers collected so far in this session and their history.")]
    pub async fn get_session_data(&self) -> Result<String, String> {
        info!(session_id = %self.session_id, "Executing tool 'get_session_data'");
        let data = self
            .store
            .get_session_data(self.session_id)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_string(&data).map_err(|e| format!("Failed to serialize session data: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn args(key: &str, value: &str) -> Parameters<SaveAnswerArgs> {
        Parameters(SaveAnswerArgs {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    #[tokio::test]
    async fn test_save_answer_writes_and_notifies() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let id = store.start(json!({})).await;
        let (tx, mut rx) = mpsc::channel(4);
        let service = OnboardingService::new(store.clone(), id, Some(tx));

        let reply = service.save_answer(args("name", "Ana")).await.unwrap();
        assert_eq!(reply, "OK. Saved 'name' = 'Ana'.");

        let saved = rx.recv().await.unwrap();
        assert_eq!(saved.key, "name");
        assert_eq!(saved.session_id, id);
        assert_eq!(store.get(id).await.unwrap().answers["name"], "Ana");
    }

    #[tokio::test]
    async fn test_save_answer_unknown_session_is_an_error() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let (tx, mut rx) = mpsc::channel(4);
        let service = OnboardingService::new(store, Uuid::new_v4(), Some(tx));

        let err = service.save_answer(args("name", "Ana")).await.unwrap_err();
        assert!(err.contains("not found"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_session_data_returns_json() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let id = store.start(json!({})).await;
        let service = OnboardingService::new(store, id, None);

        service.save_answer(args("city", "Lisbon")).await.unwrap();
        let raw = service.get_session_data().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["answers"]["city"], "Lisbon");
        assert_eq!(value["history"].as_array().unwrap().len(), 1);
    }
}
