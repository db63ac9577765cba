//! Shared fixtures for the integration tests: an app wired to temp files, a
//! scripted LLM and a throwaway server on an ephemeral port.

#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestMessage, ChatCompletionTool,
        ChatCompletionToolType, FunctionCall,
    },
};
use async_trait::async_trait;
use onboard_api::{
    config::Config, persistence::TranscriptSink, relay::RealtimeRelay, router::create_router,
    state::AppState,
};
use onboard_core::{
    field::{FieldDescriptor, FieldSchema},
    llm_client::{LLMClient, LLMStream, LLMStreamEvent},
    session::SessionStore,
};
use std::{
    collections::VecDeque,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use tracing::Level;

/// Replays one canned reply per model call.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Vec<LLMStreamEvent>>>,
    pub requests: Mutex<Vec<Vec<ChatCompletionRequestMessage>>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Vec<LLMStreamEvent>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedLlm {
    async fn stream_turn(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        _tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMStream> {
        self.requests.lock().unwrap().push(messages);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left"))?;
        Ok(Box::pin(futures::stream::iter(reply.into_iter().map(Ok::<_, OpenAIError>))))
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ChatCompletionMessageToolCall {
    ChatCompletionMessageToolCall {
        id: id.to_string(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

pub fn sample_schema() -> FieldSchema {
    FieldSchema::new(vec![
        FieldDescriptor::new("full_name", "string", "What is your full name?"),
        FieldDescriptor::new("team_size", "integer", "How many people are on your team?"),
    ])
}

pub fn test_config(dir: &TempDir, calls_url: &str, api_key: Option<&str>) -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        openai_api_key: api_key.map(str::to_string),
        openai_api_base: "http://127.0.0.1:9/v1".to_string(),
        chat_model: "gpt-4o".to_string(),
        realtime_model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
        realtime_voice: "alloy".to_string(),
        realtime_calls_url: calls_url.to_string(),
        schema_path: PathBuf::from("schema.json"),
        strict_schema: false,
        data_path: dir.path().join("collected_data.json"),
        transcript_path: dir.path().join("conversation_transcript.json"),
        client_page_path: PathBuf::from("static/index.html"),
        require_complete_save: false,
        session_ttl: Duration::from_secs(3600),
        upstream_timeout: Duration::from_secs(5),
        upstream_retry_backoff: Duration::from_millis(10),
        log_level: Level::INFO,
    }
}

pub fn app_state(config: Config, llm_client: Arc<dyn LLMClient>) -> Arc<AppState> {
    let relay = RealtimeRelay::new(
        config.realtime_calls_url.clone(),
        config.openai_api_key.clone(),
        config.upstream_timeout,
        config.upstream_retry_backoff,
    )
    .unwrap();
    let sink = TranscriptSink::new(config.data_path.clone(), config.transcript_path.clone());
    Arc::new(AppState {
        sessions: Arc::new(SessionStore::new(config.session_ttl)),
        config: Arc::new(config),
        schema: Arc::new(sample_schema()),
        llm_client,
        relay: Arc::new(relay),
        sink: Arc::new(sink),
        client_page: Arc::new("<h1>Onboarding</h1>".to_string()),
    })
}

/// Serves the app on an ephemeral port and returns its address.
pub async fn spawn_app(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

/// Serves an arbitrary router, used for fake upstreams.
pub async fn spawn_router(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
