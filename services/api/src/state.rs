//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the session store and upstream clients.

use crate::{config::Config, persistence::TranscriptSink, relay::RealtimeRelay};
use onboard_core::{field::FieldSchema, llm_client::LLMClient, session::SessionStore};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub schema: Arc<FieldSchema>,
    pub sessions: Arc<SessionStore>,
    pub llm_client: Arc<dyn LLMClient>,
    pub relay: Arc<RealtimeRelay>,
    pub sink: Arc<TranscriptSink>,
    pub client_page: Arc<String>,
}
