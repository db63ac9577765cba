//! WebSocket Chat Sessions
//!
//! This module contains the logic for the text-chat onboarding channel. It is
//! structured into submodules for clarity:
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Manages the WebSocket connection lifecycle, from handshake to termination.
//! - `cycle`: Runs a single agent turn and relays its progress to the client.

mod cycle;
pub mod protocol;
pub mod session;

pub use session::ws_handler;
