//! Onboarding API Library Crate
//!
//! This library contains all the logic for the onboarding web service,
//! including the application state, the voice session relay, the persistence
//! sink, API handlers, WebSocket chat logic, and routing. The `api` binary is
//! a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod persistence;
pub mod relay;
pub mod router;
pub mod state;
pub mod ws;
