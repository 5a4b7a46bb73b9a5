//! Switchboard Engine Library
//!
//! This library provides the core functionality of the switchboard desk.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Database persistence module
pub mod db;

/// Message bus for turn progress events
pub mod message_bus;

/// LLM provider abstraction layer
pub mod llm;

/// Conductor orchestration module
pub mod conductor;

/// Task-type workers
pub mod workers;

/// Tool collaborators invoked from worker loops
pub mod tools;

/// Policy document lookup
pub mod knowledge;

/// Durable session checkpoints
pub mod session;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
