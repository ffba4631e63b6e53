//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for various services used by rcav2:
//! - Chat services (e.g., Slack)
//! - Database services (e.g., SurrealDB)
//! - LLM services (e.g., any OpenAI compatible API)
//! - The software factory: LogJuicer and the Zuul weeder export
//! - The related issues search in Jira and Slack
//!
//! The chat, database and LLM modules define both generic traits and concrete
//! implementations, allowing for extensibility and easy testing.

pub mod chat;
pub mod db;
pub mod git;
pub mod jira;
pub mod llm;
pub mod logjuicer;
pub mod sf;
pub mod slack_search;
pub mod zuul;
