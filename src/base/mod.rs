//! Core components, types, and utilities for the RCA service.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - System directives for the LLM agents.
//! - Common types and result handling.

pub mod config;
pub mod prompts;
pub mod types;
