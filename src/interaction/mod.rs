//! Chat commands handling for eodbot.
//!
//! This module turns the chat commands into analysis requests, and posts the
//! reports back to the chat once they are available.

pub mod rca_command;
