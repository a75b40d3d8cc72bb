//! Source code for the Stellite community bot on Telegram.

/// Typed configuration document and its persistence.
pub mod config;

/// The global poll and its conversation state machine.
pub mod poll;

/// Errors that handlers can run into.
mod error;

/// State shared by all handlers.
mod state;

/// Talking to things that aren't Telegram.
mod services;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
pub use state::Lifecycle;

/// The configuration file, in the working directory.
pub const CONFIG_PATH: &str = "config.json";

/// Exit code asking the process supervisor to start the bot again.
pub const RESTART_EXIT_CODE: i32 = 3;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
