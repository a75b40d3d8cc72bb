/// Price and market data lookups.
pub mod market;

/// Updating the bot from its release URL.
pub mod update;

/// Relaying a timeline feed into a chat.
pub mod timeline;
