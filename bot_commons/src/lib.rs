//! Boilerplate shared by the bots in this workspace, because some things
//! are the same every time and writing them twice is no fun.

use std::future::Future;

use teloxide::{prelude::*, types::ChatMember};

pub mod names;
pub mod useful_methods;

/// Initialize logging and run the `closure` to completion in an async runtime,
/// returning whatever it returns.
///
/// Logging is enabled by default on level `info` unless overridden
/// by environment variable `RUST_LOG`. This uses the crate
/// [pretty_env_logger][] internally, see its documentation for more details.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
///
/// # Panics
///
/// Panics if the tokio runtime can't be built.
pub fn start_everything<T>(closure: impl Future<Output = T>) -> T {
    let log_level = std::env::var_os("RUST_LOG")
        .unwrap_or_else(|| std::ffi::OsString::from("info"))
        .into_string()
        .unwrap_or_else(|_| String::from("info"));

    // journald timestamps lines on its own.
    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_level);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("Starting up...");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build the tokio runtime!")
        .block_on(closure)
}

/// Find out if a user of this ID is an admin of the specified chat of that ID.
/// If so, returns the `ChatMember` object describing their permissions,
/// otherwise `None`.
pub async fn get_admin_of(
    bot: &Bot,
    user: UserId,
    chat: ChatId,
) -> Result<Option<ChatMember>, teloxide::RequestError> {
    Ok(bot
        .get_chat_administrators(chat)
        .await?
        .into_iter()
        .find(|x| x.user.id == user))
}

/// Checks if the sender of this message is an admin of the chat it was sent in.
///
/// Private chats have no admins, so this is always `false` for them.
pub async fn is_sender_admin(bot: &Bot, message: &Message) -> Result<bool, teloxide::RequestError> {
    if message.chat.is_private() {
        return Ok(false);
    }

    // In such a case, "from" is @GroupAnonymousBot for backwards compatibility.
    if let Some(sender_chat) = &message.sender_chat {
        // If it's posted by the chat itself, it's an anonymous admin.
        return Ok(sender_chat.id == message.chat.id);
    }

    let Some(user) = &message.from else {
        return Ok(false);
    };

    Ok(get_admin_of(bot, user.id, message.chat.id).await?.is_some())
}
