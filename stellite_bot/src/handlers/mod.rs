pub mod commands;
mod moderation;
mod poll;

use std::sync::Arc;

use bot_commons::useful_methods::BotSendHtml;
use html_escape::encode_text;
use teloxide::{
    prelude::*,
    types::{Me, UserId},
};

use crate::{error::HandlerError, state::BotState};

/// Entry point for every new message. Errors stop here: they're logged,
/// apologized for, and sent to the maintainer if there is one.
pub async fn handle_message(
    bot: Bot,
    me: Me,
    message: Message,
    state: Arc<BotState>,
) -> Result<(), HandlerError> {
    let Err(error) = route_message(&bot, &me, &message, &state).await else {
        return Ok(());
    };

    log::error!(
        "Message {} in chat {} caused an error: {error}",
        message.id.0,
        message.chat.id
    );

    // Best effort. The log has the error either way.
    let _ = bot
        .reply_html(
            &message,
            "Sorry, something went wrong while handling that. The error was logged.",
        )
        .await;

    if let Some(dev_user_id) = state.config.get().dev_user_id {
        let report = format!(
            "<b>{}</b>: {}",
            error.kind(),
            encode_text(&error.to_string())
        );
        let _ = bot
            .send_html(UserId(dev_user_id), report.as_str(), None, None)
            .await;
    }

    Ok(())
}

async fn route_message(
    bot: &Bot,
    me: &Me,
    message: &Message,
    state: &BotState,
) -> Result<(), HandlerError> {
    // Bot ignores messages made by itself.
    if message.from.as_ref().map(|from| from.id) == Some(me.id) {
        return Ok(());
    }

    if let Some(members) = message.new_chat_members() {
        return moderation::handle_new_members(bot, me, message, members, state).await;
    }

    let Some(text) = message.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        // Commands for other bots and unknown ones fall silent here.
        if let Some(params) = commands::CommandParams::new(bot, me, message, state) {
            params.run().await?;
        }
        return Ok(());
    }

    if poll::handle_conversation_turn(bot, message, text, state).await? {
        return Ok(());
    }

    moderation::auto_reply(bot, message, text, &state.config.get()).await
}
