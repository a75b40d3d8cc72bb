use bot_commons::{is_sender_admin, names::user_mention_html, useful_methods::*};
use teloxide::{
    payloads::{SendPhotoSetters, SendVideoSetters},
    requests::Requester,
    sugar::request::RequestReplyExt,
    types::{InputFile, Me, Message, ParseMode, User},
    Bot, RequestError,
};

use crate::{
    config::{AutoReply, BotConfig, MediaKind},
    error::HandlerError,
    state::BotState,
};

/// Ban bots that non-admins brought in, and greet the humans.
pub async fn handle_new_members(
    bot: &Bot,
    me: &Me,
    message: &Message,
    members: &[User],
    state: &BotState,
) -> Result<(), HandlerError> {
    let config = state.config.get();

    let is_foreign_bot = |x: &&User| x.is_bot && x.id != me.id;

    if config.ban_bots
        && members.iter().any(|x| is_foreign_bot(&x))
        && !is_sender_admin(bot, message).await?
    {
        for member in members.iter().filter(is_foreign_bot) {
            match bot.ban_chat_member(message.chat.id, member.id).await {
                Ok(_) => log::info!("Banned bot {} from chat {}", member.id, message.chat.id),
                Err(RequestError::Api(e)) => log::debug!("Failed to ban bot {}: {e}", member.id),
                Err(e) => return Err(e.into()),
            }
        }
    }

    let Some(welcome) = &config.welcome else {
        return Ok(());
    };

    for member in members.iter().filter(|x| !x.is_bot) {
        let greeting = welcome_text(welcome, member);
        bot.send_html(message.chat.id, greeting.as_str(), None, None)
            .await?;
    }

    Ok(())
}

/// Welcome message with `{name}` replaced by a mention of the member.
fn welcome_text(template: &str, member: &User) -> String {
    template.replace("{name}", &user_mention_html(member))
}

/// First auto-reply whose trigger is in the text, ignoring case.
pub fn find_auto_reply<'a>(auto_replies: &'a [AutoReply], text: &str) -> Option<&'a AutoReply> {
    let text = text.to_lowercase();
    auto_replies.iter().find(|auto_reply| {
        !auto_reply.trigger.is_empty() && text.contains(&auto_reply.trigger.to_lowercase())
    })
}

/// Answer a plain message with media if it mentions a trigger.
pub async fn auto_reply(
    bot: &Bot,
    message: &Message,
    text: &str,
    config: &BotConfig,
) -> Result<(), HandlerError> {
    let Some(auto_reply) = find_auto_reply(&config.auto_replies, text) else {
        return Ok(());
    };

    let path = config.resource(&auto_reply.file);
    if !path.is_file() {
        log::warn!(
            "Auto-reply for {:?} points to missing {}",
            auto_reply.trigger,
            path.display()
        );
        return Ok(());
    }

    log::debug!("Auto-replying to {:?} in {}", auto_reply.trigger, message.chat.id);

    match auto_reply.media {
        MediaKind::Photo => {
            let _ = bot.uploading_photo(message.chat.id).await;
            let mut request = bot
                .send_photo(message.chat.id, InputFile::file(path))
                .reply_to(message.id);
            if let Some(caption) = &auto_reply.caption {
                request = request.caption(caption).parse_mode(ParseMode::Html);
            }
            request.await?;
        }
        MediaKind::Video => {
            let mut request = bot
                .send_video(message.chat.id, InputFile::file(path))
                .reply_to(message.id);
            if let Some(caption) = &auto_reply.caption {
                request = request.caption(caption).parse_mode(ParseMode::Html);
            }
            request.await?;
        }
    }

    Ok(())
}
