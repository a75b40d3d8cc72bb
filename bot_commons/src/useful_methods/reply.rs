use std::time::Duration;

use futures::Future;
use teloxide::{
    payloads::SendMessageSetters,
    requests::Requester,
    sugar::request::{RequestLinkPreviewExt, RequestReplyExt},
    types::{Message, MessageId, ParseMode, Recipient, ReplyMarkup},
    Bot, RequestError,
};

/// How many times a message is attempted before giving up.
const SEND_ATTEMPTS: u8 = 3;

pub trait BotSendHtml {
    /// Opinionated method to send a message, with HTML markup, no link
    /// previews, and retries due to flood waiting or any other issues.
    fn send_html<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
        markup: impl Into<Option<ReplyMarkup>> + Send,
    ) -> impl Future<Output = Result<Message, RequestError>> + Send;

    /// Convenience method around [`BotSendHtml::send_html`] to reply
    /// to a message in the same chat.
    fn reply_html<'a>(
        &'a self,
        message: &'a Message,
        text: impl Into<&'a str> + Send,
    ) -> impl Future<Output = Result<Message, RequestError>> + Send {
        self.send_html(message.chat.id, text, message.id, None)
    }
}

impl BotSendHtml for Bot {
    async fn send_html<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
        markup: impl Into<Option<ReplyMarkup>> + Send,
    ) -> Result<Message, RequestError> {
        let to_where: Recipient = to_where.into();
        let text = text.into();
        let reply_to = reply_to.into();
        let markup = markup.into();

        let mut looped: u8 = 0;
        loop {
            looped += 1;
            let mut request = self
                .send_message(to_where.clone(), text)
                .parse_mode(ParseMode::Html)
                .disable_link_preview(true);
            if let Some(reply_to) = reply_to {
                request = request.reply_to(reply_to);
            }
            if let Some(markup) = &markup {
                request = request.reply_markup(markup.clone());
            }
            let result = request.await;

            match result {
                Err(RequestError::RetryAfter(duration)) if looped < SEND_ATTEMPTS => {
                    log::debug!("Flood wait for {:?} while sending a message", duration);
                    tokio::time::sleep(duration.duration()).await;
                }
                Err(RequestError::Network(e)) if looped < SEND_ATTEMPTS => {
                    log::debug!("Network error while sending a message, retrying: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                result => break result,
            }
        }
    }
}
