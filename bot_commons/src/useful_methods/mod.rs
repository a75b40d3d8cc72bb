mod reply;
pub use reply::*;

use futures::Future;
use teloxide::{
    requests::Requester,
    types::{ChatId, Message, User},
    Bot, RequestError,
};

pub trait MessageStuff {
    /// Text of the message, or its caption if it has media instead.
    fn text_full(&self) -> Option<&str>;
    /// The user who sent the message this one replies to.
    fn replied_sender(&self) -> Option<&User>;
}

impl MessageStuff for Message {
    fn text_full(&self) -> Option<&str> {
        self.text().or_else(|| self.caption())
    }
    fn replied_sender(&self) -> Option<&User> {
        self.reply_to_message().and_then(|m| m.from.as_ref())
    }
}

pub trait BotStuff {
    fn typing(&self, to_where: ChatId) -> impl Future<Output = Result<(), RequestError>> + Send;
    fn uploading_photo(
        &self,
        to_where: ChatId,
    ) -> impl Future<Output = Result<(), RequestError>> + Send;
}

impl BotStuff for Bot {
    async fn typing(&self, to_where: ChatId) -> Result<(), RequestError> {
        self.send_chat_action(to_where, teloxide::types::ChatAction::Typing)
            .await?;
        Ok(())
    }
    async fn uploading_photo(&self, to_where: ChatId) -> Result<(), RequestError> {
        self.send_chat_action(to_where, teloxide::types::ChatAction::UploadPhoto)
            .await?;
        Ok(())
    }
}
