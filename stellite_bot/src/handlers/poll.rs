use bot_commons::{names::user_display_name, useful_methods::*};
use chrono::{Local, NaiveDateTime};
use html_escape::encode_text;
use teloxide::{
    payloads::SendPhotoSetters,
    requests::Requester,
    sugar::request::RequestReplyExt,
    types::{
        InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove, Message, ParseMode,
        ReplyMarkup,
    },
    Bot,
};

use super::commands::{CommandParams, Ret};
use crate::{
    error::HandlerError,
    poll::{
        machine::{self, Effect, Reply, Step, CANCEL},
        results::render_results,
        Answers, Poll, END_FORMAT,
    },
    state::BotState,
};

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// `/poll`, `/poll results`, `/poll create` and `/poll delete`. Admin rights for
/// the last two are checked before this runs.
pub async fn poll_command(cp: CommandParams<'_>) -> Ret {
    let Some(from) = &cp.message.from else {
        return Ok(());
    };
    let poll = cp.state.config.get().poll.clone();
    let action = cp.get_params().to_lowercase();

    let step = match action.as_str() {
        "" => machine::begin_answer(&poll, now()),
        "results" => {
            if !poll.is_active() {
                cp.reply(&render_reply(&Reply::NoPoll).0).await?;
                return Ok(());
            }
            let members = match cp.bot.get_chat_member_count(cp.message.chat.id).await {
                Ok(count) => Some(count),
                Err(e) => {
                    log::debug!("No member count for {}: {e}", cp.message.chat.id);
                    None
                }
            };
            let results = render_results(&poll, &user_display_name(from), members)?;
            let mut caption = results.caption;
            if !poll.is_open(now()) {
                caption.push_str("\n\nThis poll has ended.");
            }
            send_results(cp.bot, cp.message, results.chart, &caption).await?;
            return Ok(());
        }
        "create" => machine::begin_create(),
        "delete" => machine::begin_delete(&poll),
        _ => {
            cp.reply("Usage: <code>/poll [results|create|delete]</code>")
                .await?;
            return Ok(());
        }
    };

    cp.state
        .conversations
        .set(cp.message.chat.id, from.id, step.next.clone());
    send_step(cp.bot, cp.message, cp.state, step).await
}

/// Telegram's limit on photo captions, in characters.
const CAPTION_LIMIT: usize = 1024;

/// Send the chart with the caption under it. Captions too long for a photo
/// follow it as a message of their own.
async fn send_results(
    bot: &Bot,
    message: &Message,
    chart: Option<Vec<u8>>,
    caption: &str,
) -> Ret {
    let Some(chart) = chart else {
        bot.reply_html(message, caption).await?;
        return Ok(());
    };

    let _ = bot.uploading_photo(message.chat.id).await;
    let photo = InputFile::memory(chart).file_name("results.png");
    let request = bot.send_photo(message.chat.id, photo).reply_to(message.id);

    if fits_in_caption(caption) {
        request.caption(caption).parse_mode(ParseMode::Html).await?;
    } else {
        request.await?;
        bot.reply_html(message, caption).await?;
    }
    Ok(())
}

fn fits_in_caption(text: &str) -> bool {
    text.chars().count() <= CAPTION_LIMIT
}

/// Feed a plain text message into the sender's poll conversation.
///
/// Returns `false` if they aren't in one.
pub async fn handle_conversation_turn(
    bot: &Bot,
    message: &Message,
    text: &str,
    state: &BotState,
) -> Result<bool, HandlerError> {
    let Some(from) = &message.from else {
        return Ok(false);
    };

    let current = state.conversations.get(message.chat.id, from.id);
    if current.is_idle() {
        return Ok(false);
    }

    let poll = state.config.get().poll.clone();
    let step = machine::advance(current, text, &poll, &user_display_name(from), now());

    state
        .conversations
        .set(message.chat.id, from.id, step.next.clone());
    send_step(bot, message, state, step).await?;
    Ok(true)
}

async fn send_step(bot: &Bot, message: &Message, state: &BotState, step: Step) -> Ret {
    let Step { reply, effect, .. } = step;

    if !effect.is_nothing() {
        if let Effect::Record { respondent, .. } = &effect {
            log::debug!("{respondent} answered the poll");
        }
        state.config.update(|config| effect.apply(&mut config.poll))?;
    }

    if reply == Reply::Silence {
        return Ok(());
    }

    let (text, markup) = render_reply(&reply);
    bot.send_html(message.chat.id, text.as_str(), message.id, markup)
        .await?;
    Ok(())
}

fn keyboard<'a>(options: impl IntoIterator<Item = &'a str>) -> ReplyMarkup {
    let rows = options
        .into_iter()
        .chain([CANCEL])
        .map(|option| vec![KeyboardButton::new(option)])
        .collect::<Vec<_>>();

    ReplyMarkup::Keyboard(
        KeyboardMarkup::new(rows)
            .one_time_keyboard()
            .resize_keyboard()
            .selective(),
    )
}

fn answers_keyboard(answers: &Answers) -> ReplyMarkup {
    keyboard(answers.options().iter().map(String::as_str))
}

fn remove_keyboard() -> ReplyMarkup {
    ReplyMarkup::KeyboardRemove(KeyboardRemove::new().selective())
}

fn describe_poll(poll: &Poll) -> String {
    let answers = match &poll.answers {
        Answers::FreeForm => String::from("anything"),
        Answers::Fixed(options) => options.join(", "),
    };
    let end = match poll.end {
        Some(end) => end.format(END_FORMAT).to_string(),
        None => String::from("never"),
    };

    format!(
        "<b>{}</b>\nAnswers: {}\nEnds: {}",
        encode_text(&poll.topic),
        encode_text(&answers),
        end
    )
}

/// Message text and keyboard for a conversation reply.
fn render_reply(reply: &Reply) -> (String, Option<ReplyMarkup>) {
    let (text, markup) = match reply {
        Reply::NoPoll => (String::from("There is no poll running."), remove_keyboard()),
        Reply::PollEnded => (String::from("The poll has ended."), remove_keyboard()),
        Reply::AskAnswer { topic, answers } => {
            let hint = if answers.is_free_form() {
                "Type your answer"
            } else {
                "Pick an answer"
            };
            (
                format!(
                    "<b>{}</b>\n\n{hint}, or <code>{CANCEL}</code>.",
                    encode_text(topic)
                ),
                answers_keyboard(answers),
            )
        }
        Reply::InvalidAnswer { answers } => (
            format!(
                "That's not one of the answers. Pick one of: {}",
                encode_text(&answers.options().join(", "))
            ),
            answers_keyboard(answers),
        ),
        Reply::AnswerSaved(answer) => (
            format!("Saved your answer: {}", encode_text(answer)),
            remove_keyboard(),
        ),
        Reply::Cancelled => (String::from("Cancelled."), remove_keyboard()),
        Reply::AskTopic => (
            String::from("What should the poll ask?"),
            keyboard([]),
        ),
        Reply::AskAnswers => (
            String::from(
                "Send the answers separated by commas, or <code>none</code> to take any answer.",
            ),
            keyboard([]),
        ),
        Reply::InvalidAnswers => (
            String::from("There are no answers in there. Try again."),
            keyboard([]),
        ),
        Reply::AskEnd => (
            String::from(
                "When does the poll end? Use <code>YYYY-MM-DD HH:MM:SS</code>, \
                 or <code>none</code> for never.",
            ),
            keyboard([]),
        ),
        Reply::InvalidEnd => (
            String::from("Couldn't read that. Use <code>YYYY-MM-DD HH:MM:SS</code>."),
            keyboard([]),
        ),
        Reply::EndInPast => (
            String::from("That's in the past. Pick a later time."),
            keyboard([]),
        ),
        Reply::PollCreated(poll) => (
            format!("Poll created:\n\n{}", describe_poll(poll)),
            remove_keyboard(),
        ),
        Reply::ConfirmDelete { topic } => (
            format!(
                "Delete the poll <b>{}</b> and all its answers? (yes/no)",
                encode_text(topic)
            ),
            keyboard(["yes", "no"]),
        ),
        Reply::InvalidConfirm => (String::from("Answer yes or no."), keyboard(["yes", "no"])),
        Reply::Deleted => (String::from("Poll deleted."), remove_keyboard()),
        Reply::DeleteAborted => (String::from("Kept the poll."), remove_keyboard()),
        Reply::Silence => return (String::new(), None),
    };

    (text, Some(markup))
}
