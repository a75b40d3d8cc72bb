use std::{future::Future, pin::Pin};

use bot_commons::{
    is_sender_admin,
    names::{user_display_name, user_mention_html},
    useful_methods::*,
};
use html_escape::encode_text;
use teloxide::{
    requests::Requester,
    sugar::request::RequestReplyExt,
    types::{BotCommand, InputFile, Me, Message, UserId},
    Bot, RequestError,
};

use crate::{
    config::{document, ConfigError},
    error::HandlerError,
    services::{
        market,
        update::{self, UpdateOutcome},
    },
    state::{BotState, Lifecycle},
    VERSION,
};

pub const COMMANDS: &[Command] = &[
    START,
    HELP,
    PRICE,
    CMC,
    WIKI,
    POLL,
    ADMIN,
    FEEDBACK,
    VERSION_COMMAND,
    BAN,
    DELETE,
    CONFIG,
    UPDATE,
    RESTART,
    SHUTDOWN,
];

pub type Ret = Result<(), HandlerError>;
pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = Ret> + Send + 'a>>;

/// Who may run a command. Checked before the command's function is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Everyone,
    /// Admins of the chat. In private chats, only the maintainer.
    Admin,
}

pub struct CommandParams<'a> {
    pub bot: &'a Bot,
    pub bot_me: &'a Me,
    pub message: &'a Message,
    pub state: &'a BotState,
    pub message_text: &'a str,
    pub command_len: usize,
}

impl<'a> CommandParams<'a> {
    pub fn new<'new>(
        bot: &'new Bot,
        bot_me: &'new Me,
        message: &'new Message,
        state: &'new BotState,
    ) -> Option<CommandParams<'new>> {
        let message_text = message.text_full()?;

        if !message_text.starts_with('/') {
            return None;
        }

        let command = message_text.split_whitespace().next()?;

        if !command.is_ascii() {
            // Telegram commands must be ASCII.
            // See https://core.telegram.org/bots/api#botcommand
            return None;
        }

        let command_len = command.len();

        Some(CommandParams {
            bot,
            bot_me,
            message,
            state,
            message_text,
            command_len,
        })
    }

    /// Find the matching command and run it, if the sender may.
    ///
    /// Returns `false` if no command matched.
    pub async fn run(self) -> Result<bool, HandlerError> {
        let Some(command) = self.find_command() else {
            return Ok(false);
        };

        if command.access_for(self.get_params()) == Access::Admin && !self.is_admin().await? {
            log::info!(
                "{} tried to use admin command {}",
                self.sender_name(),
                command.name()
            );
            self.deny().await?;
            return Ok(true);
        }

        log::debug!("{} used {}", self.sender_name(), command.name());
        (command.function)(self).await?;
        Ok(true)
    }

    fn find_command(&self) -> Option<&'static Command> {
        // Commands shouldn't have an "@" in their callnames.
        // If the command is "/price@Stellite_Bot",
        // trim the "@" and everything after it.
        let callname = if let Some(username_start) = self.command().find('@') {
            // While we're here, also check if the username is actually ours.
            // Bot names are guaranteed ASCII, so ignore ASCII case specifically.
            if !self.command()[username_start + '@'.len_utf8()..]
                .eq_ignore_ascii_case(self.bot_me.username())
            {
                // This command is not for us. Ignore.
                return None;
            }

            &self.command()[0..username_start]
        } else {
            self.command()
        };

        COMMANDS
            .iter()
            .find(|command| command.is_matching_callname(callname))
    }

    /// Get text command for this message.
    ///
    /// If the input command is `/wiki mining pools`,
    /// this will be the substring `/wiki`.
    #[inline]
    pub fn command(&self) -> &str {
        &self.message_text[..self.command_len]
    }

    /// Get text parameters for this command.
    ///
    /// If the input command is `/wiki mining pools`,
    /// this will be the substring `mining pools`.
    #[inline]
    pub fn get_params(&self) -> &str {
        self.message_text[self.command_len..].trim()
    }

    pub fn sender_name(&self) -> String {
        self.message
            .from
            .as_ref()
            .map(user_display_name)
            .unwrap_or_else(|| String::from("an anonymous sender"))
    }

    /// Admins of the chat may, and in private chats the maintainer may.
    pub async fn is_admin(&self) -> Result<bool, RequestError> {
        if self.message.chat.is_private() {
            let maintainer = self.state.config.get().dev_user_id;
            let sender = self.message.from.as_ref().map(|user| user.id.0);
            return Ok(maintainer.is_some() && sender == maintainer);
        }

        is_sender_admin(self.bot, self.message).await
    }

    pub async fn deny(&self) -> Result<(), RequestError> {
        self.reply("Access denied - you are not an admin").await
    }

    pub async fn reply(&self, text: &str) -> Result<(), RequestError> {
        self.bot.reply_html(self.message, text).await?;
        Ok(())
    }
}

pub struct Command {
    pub callname: &'static str,
    pub description: &'static str,
    pub function: fn(CommandParams) -> CommandFuture,
    pub access: Access,
    /// First parameters that need [`Access::Admin`] even if the command
    /// itself doesn't.
    pub admin_params: &'static [&'static str],
    hidden: bool,
}

impl Command {
    /// Access needed to run this command with these parameters.
    pub fn access_for(&self, params: &str) -> Access {
        let first = params.split_whitespace().next().unwrap_or("");
        if self
            .admin_params
            .iter()
            .any(|param| param.eq_ignore_ascii_case(first))
        {
            Access::Admin
        } else {
            self.access
        }
    }

    pub fn is_matching_callname(&self, command: &str) -> bool {
        self.name().eq_ignore_ascii_case(command)
    }

    /// The callname without its parameter hints, like `/wiki`.
    pub fn name(&self) -> &'static str {
        self.callname.split_ascii_whitespace().next().unwrap_or("")
    }

    pub fn get_help(&self, mut output: impl std::fmt::Write) -> Result<(), std::fmt::Error> {
        output.write_str("<code>")?;
        output.write_str(self.callname)?;
        output.write_str("</code>")?;
        if !self.description.is_empty() {
            output.write_str(" - ")?;
            output.write_str(self.description)?;
        }

        Ok(())
    }

    pub fn generate_help() -> String {
        let mut response = String::from(concat!(
            "Community bot for <a href=\"https://stellite.cash\">Stellite</a>\n\n",
            "Available commands (normal user):\n\n"
        ));
        Self::write_section(&mut response, Access::Everyone);
        response += "\nAvailable commands (administrator):\n\n";
        Self::write_section(&mut response, Access::Admin);
        response.pop();
        response
    }

    fn write_section(response: &mut String, access: Access) {
        for command in COMMANDS {
            if command.hidden || command.access != access {
                continue;
            }
            command
                .get_help(&mut *response)
                .expect("Writing to a String never fails");
            *response += "\n";
        }
    }

    pub fn generate_bot_commands() -> Vec<BotCommand> {
        let mut output = Vec::new();

        for command in COMMANDS {
            if command.hidden {
                continue;
            }

            // Cut off the /
            let callname = command.name()[1..].trim().to_string();
            let description = command
                .description
                .replace("&lt;", "<")
                .replace("&gt;", ">");

            output.push(BotCommand {
                command: callname,
                description,
            });
        }

        output
    }
}

///////////////////////////////////////
/////////////////COMMAND DEFINITIONS
///////////////////////////////////////

/// Wraps the function's return value in a pinning closure.
macro_rules! wrap {
    ($thing:expr) => {
        |cp| Box::pin($thing(cp))
    };
}

pub const START: Command = Command {
    callname: "/start",
    description: "",
    function: wrap!(start),
    access: Access::Everyone,
    admin_params: &[],
    hidden: true,
};
async fn start(cp: CommandParams<'_>) -> Ret {
    if !cp.message.chat.is_private() {
        return Ok(());
    }
    help(cp).await
}

pub const HELP: Command = Command {
    callname: "/help",
    description: "Show this help.",
    function: wrap!(help),
    access: Access::Everyone,
    admin_params: &[],
    hidden: false,
};
async fn help(cp: CommandParams<'_>) -> Ret {
    cp.reply(&Command::generate_help()).await?;
    Ok(())
}

pub const PRICE: Command = Command {
    callname: "/price",
    description: "Show the current TradeOgre price of XTL.",
    function: wrap!(price),
    access: Access::Everyone,
    admin_params: &[],
    hidden: false,
};
async fn price(cp: CommandParams<'_>) -> Ret {
    let config = cp.state.config.get();
    let _ = cp.bot.typing(cp.message.chat.id).await;

    let price =
        market::fetch_xtl_price(&cp.state.http, &config.ticker_url, &config.pairing_asset).await;

    let response = match price {
        Ok(Some(price)) => format!(
            "<code>XTL on TradeOgre: {} {}</code>",
            encode_text(&price),
            encode_text(&config.pairing_asset)
        ),
        Ok(None) => String::from("<code>Couldn't retrieve current XTL price</code>"),
        Err(e) => {
            log::warn!("Failed to fetch the XTL price: {e}");
            String::from("<code>Couldn't retrieve current XTL price</code>")
        }
    };

    cp.reply(&response).await?;
    Ok(())
}

pub const CMC: Command = Command {
    callname: "/cmc",
    description: "Show market data of XTL.",
    function: wrap!(cmc),
    access: Access::Everyone,
    admin_params: &[],
    hidden: false,
};
async fn cmc(cp: CommandParams<'_>) -> Ret {
    let config = cp.state.config.get();
    let _ = cp.bot.typing(cp.message.chat.id).await;

    let response = match market::fetch_market_info(&cp.state.http, &config.cmc_url).await {
        Ok(Some(info)) => market::format_market_info(&info),
        Ok(None) => String::from("<code>No market data listed</code>"),
        Err(e) => {
            log::warn!("Failed to fetch market data: {e}");
            String::from("<code>Couldn't retrieve market data</code>")
        }
    };

    cp.reply(&response).await?;
    Ok(())
}

pub const WIKI: Command = Command {
    callname: "/wiki [&lt;term&gt;]",
    description: "Show information about a topic. Without a term, list all terms.",
    function: wrap!(wiki),
    access: Access::Everyone,
    admin_params: &[],
    hidden: false,
};
async fn wiki(cp: CommandParams<'_>) -> Ret {
    let config = cp.state.config.get();
    let term = cp.get_params().to_lowercase();

    if term.is_empty() {
        let mut response =
            String::from("No search term provided. Here is a list of all terms:\n\n");
        if config.wiki.is_empty() {
            response.push_str("(none yet)");
        } else {
            let terms = config
                .wiki
                .keys()
                .map(|term| encode_text(term).into_owned())
                .collect::<Vec<_>>()
                .join("\n");
            response.push_str("<code>");
            response.push_str(&terms);
            response.push_str("</code>");
        }
        cp.reply(&response).await?;
        return Ok(());
    }

    let entry = config
        .wiki
        .iter()
        .find(|(name, _)| name.to_lowercase() == term)
        .map(|(_, file)| file);
    let Some(file) = entry else {
        cp.reply("<code>No entry found</code>").await?;
        return Ok(());
    };

    let path = config.resource(file);
    if !path.is_file() {
        log::warn!("Wiki entry {term} points to missing {}", path.display());
        cp.reply("<code>No entry found</code>").await?;
        return Ok(());
    }

    let _ = cp.bot.uploading_photo(cp.message.chat.id).await;
    cp.bot
        .send_photo(cp.message.chat.id, InputFile::file(path))
        .reply_to(cp.message.id)
        .await?;
    Ok(())
}

pub const POLL: Command = Command {
    callname: "/poll [results|create|delete]",
    description: concat!(
        "Answer the running poll, or see its results. ",
        "Admins can also create or delete the poll."
    ),
    function: wrap!(super::poll::poll_command),
    access: Access::Everyone,
    admin_params: &["create", "delete"],
    hidden: false,
};

pub const ADMIN: Command = Command {
    callname: "/admin",
    description: "Call the admins of this chat.",
    function: wrap!(admin),
    access: Access::Everyone,
    admin_params: &[],
    hidden: false,
};
async fn admin(cp: CommandParams<'_>) -> Ret {
    if cp.message.chat.is_private() {
        cp.reply("This only works in groups.").await?;
        return Ok(());
    }

    let admins = cp.bot.get_chat_administrators(cp.message.chat.id).await?;
    let mentions = admins
        .iter()
        .filter(|member| !member.user.is_bot)
        .map(|member| user_mention_html(&member.user))
        .collect::<Vec<_>>();

    if mentions.is_empty() {
        cp.reply("There are no admins to call.").await?;
    } else {
        cp.reply(&format!("Calling the admins: {}", mentions.join(", ")))
            .await?;
    }
    Ok(())
}

pub const FEEDBACK: Command = Command {
    callname: "/feedback &lt;text&gt;",
    description: "Send feedback to the developer of this bot.",
    function: wrap!(feedback),
    access: Access::Everyone,
    admin_params: &[],
    hidden: false,
};
async fn feedback(cp: CommandParams<'_>) -> Ret {
    let text = cp.get_params();
    if text.is_empty() {
        cp.reply("Usage: <code>/feedback &lt;text&gt;</code>").await?;
        return Ok(());
    }

    let Some(dev_user_id) = cp.state.config.get().dev_user_id else {
        cp.reply("Feedback is not set up for this bot, sorry.").await?;
        return Ok(());
    };

    let chat = cp
        .message
        .chat
        .title()
        .map(str::to_string)
        .unwrap_or_else(|| String::from("a private chat"));
    let relay = format!(
        "Feedback from {} in {}:\n\n{}",
        encode_text(&cp.sender_name()),
        encode_text(&chat),
        encode_text(text)
    );

    cp.bot
        .send_html(UserId(dev_user_id), relay.as_str(), None, None)
        .await?;
    cp.reply("Thanks for the feedback!").await?;
    Ok(())
}

pub const VERSION_COMMAND: Command = Command {
    callname: "/version",
    description: "Show the version of this bot.",
    function: wrap!(version),
    access: Access::Everyone,
    admin_params: &[],
    hidden: false,
};
async fn version(cp: CommandParams<'_>) -> Ret {
    let config = cp.state.config.get();
    let hash = if config.update_hash.is_empty() {
        "none"
    } else {
        config.update_hash.as_str()
    };

    cp.reply(&format!(
        "Stellite bot v{}\nUpdate hash: <code>{}</code>",
        VERSION,
        encode_text(hash)
    ))
    .await?;
    Ok(())
}

pub const BAN: Command = Command {
    callname: "/ban",
    description: "Ban a user by replying to their message with this command.",
    function: wrap!(ban),
    access: Access::Admin,
    admin_params: &[],
    hidden: false,
};
async fn ban(cp: CommandParams<'_>) -> Ret {
    let Some(user) = cp.message.replied_sender() else {
        cp.reply("Reply to a message of the user to ban with this command.")
            .await?;
        return Ok(());
    };

    match cp.bot.ban_chat_member(cp.message.chat.id, user.id).await {
        Ok(_) => log::info!("{} banned {}", cp.sender_name(), user_display_name(user)),
        // No rights, or banning another admin. Nothing to be done.
        Err(RequestError::Api(e)) => log::debug!("Failed to ban {}: {e}", user.id),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub const DELETE: Command = Command {
    callname: "/delete",
    description: "Remove a message by replying to it with this command.",
    function: wrap!(delete),
    access: Access::Admin,
    admin_params: &[],
    hidden: false,
};
async fn delete(cp: CommandParams<'_>) -> Ret {
    let Some(original) = cp.message.reply_to_message() else {
        cp.reply("Reply to the message to delete with this command.")
            .await?;
        return Ok(());
    };

    match cp.bot.delete_message(cp.message.chat.id, original.id).await {
        Ok(_) => (),
        // Already gone, too old, or no rights. That's fine.
        Err(RequestError::Api(e)) => log::debug!("Failed to delete {}: {e}", original.id.0),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub const CONFIG: Command = Command {
    callname: "/config &lt;key=value ...&gt;",
    description: "Change settings of this bot.",
    function: wrap!(config),
    access: Access::Admin,
    admin_params: &[],
    hidden: false,
};
async fn config(cp: CommandParams<'_>) -> Ret {
    let assignments = document::parse_assignments(cp.get_params());

    if assignments.is_empty() {
        let document = cp.state.config.get().to_document();
        let keys = document
            .as_object()
            .map(|map| map.keys().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();
        cp.reply(&format!(
            "Usage: <code>/config key=value ...</code>\n\nKeys:\n<code>{}</code>",
            encode_text(&keys)
        ))
        .await?;
        return Ok(());
    }

    let result = cp.state.config.update_document(|tree| {
        assignments
            .iter()
            .map(|(key, value)| {
                let replaced = document::update_setting(tree, key, value.clone());
                (key.as_str(), replaced)
            })
            .map(|(key, replaced)| match replaced {
                0 => format!("{}: not found", encode_text(key)),
                1 => format!("{}: updated", encode_text(key)),
                n => format!("{}: updated in {} places", encode_text(key), n),
            })
            .collect::<Vec<_>>()
    });

    match result {
        Ok(report) => {
            log::info!("{} changed the config: {:?}", cp.sender_name(), assignments);
            cp.reply(&report.join("\n")).await?;
        }
        Err(ConfigError::Invalid(e)) => {
            cp.reply(&format!(
                "Nothing was saved, the new values don't fit:\n<code>{}</code>",
                encode_text(&e.to_string())
            ))
            .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub const UPDATE: Command = Command {
    callname: "/update",
    description: "Update the bot to the newest release.",
    function: wrap!(update_bot),
    access: Access::Admin,
    admin_params: &[],
    hidden: false,
};
async fn update_bot(cp: CommandParams<'_>) -> Ret {
    cp.reply("Bot is updating...").await?;

    match update::self_update(&cp.state.http, &cp.state.config).await? {
        UpdateOutcome::NotConfigured => {
            cp.reply("No update URL is configured.").await?;
        }
        UpdateOutcome::UpToDate => {
            cp.reply("You are running the latest version").await?;
        }
        UpdateOutcome::Failed(status) => {
            cp.reply(&format!("Update failed, the server answered {status}"))
                .await?;
        }
        UpdateOutcome::Updated { added_keys } => {
            let mut response = String::from("Update finished...");
            if !added_keys.is_empty() {
                response.push_str("\nNew settings: ");
                response.push_str(&encode_text(&added_keys.join(", ")));
            }
            cp.reply(&response).await?;
            restart_bot(cp).await?;
        }
    }
    Ok(())
}

pub const RESTART: Command = Command {
    callname: "/restart",
    description: "Restart the bot and reload its configuration.",
    function: wrap!(restart_bot),
    access: Access::Admin,
    admin_params: &[],
    hidden: false,
};
async fn restart_bot(cp: CommandParams<'_>) -> Ret {
    cp.reply("Restarting bot...").await?;

    let chat_id = cp.message.chat.id.0;
    cp.state
        .config
        .update(|config| config.restart_chat = Some(chat_id))?;

    cp.state.request_stop(Lifecycle::Restart);
    Ok(())
}

pub const SHUTDOWN: Command = Command {
    callname: "/shutdown",
    description: "Shut the bot down.",
    function: wrap!(shutdown_bot),
    access: Access::Admin,
    admin_params: &[],
    hidden: false,
};
async fn shutdown_bot(cp: CommandParams<'_>) -> Ret {
    cp.reply("Shutting down...").await?;
    cp.state.request_stop(Lifecycle::Shutdown);
    Ok(())
}
