use std::{fs, sync::Arc, time::Duration};
use teloxide::{dptree::deps, prelude::*};

use crate::{
    config::{watch_config, ConfigStore},
    handlers::{commands::Command, handle_message},
    services::timeline::relay_timeline_spinloop,
    state::{BotState, Lifecycle},
    CONFIG_PATH, VERSION,
};

/// Run the bot until it's told to stop, then say how the process should exit.
///
/// # Panics
///
/// Panics if there's no key file or no readable configuration.
pub async fn entry() -> Lifecycle {
    log::info!("Starting Stellite bot v{VERSION}");
    let key = fs::read_to_string(match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    })
    .expect("Could not load bot key file!");

    // Long polling waits up to 10 seconds for updates, so leave room for that.
    let telegram_client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create the Telegram client!");
    let bot = Bot::with_client(key.trim(), telegram_client);

    let config =
        Arc::new(ConfigStore::load(CONFIG_PATH).expect("Could not load the configuration!"));

    bot.set_my_commands(Command::generate_bot_commands())
        .await
        .expect("Failed to set bot commands!");

    let http = reqwest::Client::builder()
        .user_agent(concat!("stellite_bot/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create the HTTP client!");

    tokio::spawn(watch_config(Arc::downgrade(&config)));
    tokio::spawn(relay_timeline_spinloop(
        bot.clone(),
        Arc::downgrade(&config),
        http.clone(),
    ));

    announce_restart(&bot, &config).await;

    let state = Arc::new(BotState::new(config, http));

    log::info!("Creating the handler...");

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    log::info!("Dispatching the dispatcher!");

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![state.clone()])
        .enable_ctrlc_handler()
        .build();

    state.set_shutdown_token(dispatcher.shutdown_token());
    dispatcher.dispatch().await;

    let lifecycle = state.lifecycle();
    log::info!("Dispatcher stopped, exiting for {lifecycle:?}.");
    lifecycle
}

/// Tell the chat that asked for a restart that we're back.
async fn announce_restart(bot: &Bot, config: &ConfigStore) {
    let Some(chat_id) = config.get().restart_chat else {
        return;
    };

    if let Err(e) = bot.send_message(ChatId(chat_id), "Bot started...").await {
        log::warn!("Failed to announce the restart in {chat_id}: {e}");
    }

    if let Err(e) = config.update(|config| config.restart_chat = None) {
        log::warn!("Failed to clear the restart chat: {e}");
    }
}
