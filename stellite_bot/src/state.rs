use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::{Duration, Instant},
};

use teloxide::{
    dispatching::ShutdownToken,
    types::{ChatId, UserId},
};

use crate::{config::ConfigStore, poll::machine::PollState, RESTART_EXIT_CODE};

/// What the process should do once the dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    Shutdown,
    Restart,
}

impl Lifecycle {
    pub fn exit_code(self) -> i32 {
        match self {
            Lifecycle::Shutdown => 0,
            Lifecycle::Restart => RESTART_EXIT_CODE,
        }
    }
}

/// Conversations nobody continued for this long are dropped.
const CONVERSATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Poll conversations in progress, per person per chat.
#[derive(Default)]
pub struct Conversations {
    states: Mutex<HashMap<(ChatId, UserId), (PollState, Instant)>>,
}

impl Conversations {
    pub fn get(&self, chat: ChatId, user: UserId) -> PollState {
        self.get_at(chat, user, Instant::now())
    }

    pub fn set(&self, chat: ChatId, user: UserId, state: PollState) {
        self.set_at(chat, user, state, Instant::now());
    }

    fn get_at(&self, chat: ChatId, user: UserId, now: Instant) -> PollState {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        match states.get(&(chat, user)) {
            Some((state, since)) if now.duration_since(*since) < CONVERSATION_TIMEOUT => {
                state.clone()
            }
            _ => PollState::Idle,
        }
    }

    fn set_at(&self, chat: ChatId, user: UserId, state: PollState, now: Instant) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.retain(|_, (_, since)| now.duration_since(*since) < CONVERSATION_TIMEOUT);
        if state.is_idle() {
            states.remove(&(chat, user));
        } else {
            states.insert((chat, user), (state, now));
        }
    }
}

pub struct BotState {
    pub config: Arc<ConfigStore>,
    pub conversations: Conversations,
    /// Client for everything that isn't the Telegram API.
    pub http: reqwest::Client,
    lifecycle: Mutex<Lifecycle>,
    shutdown_token: OnceLock<ShutdownToken>,
}

impl BotState {
    pub fn new(config: Arc<ConfigStore>, http: reqwest::Client) -> Self {
        Self {
            config,
            conversations: Conversations::default(),
            http,
            lifecycle: Mutex::new(Lifecycle::default()),
            shutdown_token: OnceLock::new(),
        }
    }

    pub fn set_shutdown_token(&self, token: ShutdownToken) {
        if self.shutdown_token.set(token).is_err() {
            log::error!("Tried to set the shutdown token twice!");
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the dispatcher, then exit as `lifecycle` says.
    pub fn request_stop(&self, lifecycle: Lifecycle) {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = lifecycle;

        let Some(token) = self.shutdown_token.get().cloned() else {
            log::error!("No shutdown token, can't stop the dispatcher!");
            return;
        };

        // Waiting for the shutdown from inside a handler would wait for that
        // very handler to finish. Do it elsewhere.
        tokio::spawn(async move {
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => log::warn!("Dispatcher wasn't running: {e:?}"),
            }
        });
    }
}
