use std::{sync::Weak, time::Duration};

use bot_commons::useful_methods::BotSendHtml;
use html_escape::encode_text;
use serde::Deserialize;
use teloxide::{types::ChatId, Bot};

use crate::config::ConfigStore;

/// How long to wait before looking again while the relay is switched off.
const DISABLED_RECHECK: Duration = Duration::from_secs(60);
/// Don't hammer the feed even if someone configures it to.
const MIN_INTERVAL: Duration = Duration::from_secs(30);

/// One post on the timeline feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Post {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub link: Option<String>,
}

impl Post {
    fn to_html(&self) -> String {
        match &self.link {
            Some(link) => format!("{}\n\n{}", encode_text(&self.text), encode_text(link)),
            None => encode_text(&self.text).into_owned(),
        }
    }
}

/// Posts newer than `last_id`, oldest first.
pub fn new_posts(mut posts: Vec<Post>, last_id: u64) -> Vec<Post> {
    posts.retain(|post| post.id > last_id);
    posts.sort_by_key(|post| post.id);
    posts
}

async fn fetch_posts(client: &reqwest::Client, url: &str) -> Result<Vec<Post>, reqwest::Error> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

/// Look at the timeline once, and relay anything new. Returns how long to
/// wait until the next look.
async fn relay_once(bot: &Bot, store: &ConfigStore, client: &reqwest::Client) -> Duration {
    let config = store.get();
    let timeline = &config.timeline;
    let Some(chat_id) = timeline.chat_id.filter(|_| timeline.is_enabled()) else {
        return DISABLED_RECHECK;
    };
    let interval = Duration::from_secs(timeline.interval_secs).max(MIN_INTERVAL);

    let posts = match fetch_posts(client, &timeline.url).await {
        Ok(posts) => posts,
        Err(e) => {
            log::warn!("Failed to fetch the timeline: {e}");
            return interval;
        }
    };

    let posts = new_posts(posts, timeline.last_id);
    let Some(newest) = posts.last().map(|post| post.id) else {
        return interval;
    };

    if timeline.last_id == 0 {
        // First look at this feed. Don't dump its whole history into the chat.
        log::info!("Starting timeline relay after post {newest}");
    } else {
        for post in &posts {
            if let Err(e) = bot
                .send_html(ChatId(chat_id), post.to_html().as_str(), None, None)
                .await
            {
                log::warn!("Failed to relay timeline post {}: {e}", post.id);
                // Try this one again next time.
                let relayed = post.id.saturating_sub(1).max(timeline.last_id);
                if let Err(e) = store.update(|config| config.timeline.last_id = relayed) {
                    log::warn!("Failed to remember relayed timeline posts: {e}");
                }
                return interval;
            }
        }
    }

    if let Err(e) = store.update(|config| config.timeline.last_id = newest) {
        log::warn!("Failed to remember relayed timeline posts: {e}");
    }

    interval
}

/// Relay new timeline posts into the configured chat, forever, or until the
/// configuration goes away.
pub async fn relay_timeline_spinloop(bot: Bot, store: Weak<ConfigStore>, client: reqwest::Client) {
    loop {
        let Some(store) = store.upgrade() else {
            // No more config!
            return;
        };

        let wait = relay_once(&bot, &store, &client).await;

        // Drop the upgraded store.
        drop(store);
        tokio::time::sleep(wait).await;
    }
}
