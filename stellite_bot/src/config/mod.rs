//! Typed bot configuration, persisted as a single JSON document.
//!
//! The running bot only ever reads immutable snapshots of it. Every change,
//! whether from a command or from someone editing the file, produces a new
//! snapshot that is swapped in whole.

pub mod document;
mod watcher;

pub use watcher::watch_config;

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::poll::Poll;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not a valid configuration: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("the new value does not fit the configuration: {0}")]
    Invalid(#[source] serde_json::Error),
    #[error("could not replace {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// A media reply sent when a message contains `trigger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReply {
    pub trigger: String,
    /// File name inside the resource folder.
    pub file: PathBuf,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media: MediaKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Photo,
    Video,
}

/// Where and how often to relay posts from a timeline feed.
///
/// The relay is off unless both `url` and `chat_id` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default = "default_timeline_interval")]
    pub interval_secs: u64,
    /// Newest post that was already relayed.
    #[serde(default)]
    pub last_id: u64,
}

impl TimelineConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty() && self.chat_id.is_some()
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            chat_id: None,
            interval_secs: default_timeline_interval(),
            last_id: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_res_folder")]
    pub res_folder: PathBuf,
    /// Asset XTL is priced in by `/price`.
    #[serde(default = "default_pairing_asset")]
    pub pairing_asset: String,
    #[serde(default = "default_ticker_url")]
    pub ticker_url: String,
    #[serde(default = "default_cmc_url")]
    pub cmc_url: String,
    /// Search term to image file inside the resource folder.
    #[serde(default)]
    pub wiki: BTreeMap<String, PathBuf>,
    #[serde(default = "default_auto_replies")]
    pub auto_replies: Vec<AutoReply>,
    /// Greeting for new members. `{name}` is replaced with a mention.
    #[serde(default)]
    pub welcome: Option<String>,
    #[serde(default = "default_true")]
    pub ban_bots: bool,
    /// Maintainer who receives feedback and error reports.
    #[serde(default)]
    pub dev_user_id: Option<u64>,
    #[serde(default)]
    pub update_url: String,
    /// ETag of the binary fetched by the last update.
    #[serde(default)]
    pub update_hash: String,
    /// Chat to notify once the bot is back after a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_chat: Option<i64>,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub poll: Poll,
    /// Keys this version doesn't know about. Kept so saving doesn't eat them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_res_folder() -> PathBuf {
    PathBuf::from("res")
}

fn default_pairing_asset() -> String {
    String::from("BTC")
}

fn default_ticker_url() -> String {
    String::from("https://tradeogre.com/api/v1/ticker")
}

fn default_cmc_url() -> String {
    String::from("https://api.coinmarketcap.com/v1/ticker/stellite/")
}

fn default_timeline_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_auto_replies() -> Vec<AutoReply> {
    let reply = |trigger: &str, file: &str, caption: Option<&str>, media| AutoReply {
        trigger: trigger.to_string(),
        file: PathBuf::from(file),
        caption: caption.map(str::to_string),
        media,
    };
    vec![
        reply("when moon", "soon_moon.mp4", None, MediaKind::Video),
        reply("hodl", "HODL.jpg", Some("HODL HARD! ;-)"), MediaKind::Photo),
        reply("ico?", "ICO.jpg", Some("BTW: Stellite had no ICO"), MediaKind::Photo),
        reply(
            "in it for the tech",
            "in_it_for_the_tech.jpg",
            Some("Who is in it for the tech? ;-)"),
            MediaKind::Photo,
        ),
    ]
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            res_folder: default_res_folder(),
            pairing_asset: default_pairing_asset(),
            ticker_url: default_ticker_url(),
            cmc_url: default_cmc_url(),
            wiki: BTreeMap::new(),
            auto_replies: default_auto_replies(),
            welcome: None,
            ban_bots: true,
            dev_user_id: None,
            update_url: String::new(),
            update_hash: String::new(),
            restart_chat: None,
            timeline: TimelineConfig::default(),
            poll: Poll::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl BotConfig {
    /// Convert a whole document into the typed config. Missing keys get
    /// their defaults, mistyped ones are an error.
    pub fn from_document(document: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document).and_then(BotConfig::checked)
    }

    /// Reject combinations the types alone allow but the bot can't work with.
    fn checked(self) -> Result<Self, serde_json::Error> {
        if self.poll.is_active() && self.poll.answers.is_empty() {
            return Err(serde::de::Error::custom(
                "the running poll has no answers; use a list of answers or \"none\"",
            ));
        }
        Ok(self)
    }

    pub fn to_document(&self) -> Value {
        // Only maps with string keys in here, which can't fail to serialize.
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
    }

    /// Path of a file inside the resource folder.
    pub fn resource(&self, file: &Path) -> PathBuf {
        self.res_folder.join(file)
    }
}

/// Owner of the configuration file and the snapshot loaded from it.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<BotConfig>>,
    /// Held for the whole read-modify-write of a change.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the configuration from `path`. The file must exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = read_config(&path)?;

        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the current snapshot. It will not change under you.
    pub fn get(&self) -> Arc<BotConfig> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the configuration, save it to disk and swap it in.
    ///
    /// If saving fails, the running configuration stays as it was.
    pub fn update<R>(&self, change: impl FnOnce(&mut BotConfig) -> R) -> Result<R, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut config = BotConfig::clone(&self.get());
        let result = change(&mut config);

        save_config(&self.path, &config)?;
        self.swap(config);
        Ok(result)
    }

    /// Change the configuration as an untyped JSON document.
    ///
    /// The changed document has to still deserialize into a [`BotConfig`],
    /// otherwise nothing is saved and [`ConfigError::Invalid`] is returned.
    pub fn update_document<R>(
        &self,
        change: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut document = self.get().to_document();
        let result = change(&mut document);
        let config = BotConfig::from_document(document).map_err(ConfigError::Invalid)?;

        save_config(&self.path, &config)?;
        self.swap(config);
        Ok(result)
    }

    /// Read the file again, e.g. after someone edited it by hand.
    ///
    /// On error the current snapshot is kept.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let config = read_config(&self.path)?;
        if *self.get() != config {
            log::info!("Configuration changed on disk, reloaded it.");
            self.swap(config);
        }
        Ok(())
    }

    fn swap(&self, config: BotConfig) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}

fn read_config(path: &Path) -> Result<BotConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;

    serde_json::from_str(&text)
        .and_then(BotConfig::checked)
        .map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
}

/// Serialize the config the way people are used to reading it: indented by
/// four spaces.
fn to_pretty_json(config: &BotConfig) -> Result<Vec<u8>, serde_json::Error> {
    let mut output = Vec::with_capacity(4096);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut output, formatter);
    config.serialize(&mut serializer)?;
    output.push(b'\n');
    Ok(output)
}

/// Write the whole document next to the old one, then rename it over it, so
/// a crash mid-write can't leave half a file behind.
fn save_config(path: &Path, config: &BotConfig) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_owned(),
        source,
    };

    let bytes = to_pretty_json(config).map_err(ConfigError::Invalid)?;

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(directory).map_err(io_error)?;
    file.write_all(&bytes).map_err(io_error)?;
    file.as_file().sync_all().map_err(io_error)?;
    file.persist(path).map_err(|source| ConfigError::Persist {
        path: path.to_owned(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with(document: Value) -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, document.to_string()).unwrap();
        let store = ConfigStore::load(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_keys_get_defaults() {
        let (_dir, store) = store_with(json!({ "pairing_asset": "LTC" }));
        let config = store.get();
        assert_eq!(config.pairing_asset, "LTC");
        assert_eq!(config.res_folder, PathBuf::from("res"));
        assert_eq!(config.auto_replies.len(), 4);
        assert!(!config.poll.is_active());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigStore::load(dir.path().join("nope.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn unknown_keys_survive_a_save() {
        let (_dir, store) = store_with(json!({ "twitter": { "key": "abc" } }));
        store
            .update(|config| config.pairing_asset = String::from("USDT"))
            .unwrap();

        let saved: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(saved["twitter"]["key"], "abc");
        assert_eq!(saved["pairing_asset"], "USDT");
    }

    #[test]
    fn snapshots_do_not_change_under_readers() {
        let (_dir, store) = store_with(json!({}));
        let before = store.get();
        store.update(|config| config.ban_bots = false).unwrap();
        assert!(before.ban_bots);
        assert!(!store.get().ban_bots);
    }

    #[test]
    fn mistyped_document_change_is_rejected() {
        let (_dir, store) = store_with(json!({}));
        let result = store.update_document(|document| {
            document::update_by_key(document, "ban_bots", json!(["not", "a", "bool"]))
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert!(store.get().ban_bots);

        let saved: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(saved, json!({}));
    }

    #[test]
    fn settings_change_leaves_votes_alone() {
        let (_dir, store) = store_with(json!({
            "poll": {
                "topic": "Best feature?",
                "answers": ["speed", "privacy"],
                "data": { "welcome": "speed" },
            },
        }));

        let replaced = store
            .update_document(|document| {
                document::update_setting(document, "welcome", json!("Hi {name}"))
            })
            .unwrap();

        let config = store.get();
        assert_eq!(replaced, 1);
        assert_eq!(config.welcome.as_deref(), Some("Hi {name}"));
        assert_eq!(config.poll.answer_of("welcome"), Some("speed"));

        // A mistyped value for the same key is still rejected on its own merits.
        let result = store.update_document(|document| {
            document::update_setting(document, "welcome", json!([1, 2]))
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn running_poll_without_answers_is_rejected() {
        let (_dir, store) = store_with(json!({
            "poll": { "topic": "Best feature?", "answers": ["speed", "privacy"] },
        }));

        let result = store.update_document(|document| {
            document["poll"]["answers"] = json!([]);
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert_eq!(store.get().poll.answers.options().len(), 2);

        // Free-form and "no poll at all" are both fine.
        store
            .update_document(|document| document["poll"]["answers"] = json!("none"))
            .unwrap();
        assert!(store.get().poll.answers.is_free_form());
        assert!(BotConfig::from_document(json!({ "poll": { "answers": [] } })).is_ok());
    }

    #[test]
    fn running_poll_without_answers_does_not_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let document = json!({ "poll": { "topic": "Best feature?", "answers": [] } });
        std::fs::write(&path, document.to_string()).unwrap();

        assert!(matches!(
            ConfigStore::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn reload_picks_up_edits_and_keeps_old_on_garbage() {
        let (_dir, store) = store_with(json!({}));

        std::fs::write(store.path(), json!({ "pairing_asset": "ETH" }).to_string()).unwrap();
        store.reload().unwrap();
        assert_eq!(store.get().pairing_asset, "ETH");

        std::fs::write(store.path(), "{ this is not json").unwrap();
        assert!(matches!(store.reload(), Err(ConfigError::Parse { .. })));
        assert_eq!(store.get().pairing_asset, "ETH");
    }

    #[test]
    fn saved_file_is_indented_by_four() {
        let (_dir, store) = store_with(json!({}));
        store.update(|_| ()).unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\n    \"res_folder\": \"res\""));
    }
}
