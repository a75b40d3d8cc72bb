use std::{
    path::Path,
    sync::{Arc, Weak},
    time::Duration,
};

use notify::{RecursiveMode, Watcher};

use super::ConfigStore;

/// Reload the configuration whenever its file changes, until the store is
/// dropped.
pub async fn watch_config(store: Weak<ConfigStore>) {
    let Some((directory, file_name)) = store.upgrade().and_then(|store| {
        let path = store.path();
        let file_name = path.file_name()?.to_owned();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
            _ => Path::new(".").to_owned(),
        };
        Some((directory, file_name))
    }) else {
        return;
    };

    let update_notify = Arc::new(tokio::sync::Notify::new());
    let update_notify_watcher_clone = update_notify.clone();

    let watcher = notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Config watcher error: {e}");
                return;
            }
        };
        let k = event.kind;
        if (k.is_create() || k.is_modify() || k.is_other())
            && event
                .paths
                .iter()
                .any(|path| path.file_name() == Some(file_name.as_os_str()))
        {
            update_notify_watcher_clone.notify_one();
        }
    });

    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            log::warn!("Can't watch the config file, hot reload is off: {e}");
            return;
        }
    };

    if let Err(e) = watcher.watch(&directory, RecursiveMode::NonRecursive) {
        log::warn!("Can't watch {}, hot reload is off: {e}", directory.display());
        return;
    }

    loop {
        update_notify.notified().await;

        // Editors tend to write files in several steps. Let them finish.
        tokio::time::sleep(Duration::from_millis(250)).await;

        let Some(store) = store.upgrade() else {
            // This means the store was dropped.
            break;
        };

        log::debug!("Notified of a config file change!");
        if let Err(e) = store.reload() {
            log::warn!("Failed to reload the configuration: {e}");
        }
    }
}
