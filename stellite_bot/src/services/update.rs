use std::{io::Write, path::Path};

use reqwest::{
    header::{ETAG, IF_NONE_MATCH},
    StatusCode,
};
use serde_json::Value;
use tempfile::NamedTempFile;
use url::Url;

use crate::{
    config::{document::merge_missing, ConfigStore},
    error::HandlerError,
};

/// Name of the configuration template published next to the binary.
const CONFIG_TEMPLATE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    NotConfigured,
    UpToDate,
    /// New binary is in place. Needs a restart to take effect.
    Updated { added_keys: Vec<String> },
    Failed(StatusCode),
}

/// URL of the configuration template, in the same folder as the binary.
pub fn template_url(update_url: &str) -> Result<Url, url::ParseError> {
    Url::parse(update_url)?.join(CONFIG_TEMPLATE)
}

/// Fetch a newer build if there is one, merge new configuration keys from the
/// template, and put the new binary in place of the running one.
pub async fn self_update(
    client: &reqwest::Client,
    store: &ConfigStore,
) -> Result<UpdateOutcome, HandlerError> {
    let config = store.get();
    if config.update_url.is_empty() {
        return Ok(UpdateOutcome::NotConfigured);
    }

    let mut request = client.get(&config.update_url);
    if !config.update_hash.is_empty() {
        request = request.header(IF_NONE_MATCH, &config.update_hash);
    }
    let response = request.send().await?;

    match response.status() {
        StatusCode::NOT_MODIFIED => return Ok(UpdateOutcome::UpToDate),
        StatusCode::OK => (),
        status => {
            log::warn!("Update server answered {status}");
            return Ok(UpdateOutcome::Failed(status));
        }
    }

    let e_tag = response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let binary = response.bytes().await?;

    let template: Value = client
        .get(template_url(&config.update_url)?)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let executable = std::env::current_exe()?;
    let added_keys = install_update(&executable, &binary, store, &template, e_tag)?;
    log::info!("Replaced the executable with {} new bytes", binary.len());

    if !added_keys.is_empty() {
        log::info!("New configuration keys from the template: {:?}", added_keys);
    }

    Ok(UpdateOutcome::Updated { added_keys })
}

/// Put a downloaded update in place: stage the binary next to `executable`,
/// save the merged configuration, and only then rename the binary over the
/// old one. If saving fails the old executable stays as it was.
fn install_update(
    executable: &Path,
    binary: &[u8],
    store: &ConfigStore,
    template: &Value,
    e_tag: String,
) -> Result<Vec<String>, HandlerError> {
    let staged = stage_file(executable, binary)?;

    let added_keys = store.update_document(|document| {
        let added = merge_missing(document, template);
        if let Value::Object(map) = document {
            map.insert(String::from("update_hash"), Value::String(e_tag));
        }
        added
    })?;

    // Renaming is fine even while the old file is being executed.
    staged.persist(executable).map_err(|e| e.error)?;
    Ok(added_keys)
}

/// Write `contents` to an executable temporary file in the same directory as
/// `path`, ready to be renamed over it. Dropping it removes it again.
fn stage_file(path: &Path, contents: &[u8]) -> std::io::Result<NamedTempFile> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_lives_next_to_the_binary() {
        assert_eq!(
            template_url("https://example.com/releases/latest/stellite_bot")
                .unwrap()
                .as_str(),
            "https://example.com/releases/latest/config.json"
        );
        assert!(template_url("not a url").is_err());
    }

    fn store_in(dir: &Path) -> ConfigStore {
        let path = dir.join("config.json");
        std::fs::write(&path, "{}").unwrap();
        ConfigStore::load(path).unwrap()
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn installing_an_update() {
        let bin_dir = tempfile::tempdir().unwrap();
        let config_dir = tempfile::tempdir().unwrap();
        let executable = bin_dir.path().join("stellite_bot");
        std::fs::write(&executable, b"old").unwrap();
        let store = store_in(config_dir.path());

        let template = serde_json::json!({ "brand_new": 1, "ban_bots": false });
        let added = install_update(
            &executable,
            b"new and improved",
            &store,
            &template,
            String::from("\"abc\""),
        )
        .unwrap();

        assert_eq!(added, vec![String::from("brand_new")]);
        assert_eq!(std::fs::read(&executable).unwrap(), b"new and improved");
        assert_eq!(store.get().update_hash, "\"abc\"");
        assert!(store.get().ban_bots);
        assert_eq!(file_names(bin_dir.path()), vec![String::from("stellite_bot")]);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&executable).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn failed_config_save_keeps_the_old_executable() {
        let bin_dir = tempfile::tempdir().unwrap();
        let config_dir = tempfile::tempdir().unwrap();
        let executable = bin_dir.path().join("stellite_bot");
        std::fs::write(&executable, b"old").unwrap();
        let store = store_in(config_dir.path());

        // Nowhere to save the configuration anymore.
        std::fs::remove_dir_all(config_dir.path()).unwrap();

        let result = install_update(
            &executable,
            b"new",
            &store,
            &serde_json::json!({}),
            String::from("\"abc\""),
        );

        assert!(matches!(result, Err(HandlerError::Config(_))));
        assert_eq!(std::fs::read(&executable).unwrap(), b"old");
        assert_eq!(file_names(bin_dir.path()), vec![String::from("stellite_bot")]);
        assert!(store.get().update_hash.is_empty());
    }
}
