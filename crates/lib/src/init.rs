//! Initialize a relay deployment: config file template and images directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

/// Config with every key present and blank secrets, for hand editing.
fn template_config() -> Config {
    let mut config = Config::default();
    config.webhook.verify_token = Some(String::new());
    config.messenger.page_access_token = Some(String::new());
    config.whatsapp.access_token = Some(String::new());
    config.aggregator.url = Some(String::new());
    config.aggregator.token = Some(String::new());
    config
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes a template config if missing (an existing file is left untouched).
/// - Creates the images directory named by the (possibly existing) config.
///
/// Returns the images directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    let config = if !config_path.exists() {
        let config = template_config();
        let json = serde_json::to_string_pretty(&config).context("serializing template config")?;
        std::fs::write(config_path, json)
            .with_context(|| format!("writing template config to {}", config_path.display()))?;
        log::info!("created template config at {}", config_path.display());
        config
    } else {
        log::debug!("config already exists at {}, keeping it", config_path.display());
        let s = std::fs::read_to_string(config_path)
            .with_context(|| format!("reading config from {}", config_path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", config_path.display()))?
    };

    let images_dir = config::resolve_images_dir(&config, config_path);
    std::fs::create_dir_all(&images_dir)
        .with_context(|| format!("creating images directory {}", images_dir.display()))?;
    log::info!("images directory ready at {}", images_dir.display());

    Ok(images_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_template_and_images_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay").join("config.json");

        let images = init_config_dir(&path).unwrap();

        assert_eq!(images, dir.path().join("relay").join("images"));
        assert!(images.is_dir());
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["webhook"]["verifyToken"], "");
        assert_eq!(written["aggregator"]["appName"], "");
        assert_eq!(written["server"]["port"], 1337);
    }

    #[test]
    fn keeps_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "imagesDir": "media" }"#).unwrap();

        let images = init_config_dir(&path).unwrap();

        assert_eq!(images, dir.path().join("media"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{ "imagesDir": "media" }"#
        );
    }
}
