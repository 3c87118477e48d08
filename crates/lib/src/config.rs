//! Configuration types and loading.
//!
//! Config is loaded once at startup from a JSON file (default `config.json` in the working
//! directory) and environment. Secrets can be overridden by env so the file can be committed
//! without them. The resulting [`Config`] is immutable and shared as `Arc<Config>`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

/// Top-level relay config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Webhook subscription verification.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Page-based messenger (send API token).
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// WhatsApp Business (media lookup and send API token).
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Downstream aggregation service.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Graph API base URL including version (default https://graph.facebook.com/v18.0).
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    /// Root directory for stored images (default "images", relative to the working directory).
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// Outbound HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Listener bind address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Bind address (default "0.0.0.0"; platform webhooks must reach it).
    #[serde(default = "default_server_bind")]
    pub bind: String,

    /// Port (default 1337).
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Static token compared against `hub.verify_token`. Overridden by HUBRELAY_VERIFY_TOKEN.
    pub verify_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerConfig {
    /// Page access token for the send API. Overridden by HUBRELAY_PAGE_ACCESS_TOKEN.
    pub page_access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    /// Business API access token (media download and send). Overridden by HUBRELAY_WHATSAPP_ACCESS_TOKEN.
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    /// Endpoint that receives every normalized message. Overridden by HUBRELAY_AGGREGATOR_URL.
    pub url: Option<String>,
    /// Shared secret sent with every forward and expected on every reply. Overridden by HUBRELAY_AGGREGATOR_TOKEN.
    pub token: Option<String>,
    /// Application identifier sent with every forward.
    #[serde(default)]
    pub app_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Total timeout for each outbound request, in seconds (default 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_server_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    1337
}

fn default_graph_api_base() -> String {
    DEFAULT_GRAPH_API_BASE.to_string()
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            webhook: WebhookConfig::default(),
            messenger: MessengerConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            aggregator: AggregatorConfig::default(),
            graph_api_base: default_graph_api_base(),
            images_dir: default_images_dir(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
            port: default_server_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Graph API base without a trailing slash.
    pub fn graph_api_base(&self) -> &str {
        self.graph_api_base.trim_end_matches('/')
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs.max(1))
    }

    /// Check the settings the relay cannot run without.
    pub fn validate(&self) -> Result<()> {
        if non_empty(self.webhook.verify_token.as_deref()).is_none() {
            anyhow::bail!(
                "webhook verify token missing (set webhook.verifyToken or HUBRELAY_VERIFY_TOKEN)"
            );
        }
        if non_empty(self.aggregator.url.as_deref()).is_none() {
            anyhow::bail!("aggregator url missing (set aggregator.url or HUBRELAY_AGGREGATOR_URL)");
        }
        if non_empty(self.aggregator.token.as_deref()).is_none() {
            log::warn!("aggregator token is empty; every reply will be rejected");
        }
        Ok(())
    }

    /// Apply HUBRELAY_* environment overrides. Env wins over the file; blank values are ignored.
    pub fn apply_env_overrides(&mut self) {
        override_from_env(&mut self.webhook.verify_token, "HUBRELAY_VERIFY_TOKEN");
        override_from_env(
            &mut self.messenger.page_access_token,
            "HUBRELAY_PAGE_ACCESS_TOKEN",
        );
        override_from_env(
            &mut self.whatsapp.access_token,
            "HUBRELAY_WHATSAPP_ACCESS_TOKEN",
        );
        override_from_env(&mut self.aggregator.url, "HUBRELAY_AGGREGATOR_URL");
        override_from_env(&mut self.aggregator.token, "HUBRELAY_AGGREGATOR_TOKEN");
    }
}

fn override_from_env(slot: &mut Option<String>, var: &str) {
    if let Some(v) = std::env::var(var).ok().and_then(|s| non_empty(Some(&s))) {
        *slot = Some(v);
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Trimmed secret; None when unset or blank.
pub fn secret(value: &Option<String>) -> Option<String> {
    non_empty(value.as_deref())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HUBRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"))
}

/// Resolve the images root: absolute `imagesDir` as is, relative ones against the config file's parent.
pub fn resolve_images_dir(config: &Config, config_path: &Path) -> PathBuf {
    if config.images_dir.is_absolute() {
        return config.images_dir.clone();
    }
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(&config.images_dir)
}

/// Load config from `path` (or the default path) and apply env overrides. Missing file => defaults.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.apply_env_overrides();
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 1337);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.graph_api_base(), DEFAULT_GRAPH_API_BASE);
        assert_eq!(config.images_dir, PathBuf::from("images"));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn parses_camel_case_file() {
        let config: Config = serde_json::from_str(
            r#"{
                "server": { "port": 8080 },
                "webhook": { "verifyToken": "v" },
                "aggregator": { "url": "http://agg/in", "token": "t", "appName": "bot" },
                "graphApiBase": "http://graph/v18.0/"
            }"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.webhook.verify_token.as_deref(), Some("v"));
        assert_eq!(config.aggregator.app_name, "bot");
        assert_eq!(config.graph_api_base(), "http://graph/v18.0");
    }

    #[test]
    fn validate_requires_verify_token_and_aggregator_url() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
        config.webhook.verify_token = Some("v".to_string());
        assert!(config.validate().is_err());
        config.aggregator.url = Some("  ".to_string());
        assert!(config.validate().is_err());
        config.aggregator.url = Some("http://agg".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn secret_trims_and_drops_blank() {
        assert_eq!(secret(&Some("  abc ".to_string())).as_deref(), Some("abc"));
        assert_eq!(secret(&Some("   ".to_string())), None);
        assert_eq!(secret(&None), None);
    }

    #[test]
    fn resolve_images_dir_relative_to_config() {
        let config = Config::default();
        assert_eq!(
            resolve_images_dir(&config, Path::new("/srv/relay/config.json")),
            PathBuf::from("/srv/relay/images")
        );
        assert_eq!(
            resolve_images_dir(&config, Path::new("config.json")),
            PathBuf::from("./images")
        );
    }

    #[test]
    fn resolve_images_dir_absolute_override() {
        let mut config = Config::default();
        config.images_dir = PathBuf::from("/var/lib/relay/images");
        assert_eq!(
            resolve_images_dir(&config, Path::new("/srv/relay/config.json")),
            PathBuf::from("/var/lib/relay/images")
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, path) = load_config(Some(dir.path().join("absent.json"))).unwrap();
        assert_eq!(path, dir.path().join("absent.json"));
        assert_eq!(config.server.port, 1337);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_config(Some(path)).is_err());
    }
}
