use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::DEFAULT_PLACEHOLDER_NAME;
use crate::submit::Cooldowns;

const DEFAULT_ENV_PREFIX: &str = "GLOWFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_comment_cooldown", with = "humantime_serde")]
    pub comment_cooldown: Duration,
    #[serde(default = "default_reply_cooldown", with = "humantime_serde")]
    pub reply_cooldown: Duration,
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            comment_cooldown: default_comment_cooldown(),
            reply_cooldown: default_reply_cooldown(),
            placeholder_name: default_placeholder_name(),
        }
    }
}

impl FeedConfig {
    pub fn cooldowns(&self) -> Cooldowns {
        Cooldowns {
            comment: self.comment_cooldown,
            reply: self.reply_cooldown,
        }
    }
}

fn default_comment_cooldown() -> Duration {
    Cooldowns::default().comment
}

fn default_reply_cooldown() -> Duration {
    Cooldowns::default().reply
}

fn default_placeholder_name() -> String {
    DEFAULT_PLACEHOLDER_NAME.into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_store_path")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: default_store_path(),
            url: String::new(),
            api_key: String::new(),
            timeout: default_store_timeout(),
        }
    }
}

fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("glowfeed").join("feed.db"))
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub actor_id: String,
    /// Bearer token sent to the remote store on behalf of the actor.
    #[serde(default)]
    pub access_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    let path = options.config_file.or_else(default_config_path);
    if let Some(path) = path.filter(|path| path.exists()) {
        cfg = merge_config(cfg, read_config_file(&path)?);
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    overlay_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("config: read {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("config: parse {}", path.display()))
}

fn merge_config(mut base: Config, other: Config) -> Config {
    base.feed.comment_cooldown = other.feed.comment_cooldown;
    base.feed.reply_cooldown = other.feed.reply_cooldown;
    if !other.feed.placeholder_name.trim().is_empty() {
        base.feed.placeholder_name = other.feed.placeholder_name;
    }

    base.store.backend = other.store.backend;
    if other.store.path.is_some() {
        base.store.path = other.store.path;
    }
    if !other.store.url.is_empty() {
        base.store.url = other.store.url;
    }
    if !other.store.api_key.is_empty() {
        base.store.api_key = other.store.api_key;
    }
    if !other.store.timeout.is_zero() {
        base.store.timeout = other.store.timeout;
    }

    if !other.session.actor_id.is_empty() {
        base.session.actor_id = other.session.actor_id;
    }
    if !other.session.access_token.is_empty() {
        base.session.access_token = other.session.access_token;
    }

    base
}

/// Writes `PREFIX_SECTION__KEY` variables straight onto `cfg`.
///
/// This is an overlay, not a second `merge_config` layer: `merge_config`
/// takes cooldowns and the backend from its right side unconditionally, so
/// an env layer built from defaults would reset values the file set.
fn overlay_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    let overrides: HashMap<String, String> = env::vars()
        .filter_map(|(key, value)| {
            let stripped = key.strip_prefix(&upper_prefix)?;
            Some((stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect();

    for (key, value) in overrides {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "feed.comment_cooldown" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.feed.comment_cooldown = duration;
            }
        }
        "feed.reply_cooldown" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.feed.reply_cooldown = duration;
            }
        }
        "feed.placeholder_name" => cfg.feed.placeholder_name = value,
        "store.backend" => match value.trim().to_ascii_lowercase().as_str() {
            "local" => cfg.store.backend = Backend::Local,
            "remote" => cfg.store.backend = Backend::Remote,
            _ => {}
        },
        "store.path" => cfg.store.path = Some(PathBuf::from(value)),
        "store.url" => cfg.store.url = value,
        "store.api_key" => cfg.store.api_key = value,
        "store.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.store.timeout = duration;
            }
        }
        "session.actor_id" => cfg.session.actor_id = value,
        "session.access_token" => cfg.session.access_token = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("glowfeed").join("config.yaml"))
}
