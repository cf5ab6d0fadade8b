//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tweetstream_core::{
    AdapterOptions, Authorizer, BearerToken, ExponentialBackoff, FrameErrorPolicy,
    UnrecognizedPolicy,
};

use crate::connection::{ConnectionOptions, DEFAULT_USER_AGENT};

/// Client configuration. File: ~/.config/tweetstream/config.toml or /etc/tweetstream/config.toml.
/// Env overrides: TWEETSTREAM_BEARER_TOKEN, TWEETSTREAM_USER_AGENT,
/// TWEETSTREAM_READ_TIMEOUT_SECS, TWEETSTREAM_MAX_RECONNECTS.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Seconds without a byte before reconnecting (default 90).
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Unset: retry forever.
    #[serde(default)]
    pub max_reconnects: Option<u32>,
    #[serde(default)]
    pub frame_errors: FrameErrorPolicy,
    #[serde(default)]
    pub unrecognized: UnrecognizedPolicy,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_read_timeout_secs() -> u64 {
    90
}
fn default_backoff_initial_ms() -> u64 {
    250
}
fn default_backoff_max_ms() -> u64 {
    16_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bearer_token: None,
            user_agent: default_user_agent(),
            read_timeout_secs: default_read_timeout_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_reconnects: None,
            frame_errors: FrameErrorPolicy::default(),
            unrecognized: UnrecognizedPolicy::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| ".."))
            .field("user_agent", &self.user_agent)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("backoff_initial_ms", &self.backoff_initial_ms)
            .field("backoff_max_ms", &self.backoff_max_ms)
            .field("max_reconnects", &self.max_reconnects)
            .field("frame_errors", &self.frame_errors)
            .field("unrecognized", &self.unrecognized)
            .finish()
    }
}

impl Config {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            user_agent: self.user_agent.clone(),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            backoff: ExponentialBackoff::new(
                Duration::from_millis(self.backoff_initial_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
            max_reconnects: self.max_reconnects,
            adapter: AdapterOptions {
                frame_errors: self.frame_errors,
                unrecognized: self.unrecognized,
                ..AdapterOptions::default()
            },
            ..ConnectionOptions::default()
        }
    }

    /// Bearer-token authorizer; an absent token fails at the first request.
    pub fn authorizer(&self) -> Arc<dyn Authorizer> {
        Arc::new(BearerToken::new(self.bearer_token.clone().unwrap_or_default()))
    }

    /// Apply overrides from `var` (an environment lookup). Unparsable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("TWEETSTREAM_BEARER_TOKEN") {
            self.bearer_token = Some(s);
        }
        if let Some(s) = var("TWEETSTREAM_USER_AGENT") {
            self.user_agent = s;
        }
        if let Some(s) = var("TWEETSTREAM_READ_TIMEOUT_SECS") {
            if let Ok(n) = s.parse::<u64>() {
                self.read_timeout_secs = n;
            }
        }
        if let Some(s) = var("TWEETSTREAM_MAX_RECONNECTS") {
            if let Ok(n) = s.parse::<u32>() {
                self.max_reconnects = Some(n);
            }
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file(&config_paths()).unwrap_or_default();
    c.apply_env(|name| std::env::var(name).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/tweetstream/config.toml"));
    }
    out.push(PathBuf::from("/etc/tweetstream/config.toml"));
    out
}

/// First existing file wins; a file that fails to parse is reported and skipped.
fn load_file(paths: &[PathBuf]) -> Option<Config> {
    let path = paths.iter().find(|p| p.exists())?;
    match read(path) {
        Ok(c) => {
            tracing::debug!(path = %path.display(), "config loaded");
            Some(c)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
            None
        }
    }
}

fn read(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&s)?)
}
