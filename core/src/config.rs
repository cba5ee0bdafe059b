/// Configuration management
use crate::auth::Role;
use crate::error::{InboxError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "http://localhost:5000/api";
const DEFAULT_PUSH_ADDR: &str = "127.0.0.1:5001";

/// Inbox session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the inbox REST API (no trailing slash)
    pub api_base: String,

    /// Push-event server address (`host:port`), `None` disables push
    pub push_addr: Option<String>,

    /// Which panel this session acts as
    pub role: Role,

    /// Directory holding `credentials.json`
    pub data_dir: PathBuf,

    /// Conversation summary poll period
    pub conversation_poll_interval: Duration,

    /// Active thread poll period
    pub thread_poll_interval: Duration,

    /// Tolerance when matching an optimistic send against its server copy
    pub optimistic_match_window: Duration,

    /// Summary polls a read override survives before server truth wins again
    pub read_override_max_polls: u32,

    /// Delay between push reconnect attempts
    pub push_retry_interval: Duration,

    /// Per-request REST timeout
    pub request_timeout: Duration,

    /// Select the newest conversation whenever nothing is selected
    pub auto_select: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            push_addr: Some(DEFAULT_PUSH_ADDR.to_string()),
            role: Role::Admin,
            data_dir: PathBuf::from(".inbox"),
            conversation_poll_interval: Duration::from_secs(5),
            thread_poll_interval: Duration::from_millis(2500),
            optimistic_match_window: Duration::from_secs(30),
            read_override_max_polls: 6,
            push_retry_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(15),
            auto_select: false,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(InboxError::Config(format!(
                "Usage: {} <admin|seller> [--api <url>] [--push <addr>] [--data-dir <path>] [--auto-select] [--no-push]",
                args.first().map(String::as_str).unwrap_or("inbox")
            )));
        }

        let role = args[1].parse::<Role>()?;
        let mut config = Self {
            role,
            ..Default::default()
        };

        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--api" => {
                    let url = args.get(i + 1).ok_or_else(|| {
                        InboxError::Config("--api requires a URL argument".to_string())
                    })?;
                    config.api_base = url.trim_end_matches('/').to_string();
                    i += 2;
                }
                "--push" => {
                    let addr = args.get(i + 1).ok_or_else(|| {
                        InboxError::Config("--push requires an address argument".to_string())
                    })?;
                    config.push_addr = Some(addr.clone());
                    i += 2;
                }
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        InboxError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = PathBuf::from(path);
                    i += 2;
                }
                "--auto-select" => {
                    config.auto_select = true;
                    i += 1;
                }
                "--no-push" => {
                    config.push_addr = None;
                    i += 1;
                }
                other => {
                    return Err(InboxError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Env overrides (nice for scripts)
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("INBOX_API_BASE") {
            if !url.trim().is_empty() {
                self.api_base = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(addr) = std::env::var("INBOX_PUSH_ADDR") {
            if !addr.trim().is_empty() {
                self.push_addr = Some(addr.trim().to_string());
            }
        }
        if let Ok(dir) = std::env::var("INBOX_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir.trim());
            }
        }
        if std::env::var("INBOX_NO_PUSH").is_ok() {
            self.push_addr = None;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(InboxError::Config(format!(
                "API base must be an http(s) URL, got {}",
                self.api_base
            )));
        }
        if self.conversation_poll_interval.is_zero() || self.thread_poll_interval.is_zero() {
            return Err(InboxError::Config("Poll intervals must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Path of the persisted credential file
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }
}
