use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_AUTH_SERVICE_URL: &str = "https://api-auth.chatdaddy.tech";
pub const DEFAULT_SENDMAMMY_URL: &str = "https://api.sendmammy.com";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sendmammy: SendMammyConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Long-lived refresh credential used to mint per-team access tokens
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_auth_service_url")]
    pub service_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SendMammyConfig {
    #[serde(default = "default_sendmammy_url")]
    pub base_url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per-attempt timeout; unset means requests are never cut short.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// Static metadata handed to every message-processing invocation.
#[derive(Debug, Deserialize, Clone)]
pub struct ResponderConfig {
    #[serde(default = "default_true")]
    pub quote_replies: bool,
    #[serde(default)]
    pub ignore_groups: bool,
    #[serde(default)]
    pub replies: Vec<CannedReply>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CannedReply {
    pub keyword: String,
    pub reply: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
    "/".to_string()
}

fn default_auth_service_url() -> String {
    DEFAULT_AUTH_SERVICE_URL.to_string()
}

fn default_sendmammy_url() -> String {
    DEFAULT_SENDMAMMY_URL.to_string()
}

fn default_max_attempts() -> usize {
    10
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            webhook_path: default_webhook_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_token: String::new(),
            service_url: default_auth_service_url(),
        }
    }
}

impl Default for SendMammyConfig {
    fn default() -> Self {
        Self {
            base_url: default_sendmammy_url(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: None,
        }
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            quote_replies: true,
            ignore_groups: false,
            replies: Vec::new(),
        }
    }
}

impl SendMammyConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .map(|ms| Duration::from_millis(ms.max(1)))
    }
}

impl Config {
    /// Load the config file and apply process environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.finish()
    }

    /// Build a config from the environment alone, for deployments without a file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::parse("")?;
        config.apply_env(|key| std::env::var(key).ok());
        config.finish()
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Environment values win over the file; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("AUTH_SERVICE_URL") {
            self.auth.service_url = url;
        }
        if let Some(url) = var("SENDMAMMY_URL") {
            self.sendmammy.base_url = url;
        }
        if let Some(token) = var("SENDMAMMY_REFRESH_TOKEN") {
            self.auth.refresh_token = token;
        }
        if let Some(addr) = var("BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
    }

    /// Normalize URLs and check required fields.
    pub fn finish(mut self) -> Result<Self> {
        if self.auth.refresh_token.trim().is_empty() {
            anyhow::bail!(
                "No refresh token configured: set [auth] refresh_token or SENDMAMMY_REFRESH_TOKEN"
            );
        }
        self.auth.service_url = self.auth.service_url.trim_end_matches('/').to_string();
        self.sendmammy.base_url = self.sendmammy.base_url.trim_end_matches('/').to_string();
        self.sendmammy.max_attempts = self.sendmammy.max_attempts.max(1);
        if !self.server.webhook_path.starts_with('/') {
            self.server.webhook_path = format!("/{}", self.server.webhook_path);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::parse("[auth]\nrefresh_token = \"rt\"")
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(config.auth.service_url, DEFAULT_AUTH_SERVICE_URL);
        assert_eq!(config.sendmammy.base_url, DEFAULT_SENDMAMMY_URL);
        assert_eq!(config.sendmammy.max_attempts, 10);
        assert_eq!(config.sendmammy.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.server.webhook_path, "/");
        assert!(config.responder.quote_replies);
        assert!(!config.responder.ignore_groups);
        assert_eq!(config.sendmammy.request_timeout(), None);
    }

    #[test]
    fn test_request_timeout_only_when_configured() {
        let config = Config::parse(
            r#"
[auth]
refresh_token = "rt"

[sendmammy]
request_timeout_ms = 5000
"#,
        )
        .unwrap();
        assert_eq!(
            config.sendmammy.request_timeout(),
            Some(Duration::from_millis(5000))
        );
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::parse(
            r#"
[auth]
refresh_token = "from-file"
service_url = "https://auth.file"

[sendmammy]
base_url = "https://send.file"
"#,
        )
        .unwrap();
        config.apply_env(env(&[
            ("AUTH_SERVICE_URL", "https://auth.env/"),
            ("SENDMAMMY_URL", "https://send.env/"),
            ("SENDMAMMY_REFRESH_TOKEN", "from-env"),
        ]));
        let config = config.finish().unwrap();
        assert_eq!(config.auth.service_url, "https://auth.env");
        assert_eq!(config.sendmammy.base_url, "https://send.env");
        assert_eq!(config.auth.refresh_token, "from-env");
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = Config::parse("[auth]\nrefresh_token = \"rt\"").unwrap();
        config.apply_env(env(&[("SENDMAMMY_URL", "  "), ("AUTH_SERVICE_URL", "")]));
        let config = config.finish().unwrap();
        assert_eq!(config.sendmammy.base_url, DEFAULT_SENDMAMMY_URL);
        assert_eq!(config.auth.service_url, DEFAULT_AUTH_SERVICE_URL);
    }

    #[test]
    fn test_missing_refresh_token_is_rejected() {
        let err = Config::parse("").unwrap().finish().unwrap_err();
        assert!(err.to_string().contains("refresh token"));
    }

    #[test]
    fn test_zero_attempts_clamped_and_path_normalized() {
        let config = Config::parse(
            r#"
[server]
webhook_path = "hooks/sendmammy"

[auth]
refresh_token = "rt"

[sendmammy]
max_attempts = 0
"#,
        )
        .unwrap()
        .finish()
        .unwrap();
        assert_eq!(config.sendmammy.max_attempts, 1);
        assert_eq!(config.server.webhook_path, "/hooks/sendmammy");
    }

    #[test]
    fn test_canned_replies_parsed() {
        let config = Config::parse(
            r#"
[auth]
refresh_token = "rt"

[responder]
quote_replies = false

[[responder.replies]]
keyword = "price"
reply = "It costs 10"
"#,
        )
        .unwrap();
        assert!(!config.responder.quote_replies);
        assert_eq!(
            config.responder.replies,
            vec![CannedReply {
                keyword: "price".to_string(),
                reply: "It costs 10".to_string(),
            }]
        );
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[auth]\nrefresh_token = \"rt-file\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(!config.auth.refresh_token.is_empty());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/sendmammy.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
