//! Outbound delivery to the SendMammy messages API.
//!
//! Every send carries a `tag` derived from its schedule timestamp. SendMammy
//! deduplicates on that tag, so a retried request that was in fact delivered
//! comes back as `409 Conflict` and is reported as already delivered.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::AuthenticationGateway;
use crate::config::SendMammyConfig;
use crate::error::{response_text, RelayError, RelayResult};
use crate::event::Message;

/// Source of the send timestamp.
pub trait Clock: Send + Sync {
    fn now_unix_seconds(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed-interval retry schedule for the outbound POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Wait between attempts. Not scaled by attempt number.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SendMammyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 502 | 503 | 504)
}

/// Only timeouts and failed host lookups are retried. A refused or reset
/// connection means the host answered, so it fails on the first attempt.
///
/// reqwest reports DNS and refused-connection failures alike as connect
/// errors; the cause chain tells them apart.
fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() {
        return true;
    }
    let mut cause = std::error::Error::source(error);
    while let Some(err) = cause {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::TimedOut => return true,
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset => {
                    return false
                }
                _ => {}
            }
        }
        let message = err.to_string();
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return true;
        }
        cause = err.source();
    }
    false
}

/// JSON body of `POST /messages/{jid}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessageRequest {
    pub text: String,
    pub schedule_at: i64,
    #[serde(rename = "quotedID", skip_serializing_if = "Option::is_none")]
    pub quoted_id: Option<String>,
    pub with_typing: bool,
    pub randomize_message: bool,
    pub tag: String,
}

impl OutboundMessageRequest {
    /// Schedule `text` for immediate delivery at `timestamp`.
    pub fn new(text: &str, timestamp: i64, quoted: Option<&Message>) -> Self {
        Self {
            text: text.to_string(),
            schedule_at: timestamp,
            quoted_id: quoted.and_then(|m| m.id()).map(str::to_string),
            with_typing: true,
            randomize_message: false,
            tag: timestamp.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// 200: accepted for delivery.
    Delivered,
    /// 409: a message with the same tag was already accepted.
    AlreadyDelivered,
}

pub struct MessageSender {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl MessageSender {
    pub fn new(client: reqwest::Client, base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid SendMammy URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("SendMammy URL cannot be used as a base: {base_url}");
        }
        Ok(Self {
            client,
            base_url,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                delay: retry.delay,
            },
            clock: Arc::new(SystemClock),
        })
    }

    pub fn from_config(config: &SendMammyConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("Failed to create SendMammy HTTP client")?;
        Self::new(client, &config.base_url, RetryPolicy::from_config(config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn message_url(&self, jid: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("messages").push(jid);
        }
        url
    }

    /// Deliver `text` to conversation `jid` using an already issued access token.
    pub async fn send(
        &self,
        token: &str,
        jid: &str,
        text: &str,
        quoted: Option<&Message>,
    ) -> RelayResult<SendOutcome> {
        let timestamp = self.clock.now_unix_seconds();
        let request = OutboundMessageRequest::new(text, timestamp, quoted);
        let url = self.message_url(jid);

        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            debug!(
                "POST {} (attempt {}/{}, tag {})",
                url, attempt, self.retry.max_attempts, request.tag
            );

            let response = self
                .client
                .post(url.clone())
                .bearer_auth(token)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if attempt < self.retry.max_attempts && is_retryable_status(status) {
                        warn!(
                            "SendMammy returned {} for {} (attempt {}), retrying in {:?}",
                            status, jid, attempt, self.retry.delay
                        );
                        tokio::time::sleep(self.retry.delay).await;
                        continue;
                    }

                    let body = response_text(response).await;
                    return match status {
                        200 => {
                            info!("Sent message to {} (tag {})", jid, request.tag);
                            Ok(SendOutcome::Delivered)
                        }
                        409 => {
                            info!("Message to {} already sent (tag {})", jid, request.tag);
                            Ok(SendOutcome::AlreadyDelivered)
                        }
                        _ => Err(RelayError::Delivery { status, body }),
                    };
                }
                Err(error) => {
                    if attempt < self.retry.max_attempts && is_retryable_transport_error(&error) {
                        warn!(
                            "SendMammy unreachable for {} (attempt {}): {}",
                            jid, attempt, error
                        );
                        tokio::time::sleep(self.retry.delay).await;
                        continue;
                    }
                    return Err(RelayError::Transport {
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }
}

/// Send capability bound to the team that triggered the current webhook.
///
/// A fresh access token is requested on every call.
#[derive(Clone)]
pub struct TeamSender {
    gateway: Arc<dyn AuthenticationGateway>,
    sender: Arc<MessageSender>,
    team_id: String,
}

impl TeamSender {
    pub fn new(
        gateway: Arc<dyn AuthenticationGateway>,
        sender: Arc<MessageSender>,
        team_id: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            sender,
            team_id: team_id.into(),
        }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub async fn send_message(
        &self,
        jid: &str,
        text: &str,
        quoted: Option<&Message>,
    ) -> RelayResult<SendOutcome> {
        let token = self.gateway.get_token(&self.team_id).await?;
        self.sender.send(&token, jid, text, quoted).await
    }
}
