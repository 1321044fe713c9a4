use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::auth::AuthenticationGateway;
use crate::config::ResponderConfig;
use crate::error::RelayResult;
use crate::event::InboundEvent;
use crate::processor::{LanguageProcessor, MessageHandler, ResponderContext, TextResponder};
use crate::sender::{MessageSender, TeamSender};

/// The parts of an inbound webhook call the dispatcher reads.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Raw `Authorization` header value, if any.
    pub authorization: Option<String>,
    pub body: String,
}

impl WebhookRequest {
    /// Header value with a leading `Bearer ` removed.
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookResponse {
    /// New messages were processed: `200 {"success":true}`.
    Processed,
    /// Nothing to do for this event: `204`, no body.
    NoContent,
}

impl WebhookResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookResponse::Processed => 200,
            WebhookResponse::NoContent => 204,
        }
    }

    pub fn body(&self) -> Option<serde_json::Value> {
        match self {
            WebhookResponse::Processed => Some(serde_json::json!({ "success": true })),
            WebhookResponse::NoContent => None,
        }
    }
}

/// Turns webhook calls into processor invocations.
///
/// Holds only shared, immutable handles; one dispatcher serves every request.
pub struct EventDispatcher {
    gateway: Arc<dyn AuthenticationGateway>,
    sender: Arc<MessageSender>,
    processor: Arc<dyn LanguageProcessor>,
    handler: Arc<dyn MessageHandler>,
    metadata: Arc<ResponderConfig>,
}

impl EventDispatcher {
    pub fn new(
        gateway: Arc<dyn AuthenticationGateway>,
        sender: Arc<MessageSender>,
        processor: Arc<dyn LanguageProcessor>,
        metadata: ResponderConfig,
    ) -> Self {
        Self {
            gateway,
            sender,
            processor,
            handler: Arc::new(TextResponder),
            metadata: Arc::new(metadata),
        }
    }

    /// Replace the default text responder with a custom per-message handler.
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Authenticate, classify and fan out one webhook call.
    ///
    /// Messages are processed concurrently. Every invocation runs to
    /// completion; if any of them failed, the first failure is returned.
    pub async fn handle(&self, request: &WebhookRequest) -> RelayResult<WebhookResponse> {
        let user = self.gateway.authenticate(request.bearer_token()).await?;
        info!("Received webhook for team {}", user.team_id);

        let event = InboundEvent::parse(&request.body)?;
        info!("Team {} event is {}", user.team_id, event.kind());

        let messages = match event.into_new_messages() {
            Some(messages) => messages,
            None => return Ok(WebhookResponse::NoContent),
        };

        let ctx = ResponderContext {
            metadata: self.metadata.clone(),
            processor: self.processor.clone(),
            sender: TeamSender::new(self.gateway.clone(), self.sender.clone(), user.team_id),
        };

        let results = join_all(
            messages
                .iter()
                .map(|message| self.handler.handle(message, &ctx)),
        )
        .await;
        let total = results.len();
        let mut errors = results.into_iter().filter_map(Result::err);
        if let Some(first) = errors.next() {
            warn!(
                "{} of {} message(s) failed for team {}",
                1 + errors.count(),
                total,
                ctx.sender.team_id()
            );
            return Err(first);
        }

        Ok(WebhookResponse::Processed)
    }
}
