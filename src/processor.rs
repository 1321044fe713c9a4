use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{CannedReply, ResponderConfig};
use crate::error::{RelayError, RelayResult};
use crate::event::Message;
use crate::sender::TeamSender;

/// Details about the message a processor is answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputContext {
    pub jid: String,
    pub message_id: Option<String>,
}

/// Pluggable language processing: turns inbound text into replies.
#[async_trait]
pub trait LanguageProcessor: Send + Sync {
    /// Return the replies to send, in order. An empty list means stay silent.
    async fn output(&self, input: &str, context: &InputContext) -> Result<Vec<String>>;
}

/// Everything one message-processing invocation gets to work with.
#[derive(Clone)]
pub struct ResponderContext {
    pub metadata: Arc<ResponderConfig>,
    pub processor: Arc<dyn LanguageProcessor>,
    /// Valid for the duration of the invocation, scoped to the calling team.
    pub sender: TeamSender,
}

/// Per-message entry point invoked by the dispatcher, once per new message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message, ctx: &ResponderContext) -> RelayResult<()>;
}

/// Runs [`on_message`]: text in, replies out.
pub struct TextResponder;

#[async_trait]
impl MessageHandler for TextResponder {
    async fn handle(&self, message: &Message, ctx: &ResponderContext) -> RelayResult<()> {
        on_message(message, ctx).await
    }
}

/// Process one inbound message: ask the processor for replies and send them.
///
/// Own messages, broadcasts, text-less messages and (optionally) group
/// messages are skipped without error.
pub async fn on_message(message: &Message, ctx: &ResponderContext) -> RelayResult<()> {
    if message.from_me() {
        debug!("Skipping own message {:?}", message.id());
        return Ok(());
    }
    let jid = match message.remote_jid() {
        Some(jid) if !message.is_status_broadcast() => jid,
        _ => {
            debug!("Skipping message {:?} without a reply target", message.id());
            return Ok(());
        }
    };
    if ctx.metadata.ignore_groups && message.is_group() {
        debug!("Skipping group message {:?} in {}", message.id(), jid);
        return Ok(());
    }
    let text = match message.text() {
        Some(text) => text,
        None => return Ok(()),
    };

    let input = InputContext {
        jid: jid.to_string(),
        message_id: message.id().map(str::to_string),
    };
    let replies = ctx
        .processor
        .output(text, &input)
        .await
        .map_err(RelayError::Processor)?;

    if replies.is_empty() {
        return Ok(());
    }
    info!(
        "Sending {} repl{} to {} for team {}",
        replies.len(),
        if replies.len() == 1 { "y" } else { "ies" },
        jid,
        ctx.sender.team_id()
    );

    let quoted = ctx.metadata.quote_replies.then_some(message);
    for reply in &replies {
        ctx.sender.send_message(jid, reply, quoted).await?;
    }
    Ok(())
}

/// Replies with a fixed text when the input mentions a keyword.
pub struct CannedReplyProcessor {
    replies: Vec<CannedReply>,
}

impl CannedReplyProcessor {
    pub fn new(replies: Vec<CannedReply>) -> Self {
        let replies = replies
            .into_iter()
            .filter(|r| !r.keyword.trim().is_empty())
            .map(|r| CannedReply {
                keyword: r.keyword.trim().to_lowercase(),
                reply: r.reply,
            })
            .collect();
        Self { replies }
    }
}

#[async_trait]
impl LanguageProcessor for CannedReplyProcessor {
    async fn output(&self, input: &str, _context: &InputContext) -> Result<Vec<String>> {
        let input = input.to_lowercase();
        Ok(self
            .replies
            .iter()
            .find(|r| input.contains(&r.keyword))
            .map(|r| vec![r.reply.clone()])
            .unwrap_or_default())
    }
}
