//! Webhook relay between the ChatDaddy/SendMammy messaging platform and a
//! pluggable language processor.
//!
//! An inbound webhook is authenticated, classified, and every newly arrived
//! message is handed to a [`processor::LanguageProcessor`] together with a
//! send capability bound to the calling team. Replies go out through
//! [`sender::MessageSender`], which retries transient failures and relies on
//! a timestamp tag for idempotent delivery.

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod processor;
pub mod sender;
pub mod server;

pub use auth::{AuthenticatedUser, AuthenticationGateway, HttpAuthGateway};
pub use dispatcher::{EventDispatcher, WebhookRequest, WebhookResponse};
pub use error::{RelayError, RelayResult};
pub use event::{InboundEvent, Message};
pub use processor::{InputContext, LanguageProcessor, MessageHandler, ResponderContext};
pub use sender::{MessageSender, SendOutcome, TeamSender};
