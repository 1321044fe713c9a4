//! Inbound webhook events and the platform message records they carry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayResult;

pub const CHAT_UPDATE: &str = "chat-update";
pub const MESSAGES_POST_SLEEP: &str = "messages-post-sleep";

const STATUS_BROADCAST_JID: &str = "status@broadcast";
const GROUP_JID_SUFFIX: &str = "@g.us";

/// A platform message record. Only the key and the text content are
/// interpreted here; everything else is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub key: MessageKey,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_me: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

impl Message {
    /// Unique message id, used when quoting.
    pub fn id(&self) -> Option<&str> {
        self.key.id.as_deref()
    }

    /// Conversation the message belongs to.
    pub fn remote_jid(&self) -> Option<&str> {
        self.key.remote_jid.as_deref()
    }

    pub fn from_me(&self) -> bool {
        self.key.from_me.unwrap_or(false)
    }

    pub fn is_group(&self) -> bool {
        self.remote_jid()
            .is_some_and(|jid| jid.ends_with(GROUP_JID_SUFFIX))
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.remote_jid() == Some(STATUS_BROADCAST_JID)
    }

    /// Plain text content: the conversation body, extended text, or a media caption.
    pub fn text(&self) -> Option<&str> {
        let content = self.rest.get("message")?;
        [
            content.get("conversation"),
            content.get("extendedTextMessage").and_then(|m| m.get("text")),
            content.get("imageMessage").and_then(|m| m.get("caption")),
            content.get("videoMessage").and_then(|m| m.get("caption")),
        ]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|text| !text.trim().is_empty())
    }
}

/// A classified webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ChatUpdate {
        has_new_message: bool,
        messages: Vec<Message>,
    },
    MessagesPostSleep {
        messages: Vec<Message>,
    },
    /// Any event kind this relay does not act on.
    Ignored { event: String },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl InboundEvent {
    /// Parse a raw webhook body.
    ///
    /// The body must be a JSON object with a string `event`. Message lists
    /// are only decoded for relevant events; a missing `messages` array is
    /// read as empty.
    pub fn parse(body: &str) -> RelayResult<Self> {
        let envelope: Envelope = serde_json::from_str(body)?;

        let event = match envelope.event.as_str() {
            CHAT_UPDATE => {
                let has_new_message = envelope
                    .data
                    .get("hasNewMessage")
                    .is_some_and(is_truthy);
                let messages = if has_new_message {
                    messages_of(&envelope.data)?
                } else {
                    Vec::new()
                };
                InboundEvent::ChatUpdate {
                    has_new_message,
                    messages,
                }
            }
            MESSAGES_POST_SLEEP => InboundEvent::MessagesPostSleep {
                messages: messages_of(&envelope.data)?,
            },
            _ => InboundEvent::Ignored {
                event: envelope.event,
            },
        };
        Ok(event)
    }

    /// The event discriminant as sent by the platform.
    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::ChatUpdate { .. } => CHAT_UPDATE,
            InboundEvent::MessagesPostSleep { .. } => MESSAGES_POST_SLEEP,
            InboundEvent::Ignored { event } => event,
        }
    }

    /// Newly arrived messages, or `None` when the event needs no processing.
    pub fn into_new_messages(self) -> Option<Vec<Message>> {
        match self {
            InboundEvent::ChatUpdate {
                has_new_message: true,
                messages,
            } => Some(messages),
            InboundEvent::MessagesPostSleep { messages } => Some(messages),
            InboundEvent::ChatUpdate {
                has_new_message: false,
                ..
            }
            | InboundEvent::Ignored { .. } => None,
        }
    }
}

/// Loose flag reading: producers send `1` or `"true"` as well as booleans.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn messages_of(data: &Value) -> RelayResult<Vec<Message>> {
    match data.get("messages") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(messages) => Ok(Vec::<Message>::deserialize(messages)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use serde_json::json;

    #[test]
    fn test_chat_update_with_new_message() {
        let event = InboundEvent::parse(
            r#"{"event":"chat-update","data":{"hasNewMessage":true,"messages":[{"key":{"id":"m1"}}]}}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), CHAT_UPDATE);
        let messages = event.into_new_messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id(), Some("m1"));
    }

    #[test]
    fn test_chat_update_without_new_message_is_not_processed() {
        let event = InboundEvent::parse(
            r#"{"event":"chat-update","data":{"hasNewMessage":false,"messages":[{"key":{"id":"m1"}}]}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::ChatUpdate {
                has_new_message: false,
                messages: Vec::new(),
            }
        );
        assert!(event.into_new_messages().is_none());
    }

    #[test]
    fn test_has_new_message_accepts_truthy_values() {
        for flag in [json!(1), json!("true"), json!("yes")] {
            let body = json!({
                "event": "chat-update",
                "data": {"hasNewMessage": flag, "messages": [{"key": {"id": "m1"}}]}
            });
            let event = InboundEvent::parse(&body.to_string()).unwrap();
            assert_eq!(event.into_new_messages().map(|m| m.len()), Some(1), "{flag}");
        }
        for flag in [json!(0), json!(""), Value::Null] {
            let body = json!({
                "event": "chat-update",
                "data": {"hasNewMessage": flag, "messages": [{"key": {"id": "m1"}}]}
            });
            let event = InboundEvent::parse(&body.to_string()).unwrap();
            assert!(event.into_new_messages().is_none(), "{flag}");
        }
    }

    #[test]
    fn test_messages_post_sleep_keeps_every_message() {
        let event = InboundEvent::parse(
            r#"{"event":"messages-post-sleep","data":{"messages":[{"key":{"id":"a"}},{"key":{"id":"b"}},{"key":{"id":"c"}}]}}"#,
        )
        .unwrap();
        let ids: Vec<_> = event
            .into_new_messages()
            .unwrap()
            .iter()
            .map(|m| m.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let event = InboundEvent::parse(r#"{"event":"other"}"#).unwrap();
        assert_eq!(event.kind(), "other");
        assert!(event.into_new_messages().is_none());
    }

    #[test]
    fn test_missing_messages_reads_as_empty() {
        let event = InboundEvent::parse(r#"{"event":"messages-post-sleep","data":{}}"#).unwrap();
        assert_eq!(event.into_new_messages(), Some(Vec::new()));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = InboundEvent::parse("not json").unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload(_)));
    }

    #[test]
    fn test_missing_event_field_is_malformed() {
        let err = InboundEvent::parse(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload(_)));
    }

    #[test]
    fn test_non_array_messages_is_malformed() {
        let err = InboundEvent::parse(r#"{"event":"messages-post-sleep","data":{"messages":5}}"#)
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload(_)));
    }

    #[test]
    fn test_message_accessors() {
        let message: Message = serde_json::from_value(json!({
            "key": {"id": "ABC", "remoteJid": "123@s.whatsapp.net", "fromMe": false},
            "message": {"extendedTextMessage": {"text": "hello there"}},
            "messageTimestamp": 1620000000
        }))
        .unwrap();
        assert_eq!(message.id(), Some("ABC"));
        assert_eq!(message.remote_jid(), Some("123@s.whatsapp.net"));
        assert!(!message.from_me());
        assert!(!message.is_group());
        assert_eq!(message.text(), Some("hello there"));
        assert_eq!(message.rest["messageTimestamp"], json!(1620000000));
    }

    #[test]
    fn test_message_text_falls_back_to_caption() {
        let message: Message = serde_json::from_value(json!({
            "key": {"id": "x", "remoteJid": "1@g.us"},
            "message": {"conversation": "  ", "imageMessage": {"caption": "look"}}
        }))
        .unwrap();
        assert!(message.is_group());
        assert_eq!(message.text(), Some("look"));
    }

    #[test]
    fn test_message_round_trips_unknown_fields() {
        let raw = json!({"key": {"id": "m1"}, "pushName": "Ana"});
        let message: Message = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&message).unwrap(), raw);
    }
}
