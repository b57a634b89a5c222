//! The message envelope.
//!
//! A [`Message`] is what travels between services: a topic `name`, the
//! `source` service, an id, a creation time, a typed payload and the
//! [`MsgContext`] describing who sent it and from where.
//!
//! # Wire form
//!
//! ```json
//! {"name": "user.get", "source": "gateway", "id": "...", "created_at": 1700000000000,
//!  "payload": {...}, "context": {...}}
//! ```
//!
//! `id` and `created_at` are generated when absent; an absent `payload` or
//! `context` is read as `{}` and then validated, so payload types with
//! required fields still report them. Unknown keys are ignored.

use crate::{
    outcome::Result,
    primitives::{DateTime, Id, Locale, Map, Timezone},
    schema::{FieldSchema, Object, Schema, Shape},
};
use serde::Serialize;
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Access to the tracing identifiers of a value.
pub trait Traceable {
    /// Identifier shared by every message of one logical operation.
    fn trace_id(&self) -> Option<&str>;

    /// Identifier of this hop.
    fn span_id(&self) -> Option<&str>;
}

/// A message with a typed payload.
///
/// Two messages are equal when their ids are equal.
#[derive(Debug, Clone, Serialize)]
pub struct Message<P> {
    name: String,
    source: String,
    id: Id,
    created_at: DateTime,
    payload: P,
    context: MsgContext,
}

impl<P> Message<P> {
    /// A new message with a fresh id, the current time and a default context.
    pub fn new(name: impl Into<String>, source: impl Into<String>, payload: P) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            id: Id::new(),
            created_at: DateTime::now(),
            payload,
            context: MsgContext::default(),
        }
    }

    /// Replace the context.
    pub fn with_context(mut self, context: MsgContext) -> Self {
        self.context = context;
        self
    }

    /// Topic of the message.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service that emitted the message.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Unique id.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime {
        self.created_at
    }

    /// Typed payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Sender context.
    pub fn context(&self) -> &MsgContext {
        &self.context
    }

    /// Consume the message into its payload.
    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P: Object> Message<P> {
    /// Materialize a message, discarding the failure.
    pub fn from_raw(raw: Value) -> Option<Self> {
        Self::create(Some(raw)).ok()
    }
}

impl<P> PartialEq for Message<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for Message<P> {}

impl<P> Hash for Message<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<P> Traceable for Message<P> {
    fn trace_id(&self) -> Option<&str> {
        Some(self.context.trace_id.as_str())
    }

    fn span_id(&self) -> Option<&str> {
        Some(self.context.span_id.as_str())
    }
}

/// Fill an absent or null `key` of a raw object with `{}`.
fn default_object(raw: &mut Value, key: &str) {
    if let Value::Object(map) = raw {
        let entry = map.entry(key).or_insert(Value::Null);
        if entry.is_null() {
            *entry = Value::Object(serde_json::Map::new());
        }
    }
}

impl<P: Object> Object for Message<P> {
    fn name() -> &'static str {
        "message"
    }

    fn prepare(mut raw: Value) -> Result<Value> {
        default_object(&mut raw, "payload");
        default_object(&mut raw, "context");
        Ok(raw)
    }

    fn shape() -> Shape<Self> {
        Shape::Composite(Schema::cached(|| {
            Schema::new(
                vec![
                    FieldSchema::of::<String>("name"),
                    FieldSchema::of::<String>("source"),
                    FieldSchema::with_default::<Id>("id", Id::new),
                    FieldSchema::with_default::<DateTime>("created_at", DateTime::now),
                    FieldSchema::of::<P>("payload"),
                    FieldSchema::of::<MsgContext>("context"),
                ],
                |fields| {
                    Ok(Message {
                        name: fields.take("name")?,
                        source: fields.take("source")?,
                        id: fields.take("id")?,
                        created_at: fields.take("created_at")?,
                        payload: fields.take("payload")?,
                        context: fields.take("context")?,
                    })
                },
            )
        }))
    }
}

// ============================================================================
// Context
// ============================================================================

/// Who sent a message and as part of which operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MsgContext {
    /// Authenticated user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Id>,
    /// Identifier of this hop.
    pub span_id: Id,
    /// Identifier of the whole operation.
    pub trace_id: Id,
    /// Free-form values propagated with the message.
    pub extra: Map,
    /// Client that originated the operation.
    pub client: MsgClient,
}

impl Object for MsgContext {
    fn name() -> &'static str {
        "msg_context"
    }

    fn shape() -> Shape<Self> {
        Shape::Composite(Schema::cached(|| {
            Schema::new(
                vec![
                    FieldSchema::of::<Option<Id>>("user_id"),
                    FieldSchema::with_default::<Id>("span_id", Id::new),
                    FieldSchema::with_default::<Id>("trace_id", Id::new),
                    FieldSchema::with_default::<Map>("extra", Map::empty),
                    FieldSchema::with_default::<MsgClient>("client", MsgClient::default),
                ],
                |fields| {
                    Ok(MsgContext {
                        user_id: fields.take("user_id")?,
                        span_id: fields.take("span_id")?,
                        trace_id: fields.take("trace_id")?,
                        extra: fields.take("extra")?,
                        client: fields.take("client")?,
                    })
                },
            )
        }))
    }
}

/// The client application of the sender.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MsgClient {
    /// Address the request came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Preferred language, `en` by default.
    pub locale: Locale,
    /// Time zone, `UTC` by default.
    pub timezone: Timezone,
    /// Device details.
    pub device: MsgClientDevice,
}

impl Object for MsgClient {
    fn name() -> &'static str {
        "msg_client"
    }

    fn shape() -> Shape<Self> {
        Shape::Composite(Schema::cached(|| {
            Schema::new(
                vec![
                    FieldSchema::of::<Option<String>>("ip_address"),
                    FieldSchema::with_default::<Locale>("locale", Locale::default),
                    FieldSchema::with_default::<Timezone>("timezone", Timezone::default),
                    FieldSchema::with_default::<MsgClientDevice>(
                        "device",
                        MsgClientDevice::default,
                    ),
                ],
                |fields| {
                    Ok(MsgClient {
                        ip_address: fields.take("ip_address")?,
                        locale: fields.take("locale")?,
                        timezone: fields.take("timezone")?,
                        device: fields.take("device")?,
                    })
                },
            )
        }))
    }
}

/// The device of the sender.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MsgClientDevice {
    /// Device unique id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duid: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
}

impl Object for MsgClientDevice {
    fn name() -> &'static str {
        "msg_client_device"
    }

    fn shape() -> Shape<Self> {
        Shape::Composite(Schema::cached(|| {
            Schema::new(
                vec![
                    FieldSchema::of::<Option<Id>>("duid"),
                    FieldSchema::of::<Option<String>>("model"),
                    FieldSchema::of::<Option<String>>("brand"),
                    FieldSchema::of::<Option<String>>("os_name"),
                    FieldSchema::of::<Option<String>>("os_version"),
                ],
                |fields| {
                    Ok(MsgClientDevice {
                        duid: fields.take("duid")?,
                        model: fields.take("model")?,
                        brand: fields.take("brand")?,
                        os_name: fields.take("os_name")?,
                        os_version: fields.take("os_version")?,
                    })
                },
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping {
        count: u32,
    }

    impl Object for Ping {
        fn name() -> &'static str {
            "ping"
        }

        fn shape() -> Shape<Self> {
            Shape::Composite(Schema::cached(|| {
                Schema::new(vec![FieldSchema::of::<u32>("count")], |fields| {
                    Ok(Ping {
                        count: fields.take("count")?,
                    })
                })
            }))
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Empty;

    impl Object for Empty {
        fn name() -> &'static str {
            "empty"
        }

        fn shape() -> Shape<Self> {
            Shape::Composite(Schema::cached(|| Schema::new(Vec::new(), |_| Ok(Empty))))
        }
    }

    #[test]
    fn missing_ids_and_times_are_generated() {
        let message =
            Message::<Empty>::create(Some(json!({"name": "a.b", "source": "test"}))).unwrap();
        assert_eq!(message.name(), "a.b");
        assert_eq!(message.id().as_str().len(), 26);
        assert_eq!(message.context().client.locale.as_str(), "en");
        assert_eq!(message.context().client.timezone.as_str(), "UTC");
        assert!(message.context().user_id.is_none());
    }

    #[test]
    fn absent_payload_is_validated_as_empty_object() {
        let err =
            Message::<Ping>::create(Some(json!({"name": "a.b", "source": "test"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
        let payload = &err.errors()[0];
        assert_eq!(payload.field(), Some("payload"));
        assert_eq!(payload.errors()[0].field(), Some("count"));
    }

    #[test]
    fn equality_is_by_id() {
        let id = Id::new().to_string();
        let raw = json!({"name": "a", "source": "x", "id": id, "payload": {"count": 1}});
        let first = Message::<Ping>::from_raw(raw.clone()).unwrap();
        let mut other = raw;
        other["payload"]["count"] = json!(2);
        let second = Message::<Ping>::from_raw(other).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, Message::new("a", "x", Ping { count: 1 }));
    }

    #[test]
    fn serializes_created_at_as_millis() {
        let message = Message::new("a.b", "test", Empty);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["created_at"], json!(message.created_at().timestamp()));
        assert_eq!(value["id"], json!(message.id().as_str()));
        assert_eq!(value["context"]["trace_id"], json!(message.trace_id().unwrap()));
    }

    #[test]
    fn context_values_are_read() {
        let user = Id::new();
        let message = Message::<Empty>::from_raw(json!({
            "name": "a",
            "source": "x",
            "context": {
                "user_id": user.as_str(),
                "client": {"locale": "fr-FR", "device": {"brand": "acme"}},
            },
        }))
        .unwrap();
        assert_eq!(message.context().user_id.as_ref(), Some(&user));
        assert_eq!(message.context().client.locale.as_str(), "fr-fr");
        assert_eq!(message.context().client.device.brand.as_deref(), Some("acme"));
    }
}
