//! Shared types describing the updates delivered by an update source.
//!
//! An [`Update`] is an opaque event: the receiver only ever looks at its
//! [`UpdateId`], which orders updates, and its [`UpdateKind`], which is used for
//! filtering. Everything else is carried as an untyped JSON payload.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de, ser::SerializeMap};
use serde_json::Value;

/// Name of the identifier field in the wire representation of an [`Update`].
const UPDATE_ID_FIELD: &str = "update_id";

/// Identifier of an [`Update`].
///
/// Identifiers are assigned by the source and strictly increase over the lifetime of the source.
#[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
pub struct UpdateId(i64);

impl UpdateId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    /// The offset that acknowledges this update and every update before it.
    pub fn next_offset(&self) -> i64 {
        self.0.saturating_add(1)
    }
}

impl From<i64> for UpdateId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! update_kinds {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// The type tag of an [`Update`].
        ///
        /// Tags the source sends that are not listed here decode as [`UpdateKind::Unknown`] so
        /// newer sources keep working with this crate.
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub enum UpdateKind {
            $($variant,)+
            /// A tag this crate does not recognise.
            Unknown,
        }

        impl UpdateKind {
            /// Every recognised kind, in declaration order.
            pub const KNOWN: &'static [Self] = &[$(Self::$variant,)+];

            /// The name used for this kind on the wire.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown => "unknown",
                }
            }

            /// Map a wire name to a kind, falling back to [`UpdateKind::Unknown`].
            pub fn from_wire_name(name: &str) -> Self {
                match name {
                    $($wire => Self::$variant,)+
                    _ => Self::Unknown,
                }
            }
        }
    };
}

update_kinds! {
    Message => "message",
    EditedMessage => "edited_message",
    ChannelPost => "channel_post",
    EditedChannelPost => "edited_channel_post",
    BusinessConnection => "business_connection",
    BusinessMessage => "business_message",
    EditedBusinessMessage => "edited_business_message",
    DeletedBusinessMessages => "deleted_business_messages",
    MessageReaction => "message_reaction",
    MessageReactionCount => "message_reaction_count",
    InlineQuery => "inline_query",
    ChosenInlineResult => "chosen_inline_result",
    CallbackQuery => "callback_query",
    ShippingQuery => "shipping_query",
    PreCheckoutQuery => "pre_checkout_query",
    Poll => "poll",
    PollAnswer => "poll_answer",
    MyChatMember => "my_chat_member",
    ChatMember => "chat_member",
    ChatJoinRequest => "chat_join_request",
    ChatBoost => "chat_boost",
    RemovedChatBoost => "removed_chat_boost",
}

impl Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a recognised update kind")]
pub struct ParseUpdateKindError(String);

/// Strict parsing, used for configuration values.
///
/// Unlike [`UpdateKind::from_wire_name`], unrecognised names are rejected.
impl FromStr for UpdateKind {
    type Err = ParseUpdateKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::from_wire_name(s) {
            Self::Unknown => Err(ParseUpdateKindError(s.to_string())),
            kind => Ok(kind),
        }
    }
}

impl Serialize for UpdateKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UpdateKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_wire_name(&name))
    }
}

/// A single event delivered by an update source.
///
/// On the wire an update is an object holding `update_id` and one further field whose name is
/// the kind of the update and whose value is the payload:
///
/// ```
/// # use longpoll_types::{Update, UpdateKind};
/// let update: Update =
///     serde_json::from_str(r#"{"update_id": 7, "message": {"text": "hi"}}"#).unwrap();
/// assert_eq!(update.id().get(), 7);
/// assert_eq!(update.kind(), UpdateKind::Message);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    id: UpdateId,
    kind: UpdateKind,
    /// The field name the payload was found under, kept so that unknown kinds round-trip.
    field: String,
    payload: Value,
}

impl Update {
    pub fn new(id: impl Into<UpdateId>, kind: UpdateKind, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            field: kind.as_str().to_string(),
            payload,
        }
    }

    pub fn id(&self) -> UpdateId {
        self.id
    }

    pub fn kind(&self) -> UpdateKind {
        self.kind
    }

    /// The field name the payload was delivered under.
    ///
    /// This differs from `kind().as_str()` only for [`UpdateKind::Unknown`] updates.
    pub fn field_name(&self) -> &str {
        &self.field
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

impl Serialize for Update {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(UPDATE_ID_FIELD, &self.id)?;
        if !self.field.is_empty() {
            map.serialize_entry(&self.field, &self.payload)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Update {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut object = serde_json::Map::<String, Value>::deserialize(deserializer)?;

        let id = object
            .remove(UPDATE_ID_FIELD)
            .ok_or_else(|| de::Error::missing_field(UPDATE_ID_FIELD))?;
        let id = id
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("invalid {UPDATE_ID_FIELD}: {id}")))?;

        // Prefer a recognised field if the source sent more than one.
        let field = object
            .keys()
            .find(|name| UpdateKind::from_wire_name(name) != UpdateKind::Unknown)
            .or_else(|| object.keys().next())
            .cloned();

        let (field, payload) = match field {
            Some(field) => {
                let payload = object.remove(&field).unwrap_or(Value::Null);
                (field, payload)
            }
            None => (String::new(), Value::Null),
        };

        Ok(Self {
            id: UpdateId(id),
            kind: UpdateKind::from_wire_name(&field),
            field,
            payload,
        })
    }
}
