//! Classified stream messages and the payload schema they wrap.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Result of classifying one decoded frame. Exactly one variant per frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamMessage {
    ContentItem(Payload<Tweet>),
    StatusEvent(Event),
    DirectMessage(Payload<DirectMessage>),
    ConnectionRoster(Payload<FriendList>),
    DeletionNotice(Payload<DeletedTweet>),
    StallWarning(Payload<StallWarning>),
    KeepAlive,
    /// Shape not recognised; the decoded value as received.
    Unrecognized(Value),
}

impl StreamMessage {
    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContentItem(_) => "content_item",
            Self::StatusEvent(_) => "status_event",
            Self::DirectMessage(_) => "direct_message",
            Self::ConnectionRoster(_) => "connection_roster",
            Self::DeletionNotice(_) => "deletion_notice",
            Self::StallWarning(_) => "stall_warning",
            Self::KeepAlive => "keep_alive",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Nested payload kept as raw JSON and parsed into `T` on first access.
/// Malformed data never fails classification; it fails `get()`.
pub struct Payload<T> {
    raw: Value,
    parsed: OnceLock<Result<T, Arc<serde_json::Error>>>,
}

/// Payload did not match its schema.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed payload: {0}")]
pub struct PayloadError(Arc<serde_json::Error>);

impl<T> Payload<T> {
    pub fn new(raw: Value) -> Self {
        Self {
            raw,
            parsed: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }
}

impl<T: DeserializeOwned> Payload<T> {
    /// Typed view, parsed once and cached.
    pub fn get(&self) -> Result<&T, PayloadError> {
        self.parsed
            .get_or_init(|| T::deserialize(&self.raw).map_err(Arc::new))
            .as_ref()
            .map_err(|e| PayloadError(e.clone()))
    }
}

impl<T> Clone for Payload<T> {
    fn clone(&self) -> Self {
        Self::new(self.raw.clone())
    }
}

impl<T> PartialEq for Payload<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> fmt::Debug for Payload<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.raw).finish()
    }
}

impl<T> Serialize for Payload<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub id_str: Option<String>,
    pub screen_name: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub followers_count: Option<u64>,
    pub friends_count: Option<u64>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: u64,
    pub id_str: Option<String>,
    pub text: Option<String>,
    pub full_text: Option<String>,
    pub created_at: Option<String>,
    pub user: Option<User>,
    pub in_reply_to_status_id: Option<u64>,
    pub in_reply_to_screen_name: Option<String>,
    pub retweeted_status: Option<Box<Tweet>>,
    pub quoted_status: Option<Box<Tweet>>,
    pub favorite_count: Option<u64>,
    pub retweet_count: Option<u64>,
    pub lang: Option<String>,
    #[serde(default)]
    pub truncated: bool,
}

impl Tweet {
    /// `full_text` when present, else `text`.
    pub fn body(&self) -> Option<&str> {
        self.full_text.as_deref().or(self.text.as_deref())
    }

    pub fn is_retweet(&self) -> bool {
        self.retweeted_status.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.in_reply_to_status_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: u64,
    pub text: Option<String>,
    pub created_at: Option<String>,
    pub sender: Option<User>,
    pub recipient: Option<User>,
    pub sender_id: Option<u64>,
    pub recipient_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub id: u64,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub full_name: Option<String>,
    pub mode: Option<String>,
    pub member_count: Option<u64>,
    pub subscriber_count: Option<u64>,
    pub user: Option<User>,
}

/// The `status` object of a deletion notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedTweet {
    pub id: u64,
    pub id_str: Option<String>,
    pub user_id: Option<u64>,
    pub user_id_str: Option<String>,
}

/// Server notice that the consumer is falling behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StallWarning {
    pub code: Option<String>,
    pub message: Option<String>,
    pub percent_full: Option<u32>,
}

/// Followed account ids sent at the start of a user stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FriendList(pub Vec<u64>);

/// Which shape an event's `target_object` takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    List,
    Content,
    Other,
}

/// Event names. Unknown names are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    ListCreated,
    ListDestroyed,
    ListUpdated,
    ListMemberAdded,
    ListMemberRemoved,
    ListUserSubscribed,
    ListUserUnsubscribed,
    Favorite,
    Unfavorite,
    QuotedTweet,
    FavoritedRetweet,
    RetweetedRetweet,
    Follow,
    Unfollow,
    Block,
    Unblock,
    Mute,
    Unmute,
    UserUpdate,
    AccessRevoked,
    Other(String),
}

const EVENT_NAMES: &[(&str, EventKind)] = &[
    ("list_created", EventKind::ListCreated),
    ("list_destroyed", EventKind::ListDestroyed),
    ("list_updated", EventKind::ListUpdated),
    ("list_member_added", EventKind::ListMemberAdded),
    ("list_member_removed", EventKind::ListMemberRemoved),
    ("list_user_subscribed", EventKind::ListUserSubscribed),
    ("list_user_unsubscribed", EventKind::ListUserUnsubscribed),
    ("favorite", EventKind::Favorite),
    ("unfavorite", EventKind::Unfavorite),
    ("quoted_tweet", EventKind::QuotedTweet),
    ("favorited_retweet", EventKind::FavoritedRetweet),
    ("retweeted_retweet", EventKind::RetweetedRetweet),
    ("follow", EventKind::Follow),
    ("unfollow", EventKind::Unfollow),
    ("block", EventKind::Block),
    ("unblock", EventKind::Unblock),
    ("mute", EventKind::Mute),
    ("unmute", EventKind::Unmute),
    ("user_update", EventKind::UserUpdate),
    ("access_revoked", EventKind::AccessRevoked),
];

impl EventKind {
    pub fn parse(name: &str) -> Self {
        EVENT_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| kind.clone())
            .unwrap_or_else(|| Self::Other(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        if let Self::Other(name) = self {
            return name;
        }
        EVENT_NAMES
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(n, _)| *n)
            .unwrap_or_default()
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::ListCreated
            | Self::ListDestroyed
            | Self::ListUpdated
            | Self::ListMemberAdded
            | Self::ListMemberRemoved
            | Self::ListUserSubscribed
            | Self::ListUserUnsubscribed => EventCategory::List,
            Self::Favorite
            | Self::Unfavorite
            | Self::QuotedTweet
            | Self::FavoritedRetweet
            | Self::RetweetedRetweet => EventCategory::Content,
            _ => EventCategory::Other,
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// `target_object`, interpreted per the event's category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TargetObject {
    List(Payload<List>),
    Tweet(Payload<Tweet>),
    None,
}

/// Status-change event (follow, favorite, list membership, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: EventKind,
    pub created_at: Option<String>,
    pub source: Option<Payload<User>>,
    pub target: Option<Payload<User>>,
    pub target_object: TargetObject,
}

impl Event {
    /// Build from an event envelope. Never fails; unexpected shapes degrade to `None` fields.
    pub fn from_object(mut object: serde_json::Map<String, Value>) -> Self {
        let name = match object.remove("event") {
            Some(Value::String(s)) => EventKind::parse(&s),
            Some(other) => EventKind::Other(other.to_string()),
            None => EventKind::Other(String::new()),
        };
        let created_at = match object.remove("created_at") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let source = object.remove("source").filter(Value::is_object).map(Payload::new);
        let target = object.remove("target").filter(Value::is_object).map(Payload::new);
        let target_object = match (name.category(), object.remove("target_object")) {
            (EventCategory::List, Some(v)) if v.is_object() => TargetObject::List(Payload::new(v)),
            (EventCategory::Content, Some(v)) if v.is_object() => {
                TargetObject::Tweet(Payload::new(v))
            }
            _ => TargetObject::None,
        };
        Self {
            name,
            created_at,
            source,
            target,
            target_object,
        }
    }
}
