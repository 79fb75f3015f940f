//! Message and room data model.
//!
//! Content and metadata are passed through untouched. The only properties the
//! session relies on are the server-assigned [`MessageId`] (for dedup) and
//! `created_at` (for ordering).

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque passthrough metadata attached to a message.
pub type Metadata = BTreeMap<String, String>;

/// A chat scope that messages and connection state belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Room {
    /// The single community-wide broadcast room.
    Community,
    /// A group room.
    Group(String),
    /// An event room.
    Event(String),
}

impl Room {
    /// Key under which this room's queue is persisted.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Community => "queue:community".to_string(),
            Self::Group(id) => format!("queue:group:{id}"),
            Self::Event(id) => format!("queue:event:{id}"),
        }
    }

    /// Server-side subscription filter. `None` for the broadcast room.
    pub fn filter(&self) -> Option<&str> {
        match self {
            Self::Community => None,
            Self::Group(id) | Self::Event(id) => Some(id),
        }
    }

    /// True for the single unfiltered broadcast room.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Community)
    }

    /// Read status is tracked for every room except the broadcast room.
    pub fn supports_read_status(&self) -> bool {
        !self.is_broadcast()
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Community => write!(f, "community"),
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Event(id) => write!(f, "event:{id}"),
        }
    }
}

/// Server-assigned message id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Backend user id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Locally generated, stable id of an outbound message.
///
/// Rendered and serialized as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueItemId(u128);

impl QueueItemId {
    /// Wrap a raw 128-bit id.
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Raw 128-bit value.
    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl TryFrom<String> for QueueItemId {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        u128::from_str_radix(&value, 16).map(Self)
    }
}

impl From<QueueItemId> for String {
    fn from(value: QueueItemId) -> Self {
        value.to_string()
    }
}

/// Author display data, hydrated by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Backend user id.
    pub id: UserId,
    /// Display name, if the profile has one.
    pub display_name: Option<String>,
    /// Avatar URL, if the profile has one.
    pub avatar_url: Option<String>,
}

impl Author {
    /// Author with only an id (no display data yet).
    pub fn bare(id: UserId) -> Self {
        Self { id, display_name: None, avatar_url: None }
    }
}

/// A confirmed message with a server-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id. Unique within the visible list.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room: Room,
    /// Message text.
    pub content: String,
    /// Author with display data.
    pub author: Author,
    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
    /// Passthrough metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Insert payload for the backend's message table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Message text.
    pub content: String,
    /// Sending user.
    pub author_id: UserId,
    /// Target room.
    pub room: Room,
    /// Passthrough metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Minimal insert notification delivered by the push channel.
///
/// Not considered complete: the full message is re-fetched by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertNotice {
    /// Id of the inserted row.
    pub id: MessageId,
    /// Room of the inserted row.
    pub room: Room,
}

/// Room-scoped read marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatus {
    /// Time the user last read the room.
    pub last_read_at: DateTime<Utc>,
    /// Room being read.
    pub room: Room,
    /// Reading user.
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_are_namespaced_per_room() {
        assert_eq!(Room::Community.storage_key(), "queue:community");
        assert_eq!(Room::Group("g1".into()).storage_key(), "queue:group:g1");
        assert_eq!(Room::Event("e9".into()).storage_key(), "queue:event:e9");
    }

    #[test]
    fn broadcast_room_is_unfiltered() {
        assert_eq!(Room::Community.filter(), None);
        assert_eq!(Room::Group("g1".into()).filter(), Some("g1"));
        assert!(!Room::Community.supports_read_status());
        assert!(Room::Event("e1".into()).supports_read_status());
    }

    #[test]
    fn queue_item_id_round_trips_through_hex() {
        let id = QueueItemId::new(0xdead_beef);
        let text: String = id.into();
        assert_eq!(text, "000000000000000000000000deadbeef");
        assert_eq!(QueueItemId::try_from(text), Ok(id));
    }

    #[test]
    fn queue_item_id_rejects_garbage() {
        assert!(QueueItemId::try_from("not-hex".to_string()).is_err());
    }
}
