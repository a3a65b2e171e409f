use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::identity::Sealed;

/// Uuid-v4 strings everywhere (confessions, primary replies).
pub type Id = String;

/// An anonymously authored post. The author's MID exists in storage only
/// as `encrypted_owner_mid` + `owner_iv`. Serialization here is the
/// storage shape and is full-fidelity (the snapshot backend round-trips
/// these structs); clients are served `ConfessionView` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confession {
    pub id: Id,
    pub content: String,
    pub college: String,
    pub gender: String,
    pub encrypted_owner_mid: String,
    pub owner_iv: String,
    /// MIDs that currently like this confession (toggle semantics).
    pub likes: Vec<String>,
    /// References to comment entities (owned by the comment subsystem).
    pub comments: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

impl Confession {
    pub fn like_count(&self) -> usize {
        self.likes.len()
    }
}

/// What API clients see of a confession: no ciphertext, no IV, no raw
/// like membership.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfessionView {
    pub id: Id,
    pub content: String,
    pub college: String,
    pub gender: String,
    pub like_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Confession> for ConfessionView {
    fn from(c: &Confession) -> Self {
        Self {
            id: c.id.clone(),
            content: c.content.clone(),
            college: c.college.clone(),
            gender: c.gender.clone(),
            like_count: c.like_count(),
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewConfession {
    pub content: String,
    pub college: String,
}

/// Outcome of an atomic like toggle.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LikeToggle {
    pub liked: bool,
    pub like_count: usize,
}

/// The whole anonymous exchange between one confession's owner and its
/// repliers. One document per (confession_id, confessor_mid); the
/// confessor MID is a lookup key only. None of these thread structs are
/// ever serialized to a client: the inbox projections in `inbox.rs` are
/// the outward shape, so storage keeps every field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyThread {
    pub id: Id,
    pub confession_id: Id,
    pub confessor_mid: String,
    pub confessor_gender: String,
    /// Denormalized copy of the confession text, sealed at rest, so the
    /// inbox never re-joins the confession aggregate.
    pub confession_content: Sealed,
    pub replies: Vec<PrimaryReply>,
    pub created_at: DateTime<Utc>,
}

/// First message from a given anonymous replier. At most one per
/// distinct replier MID within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryReply {
    pub id: Id,
    pub content: Sealed,
    pub replier_mid: String,
    pub replier_gender: String,
    /// MIDs that have viewed this message.
    pub seen: Vec<String>,
    pub secondary_replies: Vec<SecondaryReply>,
    pub created_at: DateTime<Utc>,
}

/// Every message after the first in a two-party exchange; sent either by
/// the confessor or by the original replier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryReply {
    pub content: Sealed,
    pub sent_by: String,
    pub sent_by_confessor: bool,
    pub sender_gender: String,
    pub seen: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for the atomic reply append. All identity fields are plain MIDs
/// here; they exist only in memory for the duration of the call.
#[derive(Debug, Clone)]
pub struct AppendReply {
    pub confession_id: Id,
    pub confessor_mid: String,
    pub confessor_gender: String,
    /// Sealed confession snapshot, used only when the thread is created.
    pub confession_content: Sealed,
    pub replier_mid: String,
    pub replier_gender: String,
    pub content: Sealed,
    pub sent_by: String,
    pub sent_by_confessor: bool,
    pub sender_gender: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    LikeMilestone,
    NewComment,
    NewDm,
    NewConfessionBroadcast,
}

/// Append-only record of a dispatched notification. The tuple
/// (recipient, kind, reference_id, milestone) is unique in every backend;
/// that constraint is the durable defense against double-sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub recipient: String,
    pub kind: NotificationKind,
    pub reference_id: Id,
    pub milestone: Option<u32>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SeenUpdate {
    /// False when every entry already carried the viewer (no-op).
    pub changed: bool,
}
