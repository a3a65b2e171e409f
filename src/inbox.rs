use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::identity::{IdentityCodec, IdentityError};
use crate::models::{PrimaryReply, ReplyThread};

/// Client-safe projection of a thread for one viewer. All MIDs are
/// replaced by `from_you` / `from_confessor` booleans and all content is
/// decrypted server-side; nothing here can link a message to an account.
#[derive(Debug, Serialize, ToSchema)]
pub struct ThreadView {
    pub confession_id: String,
    pub confession_content: String,
    pub confessor_gender: String,
    pub you_are_confessor: bool,
    pub replies: Vec<PrimaryReplyView>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PrimaryReplyView {
    pub id: String,
    pub content: String,
    pub replier_gender: String,
    pub from_you: bool,
    pub seen_by_you: bool,
    pub messages: Vec<MessageView>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageView {
    pub content: String,
    pub from_confessor: bool,
    pub from_you: bool,
    pub sender_gender: String,
    pub seen_by_you: bool,
    pub created_at: DateTime<Utc>,
}

/// Which primaries inside a thread concern this viewer: the confessor
/// sees every exchange, a replier only their own.
fn relevant<'a>(
    thread: &'a ReplyThread,
    viewer_mid: &'a str,
) -> impl Iterator<Item = &'a PrimaryReply> {
    let is_confessor = thread.confessor_mid == viewer_mid;
    thread
        .replies
        .iter()
        .filter(move |p| is_confessor || p.replier_mid == viewer_mid)
}

/// Read-time unread derivation for inbox badges. Counts every relevant
/// primary/secondary whose seen set lacks the viewer; no stored counter
/// to drift out of sync.
pub fn unread_count(threads: &[ReplyThread], viewer_mid: &str) -> usize {
    threads
        .iter()
        .map(|t| {
            relevant(t, viewer_mid)
                .map(|p| {
                    let primary_unread = usize::from(!p.seen.iter().any(|m| m == viewer_mid));
                    let secondary_unread = p
                        .secondary_replies
                        .iter()
                        .filter(|s| !s.seen.iter().any(|m| m == viewer_mid))
                        .count();
                    primary_unread + secondary_unread
                })
                .sum::<usize>()
        })
        .sum()
}

/// Project a thread for a viewer, decrypting content along the way.
/// A corrupted entry fails the whole projection; callers skip the thread
/// and keep serving the rest of the inbox.
pub fn thread_view(
    thread: &ReplyThread,
    viewer_mid: &str,
    codec: &IdentityCodec,
) -> Result<ThreadView, IdentityError> {
    let you_are_confessor = thread.confessor_mid == viewer_mid;
    let mut replies = Vec::new();
    for p in relevant(thread, viewer_mid) {
        let mut messages = Vec::new();
        for s in &p.secondary_replies {
            messages.push(MessageView {
                content: codec.open(&s.content)?,
                from_confessor: s.sent_by_confessor,
                from_you: s.sent_by == viewer_mid,
                sender_gender: s.sender_gender.clone(),
                seen_by_you: s.seen.iter().any(|m| m == viewer_mid),
                created_at: s.created_at,
            });
        }
        replies.push(PrimaryReplyView {
            id: p.id.clone(),
            content: codec.open(&p.content)?,
            replier_gender: p.replier_gender.clone(),
            from_you: p.replier_mid == viewer_mid,
            seen_by_you: p.seen.iter().any(|m| m == viewer_mid),
            messages,
            created_at: p.created_at,
        });
    }
    Ok(ThreadView {
        confession_id: thread.confession_id.clone(),
        confession_content: codec.open(&thread.confession_content)?,
        confessor_gender: thread.confessor_gender.clone(),
        you_are_confessor,
        replies,
        created_at: thread.created_at,
    })
}
