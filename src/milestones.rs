use std::sync::Arc;

use tracing::{debug, warn};

use crate::identity::IdentityCodec;
use crate::models::NotificationKind;
use crate::notify::{NotificationRequest, Notifier, NotifyOutcome};
use crate::repo::Repo;

/// Like-count thresholds that earn the confession owner a one-time email.
pub const LIKE_MILESTONES: [usize; 8] = [1, 5, 10, 25, 50, 100, 500, 1000];

pub fn is_milestone(count: usize) -> bool {
    LIKE_MILESTONES.contains(&count)
}

/// Subject + body for the like-milestone mail. Plain text only; no
/// identifying material beyond the confession id the owner already knows.
pub fn like_milestone_template(like_count: usize, confession_id: &str) -> (String, String) {
    let subject = format!("Your confession just hit {like_count} likes");
    let text = format!(
        "Someone out there relates. Your anonymous confession has reached \
         {like_count} likes.\n\nOpen your inbox to see how it is doing: \
         /confession/{confession_id}\n\nYou are receiving this because you \
         posted anonymously on Confide. We never reveal who you are."
    );
    (subject, text)
}

/// Milestone check run after a like lands. Called from a detached task:
/// every failure path here is terminal for the task only and is logged,
/// never surfaced to the liking user.
///
/// Unlike-then-relike across a milestone does not re-send; the
/// notification log already holds the tuple.
pub async fn run_like_milestone(
    repo: Arc<dyn Repo>,
    codec: Arc<IdentityCodec>,
    notifier: Arc<Notifier>,
    confession_id: String,
    like_count: usize,
) {
    if !is_milestone(like_count) {
        return;
    }
    debug!(confession_id = %confession_id, like_count, "like milestone reached");

    let confession = match repo.get_confession(&confession_id).await {
        Ok(c) => c,
        Err(e) => {
            warn!(confession_id = %confession_id, error = %e, "milestone: confession fetch failed");
            return;
        }
    };

    // transient plaintext; dropped as soon as the address is resolved
    let owner_mid = match codec.decrypt(&confession.encrypted_owner_mid, &confession.owner_iv) {
        Ok(mid) => mid,
        Err(_) => {
            warn!(confession_id = %confession_id, "milestone: owner identity unreadable, skipping");
            return;
        }
    };

    let Some(email) = repo.email_for_mid(&owner_mid).await else {
        debug!(confession_id = %confession_id, "milestone: no address for owner, skipping");
        return;
    };

    let (subject, text) = like_milestone_template(like_count, &confession_id);
    let outcome = notifier
        .notify_once(NotificationRequest {
            to: email,
            kind: NotificationKind::LikeMilestone,
            reference_id: confession_id.clone(),
            milestone: Some(like_count as u32),
            subject,
            text,
        })
        .await;
    if let NotifyOutcome::Failed(reason) = outcome {
        warn!(confession_id = %confession_id, like_count, %reason, "milestone notification failed");
    }
}

/// Detach the milestone check from the like handler's response path.
pub fn spawn_like_milestone(
    repo: Arc<dyn Repo>,
    codec: Arc<IdentityCodec>,
    notifier: Arc<Notifier>,
    confession_id: String,
    like_count: usize,
) {
    tokio::spawn(run_like_milestone(
        repo,
        codec,
        notifier,
        confession_id,
        like_count,
    ));
}
