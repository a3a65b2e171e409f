use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::mailer::Mailer;
use crate::models::{NotificationKind, NotificationLog};
use crate::repo::{NotificationLogRepo, RepoError};

/// Every way a notify attempt can resolve. `Suppressed` is a successful
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Suppressed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub to: String,
    pub kind: NotificationKind,
    pub reference_id: String,
    /// Required when `kind` is milestone-based.
    pub milestone: Option<u32>,
    pub subject: String,
    pub text: String,
}

/// Gate in front of the mail capability: at most one delivery per
/// (recipient, kind, reference_id, milestone) tuple, ever.
///
/// Both collaborators are injected so tests can substitute fakes; there is
/// no ambient transporter or global log handle.
pub struct Notifier {
    logs: Arc<dyn NotificationLogRepo>,
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(logs: Arc<dyn NotificationLogRepo>, mailer: Arc<dyn Mailer>) -> Self {
        Self { logs, mailer }
    }

    /// Send unless this exact tuple has been sent before.
    ///
    /// Never returns `Err` and never panics past this boundary: callers
    /// fire it from detached tasks as a side effect of user-facing
    /// actions, and a failure here must not fail those actions.
    ///
    /// A failed delivery is NOT logged, so a later retry of the same tuple
    /// is not permanently suppressed. The store's unique constraint, not
    /// the upfront lookup, is what makes concurrent duplicates impossible:
    /// a `Conflict` from the insert is reported as `Suppressed`.
    pub async fn notify_once(&self, req: NotificationRequest) -> NotifyOutcome {
        if req.to.is_empty() || req.reference_id.is_empty() {
            warn!(kind = ?req.kind, "notification dropped: missing recipient or reference");
            return NotifyOutcome::Failed("missing recipient or reference".into());
        }
        if req.kind == NotificationKind::LikeMilestone && req.milestone.is_none() {
            warn!(reference_id = %req.reference_id, "milestone notification without milestone");
            return NotifyOutcome::Failed("milestone missing".into());
        }

        // cheap pre-check; the insert below is the real guard
        match self
            .logs
            .find_log(&req.to, req.kind, &req.reference_id, req.milestone)
            .await
        {
            Ok(Some(_)) => {
                info!(
                    kind = ?req.kind,
                    reference_id = %req.reference_id,
                    "duplicate suppressed"
                );
                return NotifyOutcome::Suppressed;
            }
            Ok(None) => {}
            Err(e) => return NotifyOutcome::Failed(format!("log lookup: {e}")),
        }

        if let Err(e) = self.mailer.send(&req.to, &req.subject, &req.text).await {
            warn!(
                kind = ?req.kind,
                reference_id = %req.reference_id,
                error = %e,
                "notification delivery failed"
            );
            return NotifyOutcome::Failed(e.to_string());
        }

        match self
            .logs
            .insert_log(NotificationLog {
                recipient: req.to.clone(),
                kind: req.kind,
                reference_id: req.reference_id.clone(),
                milestone: req.milestone,
                sent_at: Utc::now(),
            })
            .await
        {
            Ok(()) => {
                info!(kind = ?req.kind, reference_id = %req.reference_id, "notification sent");
                NotifyOutcome::Sent
            }
            // lost the race: someone else recorded this tuple first
            Err(RepoError::Conflict) => NotifyOutcome::Suppressed,
            Err(e) => {
                warn!(
                    kind = ?req.kind,
                    reference_id = %req.reference_id,
                    error = %e,
                    "notification sent but log write failed"
                );
                NotifyOutcome::Failed(format!("log write: {e}"))
            }
        }
    }
}
