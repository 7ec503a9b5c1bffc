//! Draft approval workflow.
//!
//! `request_approval` moves a draft to PendingApproval and records an
//! expiry (24 h by default). Decisions are validated against the current
//! status and persisted inside the same critical section as the state
//! change, so two concurrent approvals serialize and exactly one takes
//! effect. A periodic sweep rejects overdue approvals.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{DraftError, DraftStatus, EmailDraft, SessionStore, StoreError};
use crate::types::Clock;

/// Default approval expiry.
const APPROVAL_TIMEOUT_HOURS: i64 = 24;

/// A pending request for human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub draft_id: String,
    pub user_id: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub notified: bool,
}

/// A human decision on a pending draft.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub draft_id: String,
    pub user_id: String,
    pub approved: bool,
    pub feedback: Option<String>,
    pub decided_at: DateTime<Utc>,
    /// Field-level edits applied together with an approval.
    pub modifications: Option<BTreeMap<String, String>>,
}

/// Approval workflow errors.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("draft {0} not found")]
    NotFound(String),
    /// Decision arrived for a draft that is not awaiting approval.
    #[error("draft {draft_id} is not pending approval (status: {status})")]
    InvalidState {
        draft_id: String,
        status: DraftStatus,
    },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ApprovalError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}

/// Manages the draft approval lifecycle.
pub struct ApprovalWorkflow {
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    timeout: TimeDelta,
    pending: tokio::sync::Mutex<HashMap<String, ApprovalRequest>>,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            timeout: TimeDelta::hours(APPROVAL_TIMEOUT_HOURS),
            pending: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_timeout(store: Arc<SessionStore>, clock: Arc<dyn Clock>, timeout: TimeDelta) -> Self {
        Self {
            store,
            clock,
            timeout,
            pending: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Move a draft to PendingApproval and register its expiry.
    ///
    /// The notification is best-effort and out-of-band; here it is a log
    /// record an operator channel can tail.
    pub async fn request_approval(
        &self,
        draft_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = self.clock.now();
        let draft = self
            .store
            .update_draft(draft_id, Some(session_id), |draft| {
                draft.transition(DraftStatus::PendingApproval, now)
            })
            .await?;

        let expires_at = now.checked_add_signed(self.timeout).unwrap_or(now);
        let request = ApprovalRequest {
            draft_id: draft_id.to_owned(),
            user_id: user_id.to_owned(),
            requested_at: now,
            expires_at,
            notified: true,
        };
        self.pending
            .lock()
            .await
            .insert(draft_id.to_owned(), request.clone());

        info!(
            draft_id = %draft_id,
            to = %draft.to,
            subject = %draft.subject,
            expires_at = %expires_at,
            "approval requested"
        );
        Ok(request)
    }

    /// Apply a human decision.
    ///
    /// Approving an already-Approved draft is a no-op; any terminal state
    /// is an error. Storage is updated within the same critical section as
    /// the state change.
    pub async fn process_decision(
        &self,
        decision: &ApprovalDecision,
    ) -> Result<EmailDraft, ApprovalError> {
        let draft_id = decision.draft_id.clone();
        let approved = decision.approved;
        let feedback = decision.feedback.clone();
        let modifications = decision.modifications.clone();
        let decided_at = decision.decided_at;

        let result = self
            .store
            .update_draft(&draft_id, None, move |draft| {
                // Approve idempotence: already approved means nothing to do.
                if approved && draft.status == DraftStatus::Approved {
                    return Ok(());
                }
                if draft.status != DraftStatus::PendingApproval {
                    // Reuse the transition error shape for the invalid
                    // source state; mapped below.
                    return Err(DraftError::IllegalTransition {
                        from: draft.status,
                        to: if approved {
                            DraftStatus::Approved
                        } else {
                            DraftStatus::Rejected
                        },
                    });
                }

                if approved {
                    draft.transition(DraftStatus::Approved, decided_at)?;
                    if let Some(mods) = &modifications {
                        apply_decision_modifications(draft, mods);
                    }
                } else {
                    draft.transition(DraftStatus::Rejected, decided_at)?;
                }
                draft.approval_feedback = feedback;
                Ok(())
            })
            .await;

        let draft = match result {
            Ok(draft) => draft,
            Err(StoreError::Draft(DraftError::IllegalTransition { from, .. })) => {
                return Err(ApprovalError::InvalidState {
                    draft_id,
                    status: from,
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.pending.lock().await.remove(&draft.id);
        info!(
            draft_id = %draft.id,
            approved = decision.approved,
            status = %draft.status,
            "approval decision processed"
        );
        Ok(draft)
    }

    /// Internal approve used by the send shortcut.
    pub async fn auto_approve(
        &self,
        draft_id: &str,
        feedback: &str,
    ) -> Result<EmailDraft, ApprovalError> {
        warn!(draft_id = %draft_id, "auto-approving draft without human review");
        let decision = ApprovalDecision {
            draft_id: draft_id.to_owned(),
            user_id: "system".to_owned(),
            approved: true,
            feedback: Some(feedback.to_owned()),
            decided_at: self.clock.now(),
            modifications: None,
        };
        self.process_decision(&decision).await
    }

    /// Reject every overdue PendingApproval draft. Returns the count.
    ///
    /// The persisted drafts are authoritative: after a restart the
    /// in-memory request map is empty, so the expiry falls back to the
    /// draft's `updated_at` (the moment it became PendingApproval).
    pub async fn expire_overdue(&self) -> Result<usize, ApprovalError> {
        let now = self.clock.now();
        let pending_drafts = self.store.list_pending_approvals().await?;
        let mut expired = 0usize;

        for draft in pending_drafts {
            let deadline = {
                let map = self.pending.lock().await;
                map.get(&draft.id).map(|r| r.expires_at).unwrap_or_else(|| {
                    draft
                        .updated_at
                        .checked_add_signed(self.timeout)
                        .unwrap_or(draft.updated_at)
                })
            };
            if now <= deadline {
                continue;
            }

            let outcome = self
                .store
                .update_draft(&draft.id, Some(&draft.session_id), |draft| {
                    if draft.status != DraftStatus::PendingApproval {
                        // Raced with a decision; leave it alone.
                        return Ok(());
                    }
                    draft.transition(DraftStatus::Rejected, now)
                })
                .await;
            match outcome {
                Ok(updated) if updated.status == DraftStatus::Rejected => {
                    self.pending.lock().await.remove(&draft.id);
                    expired = expired.saturating_add(1);
                    info!(draft_id = %draft.id, "approval request expired");
                }
                Ok(_) => {}
                Err(e) => warn!(draft_id = %draft.id, error = %e, "failed to expire approval"),
            }
        }

        if expired > 0 {
            info!(expired, "expired overdue approval requests");
        }
        Ok(expired)
    }

    /// Pending requests, optionally filtered by user.
    pub async fn pending_requests(&self, user_id: Option<&str>) -> Vec<ApprovalRequest> {
        let map = self.pending.lock().await;
        map.values()
            .filter(|r| user_id.is_none_or(|u| r.user_id == u))
            .cloned()
            .collect()
    }
}

/// Field edits carried on an approval decision. `status=scheduled` defers
/// the send; everything else edits addressable draft fields.
fn apply_decision_modifications(draft: &mut EmailDraft, mods: &BTreeMap<String, String>) {
    for (field, value) in mods {
        match field.as_str() {
            "to" => draft.to = value.clone(),
            "subject" => draft.subject = value.clone(),
            "body" => draft.body = value.clone(),
            "status" if value == "scheduled" => {
                // Approved -> Scheduled is a permitted edge.
                let _ignored = draft.transition(DraftStatus::Scheduled, draft.updated_at);
            }
            other => warn!(field = other, "ignoring unknown decision modification field"),
        }
    }
}
