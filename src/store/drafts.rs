//! Email draft model and persistence.
//!
//! Drafts have a long-lived identity: they outlive the request that
//! created them and survive process restarts. Transitions between
//! lifecycle states run through [`EmailDraft::transition`], which enforces
//! the permitted-edge table; everything else is an invariant violation.
//!
//! The per-session `index.json` is an optimization only -- it is rebuilt
//! from a directory scan on every save, and operations that must be
//! authoritative (pending-approval scan, cross-session lookup) read the
//! `draft_*.json` files directly.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::{SessionStore, StoreError};

/// Draft lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Drafted,
    PendingApproval,
    Approved,
    Rejected,
    Scheduled,
    Sent,
    Failed,
}

impl DraftStatus {
    /// Terminal states permit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Rejected | Self::Failed)
    }

    /// Whether the draft is cleared for the send worker.
    pub fn is_sendable(self) -> bool {
        matches!(self, Self::Approved | Self::Scheduled)
    }

    /// Permitted-edge table. Self-transitions are allowed as no-ops.
    pub fn can_transition(self, to: DraftStatus) -> bool {
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Self::Drafted, Self::PendingApproval)
                | (Self::PendingApproval, Self::Approved)
                | (Self::PendingApproval, Self::Rejected)
                | (Self::Approved, Self::Scheduled)
                | (Self::Approved, Self::Sent)
                | (Self::Approved, Self::Failed)
                | (Self::Scheduled, Self::Sent)
                | (Self::Scheduled, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drafted => "drafted",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested writing tone for a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailTone {
    #[default]
    Professional,
    Friendly,
    Formal,
    Casual,
}

impl EmailTone {
    /// Parse from loose user input; unknown values fall back to professional.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "friendly" => Self::Friendly,
            "formal" => Self::Formal,
            "casual" => Self::Casual,
            _ => Self::Professional,
        }
    }
}

/// Draft priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// State-machine violations. These are programmer errors and are logged at
/// high severity by callers.
#[derive(Debug, Error)]
pub enum DraftError {
    #[error("illegal draft transition: {from} -> {to}")]
    IllegalTransition { from: DraftStatus, to: DraftStatus },
    #[error("draft {0} is in terminal state {1}")]
    Terminal(String, DraftStatus),
}

/// A persistent email draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<String>>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub tone: EmailTone,
    #[serde(default)]
    pub priority: EmailPriority,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_checks: Option<serde_json::Value>,
    /// Reviewer feedback recorded with the approve/reject decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_thread_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl EmailDraft {
    /// Fresh draft in `Drafted` state.
    pub fn new(
        session_id: &str,
        to: &str,
        subject: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            user_id: None,
            to: to.to_owned(),
            cc: None,
            bcc: None,
            subject: subject.to_owned(),
            body: body.to_owned(),
            tone: EmailTone::default(),
            priority: EmailPriority::default(),
            status: DraftStatus::Drafted,
            created_at: now,
            updated_at: now,
            approved_at: None,
            sent_at: None,
            conversation_context: None,
            ai_reasoning: None,
            safety_checks: None,
            approval_feedback: None,
            provider_message_id: None,
            provider_thread_id: None,
            retry_count: 0,
        }
    }

    /// Move to `to`, enforcing the permitted-edge table.
    ///
    /// A self-transition is a no-op. Transitions out of a terminal state
    /// report [`DraftError::Terminal`].
    pub fn transition(&mut self, to: DraftStatus, now: DateTime<Utc>) -> Result<(), DraftError> {
        if self.status == to {
            return Ok(());
        }
        if self.status.is_terminal() {
            return Err(DraftError::Terminal(self.id.clone(), self.status));
        }
        if !self.status.can_transition(to) {
            return Err(DraftError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        match to {
            DraftStatus::Approved => self.approved_at = Some(now),
            DraftStatus::Sent => self.sent_at = Some(now),
            _ => {}
        }
        Ok(())
    }
}

impl SessionStore {
    fn drafts_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("email_drafts")
    }

    fn draft_file(&self, session_id: &str, draft_id: &str) -> PathBuf {
        self.drafts_dir(session_id).join(format!("draft_{draft_id}.json"))
    }

    fn draft_index_file(&self, session_id: &str) -> PathBuf {
        self.drafts_dir(session_id).join("index.json")
    }

    /// Persist a draft and refresh the session's draft index.
    pub async fn save_draft(&self, draft: &EmailDraft) -> Result<(), StoreError> {
        let path = self.draft_file(&draft.session_id, &draft.id);
        self.write_json(&path, draft).await?;
        self.rebuild_draft_index(&draft.session_id).await?;
        info!(draft_id = %draft.id, session_id = %draft.session_id, status = %draft.status, "draft saved");
        Ok(())
    }

    /// Load a draft. With a session id the lookup is direct; without one
    /// every session is scanned.
    pub async fn get_draft(
        &self,
        draft_id: &str,
        session_id: Option<&str>,
    ) -> Result<EmailDraft, StoreError> {
        if let Some(session_id) = session_id {
            let path = self.draft_file(session_id, draft_id);
            return self
                .read_json(&path)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("draft {draft_id}")));
        }

        for session in self.session_ids().await? {
            let path = self.draft_file(&session, draft_id);
            if let Some(draft) = self.read_json::<EmailDraft>(&path).await? {
                return Ok(draft);
            }
        }
        Err(StoreError::NotFound(format!("draft {draft_id}")))
    }

    /// All drafts in a session, newest first, optionally filtered by status.
    pub async fn list_drafts(
        &self,
        session_id: &str,
        status: Option<DraftStatus>,
    ) -> Result<Vec<EmailDraft>, StoreError> {
        let mut drafts = Vec::new();
        for id in self.scan_draft_ids(session_id).await? {
            let path = self.draft_file(session_id, &id);
            match self.read_json::<EmailDraft>(&path).await {
                Ok(Some(draft)) => {
                    if status.is_none() || status == Some(draft.status) {
                        drafts.push(draft);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(draft_id = %id, error = %e, "skipping unreadable draft file"),
            }
        }
        drafts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(drafts)
    }

    /// Read-modify-write a draft inside its artifact's critical section.
    ///
    /// The mutation closure runs while the write lock is held, so a state
    /// change and its persistence are indivisible to other writers.
    pub async fn update_draft<F>(
        &self,
        draft_id: &str,
        session_id: Option<&str>,
        mutate: F,
    ) -> Result<EmailDraft, StoreError>
    where
        F: FnOnce(&mut EmailDraft) -> Result<(), DraftError> + Send,
    {
        // Resolve the owning session first when unknown.
        let session = match session_id {
            Some(id) => id.to_owned(),
            None => self.get_draft(draft_id, None).await?.session_id,
        };
        let path = self.draft_file(&session, draft_id);
        let lock = self.lock_for(&path).await;
        let _guard = lock.write().await;

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("draft {draft_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        let mut draft: EmailDraft = serde_json::from_slice(&bytes)?;
        mutate(&mut draft)?;

        let out = serde_json::to_vec_pretty(&draft)?;
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &out).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(draft)
    }

    /// Delete a draft and refresh the index.
    pub async fn delete_draft(
        &self,
        draft_id: &str,
        session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let draft = self.get_draft(draft_id, session_id).await?;
        let path = self.draft_file(&draft.session_id, draft_id);
        let lock = self.lock_for(&path).await;
        {
            let _guard = lock.write().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.rebuild_draft_index(&draft.session_id).await?;
        Ok(())
    }

    /// Every PendingApproval draft across all sessions, oldest first.
    ///
    /// Scans draft files directly (authoritative; ignores the index).
    pub async fn list_pending_approvals(&self) -> Result<Vec<EmailDraft>, StoreError> {
        let mut pending = Vec::new();
        for session in self.session_ids().await? {
            for id in self.scan_draft_ids(&session).await? {
                let path = self.draft_file(&session, &id);
                match self.read_json::<EmailDraft>(&path).await {
                    Ok(Some(draft)) if draft.status == DraftStatus::PendingApproval => {
                        pending.push(draft);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(draft_id = %id, error = %e, "skipping unreadable draft file");
                    }
                }
            }
        }
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    /// Delete terminal drafts (Sent, Rejected, Failed) whose last update is
    /// older than `days`. Non-terminal drafts are preserved indefinitely.
    pub async fn cleanup_old_drafts(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let cutoff = now
            .checked_sub_signed(chrono::TimeDelta::days(days))
            .unwrap_or(now);
        let mut deleted = 0usize;

        for session in self.session_ids().await? {
            let mut removed_any = false;
            for id in self.scan_draft_ids(&session).await? {
                let path = self.draft_file(&session, &id);
                let draft = match self.read_json::<EmailDraft>(&path).await {
                    Ok(Some(draft)) => draft,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(draft_id = %id, error = %e, "skipping unreadable draft file");
                        continue;
                    }
                };
                if draft.status.is_terminal() && draft.updated_at < cutoff {
                    let lock = self.lock_for(&path).await;
                    let _guard = lock.write().await;
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        deleted = deleted.saturating_add(1);
                        removed_any = true;
                    }
                }
            }
            if removed_any {
                self.rebuild_draft_index(&session).await?;
            }
        }
        if deleted > 0 {
            info!(deleted, "cleaned up old terminal drafts");
        }
        Ok(deleted)
    }

    /// Session ids present on disk.
    async fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.sessions_dir();
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_prefix("session-") {
                out.push(id.to_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Draft ids found by scanning `draft_*.json` files.
    async fn scan_draft_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.drafts_dir(session_id);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(rest) = name.strip_prefix("draft_") {
                if let Some(id) = rest.strip_suffix(".json") {
                    out.push(id.to_owned());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Rebuild `index.json` from the directory scan (creation order).
    async fn rebuild_draft_index(&self, session_id: &str) -> Result<(), StoreError> {
        let mut drafts = Vec::new();
        for id in self.scan_draft_ids(session_id).await? {
            let path = self.draft_file(session_id, &id);
            if let Some(draft) = self.read_json::<EmailDraft>(&path).await? {
                drafts.push((draft.created_at, draft.id));
            }
        }
        drafts.sort();
        let ids: Vec<String> = drafts.into_iter().map(|(_, id)| id).collect();
        self.write_json(&self.draft_index_file(session_id), &ids)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(session_id: &str) -> EmailDraft {
        EmailDraft::new(
            session_id,
            "bob@example.org",
            "Q4 review",
            "Hi Bob,\n\nLet's review Q4.\n\nBest",
            Utc::now(),
        )
    }

    // ── State machine ──

    #[test]
    fn test_happy_path_transitions() {
        let now = Utc::now();
        let mut d = draft("s1");
        assert_eq!(d.status, DraftStatus::Drafted);
        d.transition(DraftStatus::PendingApproval, now).expect("ok");
        d.transition(DraftStatus::Approved, now).expect("ok");
        assert_eq!(d.approved_at, Some(now));
        d.transition(DraftStatus::Sent, now).expect("ok");
        assert_eq!(d.sent_at, Some(now));
        assert!(d.status.is_terminal());
    }

    #[test]
    fn test_reject_path() {
        let now = Utc::now();
        let mut d = draft("s1");
        d.transition(DraftStatus::PendingApproval, now).expect("ok");
        d.transition(DraftStatus::Rejected, now).expect("ok");
        assert!(d.status.is_terminal());
        assert!(d.approved_at.is_none());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let now = Utc::now();
        let mut d = draft("s1");
        let result = d.transition(DraftStatus::Sent, now);
        assert!(
            matches!(result, Err(DraftError::IllegalTransition { .. })),
            "Drafted -> Sent must be rejected"
        );
        assert_eq!(d.status, DraftStatus::Drafted, "state unchanged on error");
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        let now = Utc::now();
        let mut d = draft("s1");
        d.transition(DraftStatus::PendingApproval, now).expect("ok");
        d.transition(DraftStatus::Approved, now).expect("ok");
        d.transition(DraftStatus::Sent, now).expect("ok");

        let result = d.transition(DraftStatus::Failed, now);
        assert!(matches!(result, Err(DraftError::Terminal(_, _))));
    }

    #[test]
    fn test_self_transition_is_noop() {
        let now = Utc::now();
        let mut d = draft("s1");
        d.transition(DraftStatus::PendingApproval, now).expect("ok");
        let before = d.updated_at;
        d.transition(DraftStatus::PendingApproval, now).expect("noop ok");
        assert_eq!(d.updated_at, before);
    }

    #[test]
    fn test_approved_to_failed() {
        let now = Utc::now();
        let mut d = draft("s1");
        d.transition(DraftStatus::PendingApproval, now).expect("ok");
        d.transition(DraftStatus::Approved, now).expect("ok");
        d.transition(DraftStatus::Failed, now).expect("ok");
        assert!(d.status.is_terminal());
        assert!(d.sent_at.is_none());
    }

    #[test]
    fn test_scheduled_is_sendable() {
        assert!(DraftStatus::Scheduled.is_sendable());
        assert!(DraftStatus::Approved.is_sendable());
        assert!(!DraftStatus::PendingApproval.is_sendable());
    }

    #[test]
    fn test_tone_parse_lenient() {
        assert_eq!(EmailTone::parse_lenient("Friendly"), EmailTone::Friendly);
        assert_eq!(EmailTone::parse_lenient("FORMAL"), EmailTone::Formal);
        assert_eq!(EmailTone::parse_lenient("whatever"), EmailTone::Professional);
    }

    // ── Persistence ──

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let d = draft("s1");
        store.save_draft(&d).await.expect("save");

        let loaded = store.get_draft(&d.id, Some("s1")).await.expect("get");
        assert_eq!(loaded.id, d.id);
        assert_eq!(loaded.to, d.to);
        assert_eq!(loaded.subject, d.subject);
        assert_eq!(loaded.body, d.body);
        assert_eq!(loaded.status, d.status);
        assert_eq!(loaded.created_at, d.created_at);
    }

    #[tokio::test]
    async fn test_get_draft_cross_session_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let d = draft("hidden-session");
        store.save_draft(&d).await.expect("save");

        let found = store.get_draft(&d.id, None).await.expect("search");
        assert_eq!(found.session_id, "hidden-session");
    }

    #[tokio::test]
    async fn test_get_missing_draft() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let result = store.get_draft("nope", Some("s1")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        let result = store.get_draft("nope", None).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_drafts_filter_and_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let mut a = draft("s1");
        a.created_at = Utc::now()
            .checked_sub_signed(chrono::TimeDelta::seconds(60))
            .expect("offset");
        let mut b = draft("s1");
        b.transition(DraftStatus::PendingApproval, Utc::now())
            .expect("ok");
        store.save_draft(&a).await.expect("save");
        store.save_draft(&b).await.expect("save");

        let all = store.list_drafts("s1", None).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, b.id, "newest first");

        let pending = store
            .list_drafts("s1", Some(DraftStatus::PendingApproval))
            .await
            .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }

    #[tokio::test]
    async fn test_update_draft_critical_section() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let mut d = draft("s1");
        d.transition(DraftStatus::PendingApproval, Utc::now())
            .expect("ok");
        store.save_draft(&d).await.expect("save");

        let now = Utc::now();
        let updated = store
            .update_draft(&d.id, Some("s1"), |draft| {
                draft.transition(DraftStatus::Approved, now)
            })
            .await
            .expect("update");
        assert_eq!(updated.status, DraftStatus::Approved);

        let reloaded = store.get_draft(&d.id, Some("s1")).await.expect("get");
        assert_eq!(reloaded.status, DraftStatus::Approved);
    }

    #[tokio::test]
    async fn test_update_draft_illegal_transition_not_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let d = draft("s1");
        store.save_draft(&d).await.expect("save");

        let now = Utc::now();
        let result = store
            .update_draft(&d.id, Some("s1"), |draft| {
                draft.transition(DraftStatus::Sent, now)
            })
            .await;
        assert!(matches!(result, Err(StoreError::Draft(_))));

        let reloaded = store.get_draft(&d.id, Some("s1")).await.expect("get");
        assert_eq!(reloaded.status, DraftStatus::Drafted, "bad write not persisted");
    }

    #[tokio::test]
    async fn test_delete_draft() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let d = draft("s1");
        store.save_draft(&d).await.expect("save");
        store.delete_draft(&d.id, None).await.expect("delete");

        let result = store.get_draft(&d.id, Some("s1")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_pending_approvals_across_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let mut a = draft("s1");
        a.transition(DraftStatus::PendingApproval, Utc::now())
            .expect("ok");
        let b = draft("s2"); // still Drafted
        let mut c = draft("s3");
        c.transition(DraftStatus::PendingApproval, Utc::now())
            .expect("ok");

        store.save_draft(&a).await.expect("save");
        store.save_draft(&b).await.expect("save");
        store.save_draft(&c).await.expect("save");

        let pending = store.list_pending_approvals().await.expect("scan");
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|d| d.status == DraftStatus::PendingApproval));
    }

    #[tokio::test]
    async fn test_cleanup_only_old_terminal_drafts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());
        let now = Utc::now();
        let old = now
            .checked_sub_signed(chrono::TimeDelta::days(45))
            .expect("offset");

        // Old terminal draft: eligible.
        let mut sent = draft("s1");
        sent.transition(DraftStatus::PendingApproval, old).expect("ok");
        sent.transition(DraftStatus::Approved, old).expect("ok");
        sent.transition(DraftStatus::Sent, old).expect("ok");
        store.save_draft(&sent).await.expect("save");

        // Old non-terminal draft: preserved indefinitely.
        let mut pending = draft("s1");
        pending
            .transition(DraftStatus::PendingApproval, old)
            .expect("ok");
        store.save_draft(&pending).await.expect("save");

        // Fresh terminal draft: preserved.
        let mut fresh = draft("s1");
        fresh.transition(DraftStatus::PendingApproval, now).expect("ok");
        fresh.transition(DraftStatus::Rejected, now).expect("ok");
        store.save_draft(&fresh).await.expect("save");

        let deleted = store.cleanup_old_drafts(30, now).await.expect("cleanup");
        assert_eq!(deleted, 1);

        assert!(store.get_draft(&sent.id, Some("s1")).await.is_err());
        assert!(store.get_draft(&pending.id, Some("s1")).await.is_ok());
        assert!(store.get_draft(&fresh.id, Some("s1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_index_rebuilt_from_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path());

        let a = draft("s1");
        let b = draft("s1");
        store.save_draft(&a).await.expect("save");
        store.save_draft(&b).await.expect("save");

        let index: Vec<String> = store
            .read_json(&store.draft_index_file("s1"))
            .await
            .expect("read")
            .expect("index exists");
        assert_eq!(index.len(), 2);
        assert!(index.contains(&a.id));
        assert!(index.contains(&b.id));

        store.delete_draft(&a.id, Some("s1")).await.expect("delete");
        let index: Vec<String> = store
            .read_json(&store.draft_index_file("s1"))
            .await
            .expect("read")
            .expect("index exists");
        assert_eq!(index, vec![b.id.clone()]);
    }
}
