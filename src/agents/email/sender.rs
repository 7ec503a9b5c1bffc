//! Email send worker.
//!
//! Layers at-most-once semantics over the non-idempotent mail `send`:
//! a per-draft mutex spans the whole status-check -> send -> persist
//! critical section, so a second concurrent send observes Sent and
//! refuses. Transient failures (guaranteed not delivered) retry up to
//! three times with a 5-second pause; a permanent or ambiguous outcome
//! marks the draft Failed and requires a human re-send.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::mail::{MailClient, OutgoingEmail, SendReceipt};
use crate::clients::ProviderError;
use crate::store::{DraftStatus, EmailDraft, SessionStore, StoreError};
use crate::types::Clock;

/// Retries after the first attempt.
const MAX_RETRIES: u32 = 3;

/// Pause between retries.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Send failures.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("draft {0} not found")]
    NotFound(String),
    /// Send attempted on a draft that is not cleared for sending.
    #[error("draft {draft_id} must be approved before sending (current status: {status})")]
    NotApproved {
        draft_id: String,
        status: DraftStatus,
    },
    /// Send attempted on a terminally-settled draft.
    #[error("draft {draft_id} is already {status}")]
    Terminal {
        draft_id: String,
        status: DraftStatus,
    },
    #[error(transparent)]
    Provider(ProviderError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SendError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}

/// Sends approved drafts through the mail client.
pub struct SendWorker {
    mail: Arc<dyn MailClient>,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    send_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SendWorker {
    pub fn new(mail: Arc<dyn MailClient>, store: Arc<SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            mail,
            store,
            clock,
            send_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, draft_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.send_locks.lock().await;
        Arc::clone(locks.entry(draft_id.to_owned()).or_default())
    }

    /// Send a draft that is Approved (or Scheduled).
    ///
    /// On success the Sent status and provider ids are persisted before
    /// returning. Once the wire has possibly been reached, the critical
    /// section is never re-entered: retries happen only for failures the
    /// taxonomy guarantees were not delivered.
    pub async fn send_draft(
        &self,
        draft_id: &str,
        session_id: Option<&str>,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<EmailDraft, SendError> {
        let lock = self.lock_for(draft_id).await;
        let _guard = lock.lock().await;

        let draft = self.store.get_draft(draft_id, session_id).await?;
        if draft.status == DraftStatus::Sent {
            return Err(SendError::Terminal {
                draft_id: draft_id.to_owned(),
                status: draft.status,
            });
        }
        if draft.status.is_terminal() {
            return Err(SendError::Terminal {
                draft_id: draft_id.to_owned(),
                status: draft.status,
            });
        }
        if !draft.status.is_sendable() {
            return Err(SendError::NotApproved {
                draft_id: draft_id.to_owned(),
                status: draft.status,
            });
        }

        let outgoing = OutgoingEmail {
            to: draft.to.clone(),
            cc: draft.cc.clone().unwrap_or_default(),
            bcc: draft.bcc.clone().unwrap_or_default(),
            subject: draft.subject.clone(),
            body: draft.body.clone(),
        };
        let session = draft.session_id.clone();

        let mut attempt: u32 = 0;
        loop {
            info!(
                draft_id = %draft_id,
                attempt = attempt.saturating_add(1),
                max = MAX_RETRIES.saturating_add(1),
                "sending email"
            );

            match self.mail.send(token, &outgoing, cancel).await {
                Ok(receipt) => {
                    return self
                        .record_sent(draft_id, &session, receipt, attempt)
                        .await;
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = match &e {
                        ProviderError::RateLimited {
                            retry_after: Some(suggested),
                        } => (*suggested).max(RETRY_DELAY),
                        _ => RETRY_DELAY,
                    };
                    warn!(draft_id = %draft_id, error = %e, delay_secs = delay.as_secs(), "send failed, retrying");
                    tokio::time::sleep(delay).await;
                    if cancel.is_cancelled() {
                        // Nothing was delivered; the draft stays sendable.
                        return Err(SendError::Provider(ProviderError::Cancelled));
                    }
                    attempt = attempt.saturating_add(1);
                }
                Err(e) if e.is_retryable() => {
                    // Retries exhausted.
                    self.record_failed(draft_id, &session, attempt).await;
                    return Err(SendError::Provider(e));
                }
                Err(ProviderError::Permanent(msg)) => {
                    self.record_failed(draft_id, &session, attempt).await;
                    return Err(SendError::Provider(ProviderError::Permanent(msg)));
                }
                Err(other) => {
                    // Auth problems, cancellation, missing entities: the
                    // draft remains sendable once the condition clears.
                    return Err(SendError::Provider(other));
                }
            }
        }
    }

    /// Persist Sent + provider ids. A persistence failure after provider
    /// success marks Failed: at-most-once dominates, a human re-sends.
    async fn record_sent(
        &self,
        draft_id: &str,
        session_id: &str,
        receipt: SendReceipt,
        retries: u32,
    ) -> Result<EmailDraft, SendError> {
        let now = self.clock.now();
        let outcome = self
            .store
            .update_draft(draft_id, Some(session_id), move |draft| {
                draft.transition(DraftStatus::Sent, now)?;
                draft.provider_message_id = Some(receipt.provider_message_id.clone());
                draft.provider_thread_id = Some(receipt.provider_thread_id.clone());
                draft.retry_count = retries;
                Ok(())
            })
            .await;

        match outcome {
            Ok(draft) => {
                info!(
                    draft_id = %draft_id,
                    provider_message_id = draft.provider_message_id.as_deref().unwrap_or(""),
                    "email sent"
                );
                Ok(draft)
            }
            Err(e) => {
                error!(
                    draft_id = %draft_id,
                    error = %e,
                    "provider accepted the send but the Sent state could not be persisted"
                );
                self.record_failed(draft_id, session_id, retries).await;
                Err(e.into())
            }
        }
    }

    async fn record_failed(&self, draft_id: &str, session_id: &str, retries: u32) {
        let now = self.clock.now();
        let outcome = self
            .store
            .update_draft(draft_id, Some(session_id), move |draft| {
                draft.transition(DraftStatus::Failed, now)?;
                draft.retry_count = retries;
                Ok(())
            })
            .await;
        if let Err(e) = outcome {
            error!(draft_id = %draft_id, error = %e, "failed to record Failed status");
        }
    }
}
