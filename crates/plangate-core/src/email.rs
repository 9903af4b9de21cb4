use crate::error::GateError;
use crate::experiment::ExperimentAssigner;
use crate::storage::GateStorage;
use crate::types::{Arm, EmailCollectionRecord, EmailRecordKey, Subject, UnlockVia};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

const MAX_EMAIL_LEN: usize = 254;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .unwrap_or_else(|e| panic!("email pattern must compile: {e}"))
});

/// Why an accepted submission did or did not unlock content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionReason {
    /// Subject is on the payment arm: the email is kept for outreach only.
    RecordedNotUnlocking,
    /// Same subject already submitted for this content.
    AlreadyRecorded,
}

impl SubmissionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecordedNotUnlocking => "recorded_not_unlocking",
            Self::AlreadyRecorded => "already_recorded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSubmission {
    pub content_id: String,
    pub email: String,
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub accepted: bool,
    pub arm: Arm,
    /// Content is unlocked after this call (by this or an earlier transition).
    pub unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SubmissionReason>,
}

/// Validates an address and returns its normalized (trimmed, lowercased) form.
pub fn normalize_email(email: &str) -> Result<String, GateError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(GateError::invalid_input("email is required"));
    }
    if email.len() > MAX_EMAIL_LEN || !EMAIL_PATTERN.is_match(email) {
        return Err(GateError::invalid_input("email address is not valid"));
    }
    Ok(email.to_ascii_lowercase())
}

/// Records email submissions and applies the email-arm unlock.
pub struct EmailCollectionService {
    storage: Arc<dyn GateStorage>,
    assigner: ExperimentAssigner,
}

impl EmailCollectionService {
    pub fn new(storage: Arc<dyn GateStorage>, assigner: ExperimentAssigner) -> Self {
        Self { storage, assigner }
    }

    pub async fn submit(&self, submission: EmailSubmission) -> Result<SubmissionOutcome, GateError> {
        let content_id = submission.content_id.trim();
        if content_id.is_empty() {
            return Err(GateError::invalid_input("content_id is required"));
        }
        let email = normalize_email(&submission.email)?;
        let subject_id = submission
            .subject_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        if self.storage.get_content(content_id).await?.is_none() {
            return Err(GateError::content_not_found(content_id));
        }

        let arm = self.assigner.assign(subject_id, content_id);
        let subject = match subject_id {
            Some(id) => Subject::Known(id.to_string()),
            None => Subject::Anonymous,
        };

        let outcome = self
            .storage
            .insert_email_if_absent(EmailCollectionRecord {
                key: EmailRecordKey {
                    content_id: content_id.to_string(),
                    subject,
                },
                email,
                arm,
                captured_at: Utc::now(),
            })
            .await?;
        let first_submission = outcome.inserted();

        if arm == Arm::PaymentGate {
            debug!(content_id, first_submission, "email recorded on payment arm");
            let unlocked = self.storage.get_unlock(content_id).await?.is_some();
            return Ok(SubmissionOutcome {
                accepted: true,
                arm,
                unlocked,
                reason: Some(SubmissionReason::RecordedNotUnlocking),
            });
        }

        // Re-asserted on duplicates as well; the store guarantees a single transition.
        let transition = self
            .storage
            .set_unlocked_if_locked(content_id, UnlockVia::Email, Utc::now())
            .await?;
        if transition.transitioned() {
            info!(content_id, via = "email", "content unlocked");
        }

        Ok(SubmissionOutcome {
            accepted: true,
            arm,
            unlocked: true,
            reason: (!first_submission).then_some(SubmissionReason::AlreadyRecorded),
        })
    }
}
