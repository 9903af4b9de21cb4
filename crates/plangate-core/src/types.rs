use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Experiment arm deciding which unlock condition a subject is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arm {
    PaymentGate,
    EmailGate,
}

impl Arm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PaymentGate => "payment_gate",
            Self::EmailGate => "email_gate",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of an unlock transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockVia {
    Payment,
    Email,
}

impl UnlockVia {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Email => "email",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "payment" => Some(Self::Payment),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

/// Persisted proof that a content item was unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub content_id: String,
    pub unlocked_via: UnlockVia,
    pub unlocked_at: DateTime<Utc>,
}

/// Unlock state of a content item.
///
/// Storage represents `Locked` as the absence of an [`UnlockRecord`], so the
/// only possible transition is `Locked -> Unlocked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnlockState {
    Locked,
    Unlocked(UnlockRecord),
}

impl UnlockState {
    pub fn from_record(record: Option<UnlockRecord>) -> Self {
        match record {
            Some(record) => Self::Unlocked(record),
            None => Self::Locked,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked(_))
    }
}

/// Result of an atomic "set unlocked if currently locked".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockTransition {
    /// This call performed the `locked -> unlocked` transition.
    Transitioned(UnlockRecord),
    /// The item was already unlocked; the existing record is returned untouched.
    AlreadyUnlocked(UnlockRecord),
}

impl UnlockTransition {
    pub fn record(&self) -> &UnlockRecord {
        match self {
            Self::Transitioned(record) | Self::AlreadyUnlocked(record) => record,
        }
    }

    pub fn transitioned(&self) -> bool {
        matches!(self, Self::Transitioned(_))
    }
}

/// Cheap teaser rendered for every caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanPreview(pub serde_json::Value);

/// Full generated plan body, released only after unlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanBody(pub serde_json::Value);

/// Generated content bundle. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub content_id: String,
    pub preview: PlanPreview,
    pub full: PlanBody,
    pub created_at: DateTime<Utc>,
}

/// Who submitted an email for a content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Subject {
    /// Caller-supplied stable subject identifier.
    Known(String),
    /// Anonymous flow. All anonymous callers of a content item share one key.
    Anonymous,
}

impl Subject {
    pub fn storage_key(&self) -> String {
        match self {
            Self::Known(id) => format!("subject:{id}"),
            Self::Anonymous => "anon".to_string(),
        }
    }

    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Self::Known(id) => Some(id),
            Self::Anonymous => None,
        }
    }
}

/// Idempotency key for email capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmailRecordKey {
    pub content_id: String,
    pub subject: Subject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailCollectionRecord {
    pub key: EmailRecordKey,
    pub email: String,
    pub arm: Arm,
    pub captured_at: DateTime<Utc>,
}

/// Result of an atomic "insert if absent".
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    AlreadyPresent(T),
}

impl<T> InsertOutcome<T> {
    pub fn inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Inserted(value) | Self::AlreadyPresent(value) => value,
        }
    }
}

/// Checkout session as acknowledged by the payment provider.
///
/// Only written after the provider confirmed creation; terminal states are
/// never tracked here, they arrive through the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSessionRecord {
    pub session_id: String,
    pub content_id: String,
    pub product: String,
    pub amount_minor: u64,
    pub currency: String,
    pub redirect_url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_serializes_as_snake_case_label() {
        let value = serde_json::to_value(Arm::EmailGate).unwrap();
        assert_eq!(value, serde_json::json!("email_gate"));
        assert_eq!(Arm::PaymentGate.to_string(), "payment_gate");
    }

    #[test]
    fn unlock_state_is_tagged() {
        let state = UnlockState::Unlocked(UnlockRecord {
            content_id: "plan-1".to_string(),
            unlocked_via: UnlockVia::Email,
            unlocked_at: Utc::now(),
        });
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["state"], "unlocked");
        assert_eq!(value["unlocked_via"], "email");

        let locked = serde_json::to_value(UnlockState::Locked).unwrap();
        assert_eq!(locked["state"], "locked");
    }

    #[test]
    fn subject_storage_keys_do_not_collide() {
        let known = Subject::Known("anon".to_string());
        assert_ne!(known.storage_key(), Subject::Anonymous.storage_key());
        assert_eq!(Subject::Anonymous.subject_id(), None);
    }
}
