//! Plangate core: preview/unlock gating for generated date plans.
//!
//! A content item starts locked. Callers see a preview plus an unlock
//! instruction chosen by a deterministic experiment arm, and the item moves to
//! unlocked exactly once: through a verified payment confirmation or through an
//! email submission on the email arm.

#![deny(unsafe_code)]

pub mod catalog;
pub mod checkout;
pub mod config;
pub mod email;
pub mod error;
pub mod experiment;
pub mod gate;
pub mod reconciler;
pub mod runtime;
pub mod signature;
pub mod storage;
pub mod types;

pub use catalog::{ContentCatalog, ContentEngine, GeneratedPlan, PlanBrief};
pub use checkout::{
    CheckoutLineItem, CheckoutProvider, CheckoutRequest, CheckoutSession, PaymentSessionManager,
    ProviderError, ProviderSession, METADATA_CONTENT_ID, METADATA_PRODUCT,
};
pub use config::{
    ConfigError, ExperimentConfig, GateConfig, PricingConfig, ProviderCredentials, WebhookSecret,
};
pub use email::{
    normalize_email, EmailCollectionService, EmailSubmission, SubmissionOutcome, SubmissionReason,
};
pub use error::GateError;
pub use experiment::ExperimentAssigner;
pub use gate::{
    ContentGateController, ContentPayload, ContentResponse, GateEndpoints, UnlockInstruction,
};
pub use reconciler::{
    ConfirmationReceipt, FulfillmentEffect, FulfillmentReconciler, PaymentEvent,
    EVENT_ASYNC_PAYMENT_SUCCEEDED, EVENT_SESSION_COMPLETED,
};
pub use runtime::{PlanGate, PlanGateDeps};
pub use signature::{WebhookVerifier, SIGNATURE_HEADER};
pub use storage::{bootstrap_storage, GateStorage, InMemoryGateStorage, StorageConfig, StorageError};
pub use types::{
    Arm, ContentItem, EmailCollectionRecord, EmailRecordKey, InsertOutcome, PaymentSessionRecord,
    PlanBody, PlanPreview, Subject, UnlockRecord, UnlockState, UnlockTransition, UnlockVia,
};
