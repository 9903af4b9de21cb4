use async_trait::async_trait;
use chrono::Utc;
use plangate_core::storage::{EmailRecordStore, PaymentSessionStore, UnlockStore};
use plangate_core::{
    Arm, CheckoutProvider, CheckoutRequest, ContentEngine, EmailSubmission, ExperimentConfig,
    FulfillmentEffect, GateConfig, GateEndpoints, GateError, GeneratedPlan, InMemoryGateStorage,
    PlanBody, PlanBrief, PlanGate, PlanGateDeps, PlanPreview, ProviderError, ProviderSession,
    SubmissionReason, UnlockVia, WebhookSecret, EVENT_SESSION_COMPLETED,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SUBJECT: &str = "user-9";
const CONTENT: &str = "plan-1";

struct StaticEngine;

#[async_trait]
impl ContentEngine for StaticEngine {
    fn engine_id(&self) -> &'static str {
        "static"
    }

    async fn generate(&self, brief: &PlanBrief) -> Result<GeneratedPlan, GateError> {
        Ok(GeneratedPlan {
            preview: PlanPreview(json!({ "title": brief.title, "teaser": "three stops" })),
            full: PlanBody(json!({ "title": brief.title, "stops": ["gallery", "ramen", "jazz"] })),
        })
    }
}

#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl CheckoutProvider for CountingProvider {
    fn provider_id(&self) -> &'static str {
        "counting"
    }

    async fn create_session(
        &self,
        _request: &CheckoutRequest,
    ) -> Result<ProviderSession, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderSession {
            session_id: format!("cs_scenario_{n}"),
            redirect_url: format!("https://checkout.test/{n}"),
        })
    }
}

struct StalledProvider;

#[async_trait]
impl CheckoutProvider for StalledProvider {
    fn provider_id(&self) -> &'static str {
        "stalled"
    }

    async fn create_session(
        &self,
        _request: &CheckoutRequest,
    ) -> Result<ProviderSession, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProviderError::Transport("never answers".to_string()))
    }
}

struct Harness {
    storage: Arc<InMemoryGateStorage>,
    gate: PlanGate,
}

async fn harness(ratio: f64, provider: Arc<dyn CheckoutProvider>) -> Harness {
    let storage = Arc::new(InMemoryGateStorage::new());
    let config = GateConfig {
        experiment: ExperimentConfig {
            email_gate_ratio: ratio,
        },
        provider_timeout: Duration::from_millis(250),
        ..GateConfig::default()
    };
    let gate = PlanGate::bootstrap(
        config,
        PlanGateDeps {
            storage: storage.clone(),
            provider,
            engine: Arc::new(StaticEngine),
            webhook_secret: WebhookSecret::new(SecretString::from("whsec_scenario_secret")).unwrap(),
            publishable_key: "pk_test_scenario".to_string(),
            endpoints: GateEndpoints::default(),
        },
    )
    .unwrap();

    gate.catalog()
        .create(
            &PlanBrief {
                title: Some("Friday in Kyoto".to_string()),
                ..PlanBrief::default()
            },
            Some(CONTENT.to_string()),
        )
        .await
        .unwrap();

    Harness { storage, gate }
}

fn completed_event(content_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_scenario",
        "type": EVENT_SESSION_COMPLETED,
        "data": { "object": {
            "id": "cs_scenario_1",
            "payment_status": "paid",
            "metadata": { "content_id": content_id, "product": "date_plan" }
        } }
    }))
    .unwrap()
}

fn submission(email: &str) -> EmailSubmission {
    EmailSubmission {
        content_id: CONTENT.to_string(),
        email: email.to_string(),
        subject_id: Some(SUBJECT.to_string()),
    }
}

#[tokio::test]
async fn email_arm_submission_unlocks_full_plan() {
    let h = harness(1.0, Arc::new(CountingProvider::default())).await;

    let before = h.gate.controller().request_content(CONTENT, Some(SUBJECT)).await.unwrap();
    assert_eq!(before.arm, Some(Arm::EmailGate));
    assert!(!before.payload.is_full());

    let outcome = h.gate.email().submit(submission("a@example.com")).await.unwrap();
    assert!(outcome.accepted);
    assert!(outcome.unlocked);

    let after = h.gate.controller().request_content(CONTENT, Some(SUBJECT)).await.unwrap();
    assert!(after.payload.is_full());
    assert!(after.unlock_instruction.is_none());
}

#[tokio::test]
async fn payment_arm_stays_locked_until_verified_confirmation() {
    let h = harness(0.0, Arc::new(CountingProvider::default())).await;

    let outcome = h.gate.email().submit(submission("a@example.com")).await.unwrap();
    assert!(outcome.accepted);
    assert_eq!(outcome.reason, Some(SubmissionReason::RecordedNotUnlocking));

    let response = h.gate.controller().request_content(CONTENT, Some(SUBJECT)).await.unwrap();
    assert!(!response.payload.is_full());
    assert_eq!(response.arm, Some(Arm::PaymentGate));

    let session = h
        .gate
        .payments()
        .create_session(CONTENT, "https://app.test/ok", "https://app.test/cancel")
        .await
        .unwrap();
    assert_eq!(session.session_id, "cs_scenario_1");
    // Creating a session alone never unlocks.
    assert!(h.storage.get_unlock(CONTENT).await.unwrap().is_none());

    let body = completed_event(CONTENT);
    let header = h.gate.reconciler().verifier().sign(&body, Utc::now().timestamp()).unwrap();
    let receipt = h.gate.reconciler().handle_confirmation(&body, &header).await.unwrap();
    assert_eq!(receipt.effect, FulfillmentEffect::Unlocked);

    let response = h.gate.controller().request_content(CONTENT, Some(SUBJECT)).await.unwrap();
    assert!(response.payload.is_full());
    let record = h.storage.get_unlock(CONTENT).await.unwrap().unwrap();
    assert_eq!(record.unlocked_via, UnlockVia::Payment);
}

#[tokio::test]
async fn forged_confirmation_is_rejected_without_mutation() {
    let h = harness(0.0, Arc::new(CountingProvider::default())).await;
    let body = completed_event(CONTENT);
    let header = format!("t={},v1={}", Utc::now().timestamp(), "0f".repeat(32));

    let err = h
        .gate
        .reconciler()
        .handle_confirmation(&body, &header)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidSignature(_)));

    let response = h.gate.controller().request_content(CONTENT, Some(SUBJECT)).await.unwrap();
    assert!(!response.payload.is_full());
}

#[tokio::test(start_paused = true)]
async fn provider_timeout_leaves_no_session_and_no_unlock() {
    let h = harness(0.0, Arc::new(StalledProvider)).await;

    let err = h
        .gate
        .payments()
        .create_session(CONTENT, "https://app.test/ok", "https://app.test/cancel")
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::PaymentProviderUnavailable(_)));
    assert!(h.storage.list_sessions(CONTENT).await.unwrap().is_empty());
    assert!(h.storage.get_unlock(CONTENT).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_submissions_produce_one_record() {
    let h = Arc::new(harness(1.0, Arc::new(CountingProvider::default())).await);

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.gate.email().submit(submission("a@example.com")).await
        }));
    }

    let mut fresh = 0;
    for task in tasks {
        let outcome = task.await.unwrap().unwrap();
        assert!(outcome.accepted);
        if outcome.reason.is_none() {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(h.storage.list_email_records(CONTENT).await.unwrap().len(), 1);
    assert_eq!(
        h.storage.get_unlock(CONTENT).await.unwrap().unwrap().unlocked_via,
        UnlockVia::Email
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_confirmations_unlock_exactly_once() {
    let h = Arc::new(harness(0.0, Arc::new(CountingProvider::default())).await);
    let body = Arc::new(completed_event(CONTENT));
    let header = Arc::new(
        h.gate
            .reconciler()
            .verifier()
            .sign(&body, Utc::now().timestamp())
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let (h, body, header) = (h.clone(), body.clone(), header.clone());
        tasks.push(tokio::spawn(async move {
            h.gate.reconciler().handle_confirmation(&body, &header).await
        }));
    }

    let mut unlocked = 0;
    for task in tasks {
        let receipt = task.await.unwrap().unwrap();
        assert!(receipt.processed);
        match receipt.effect {
            FulfillmentEffect::Unlocked => unlocked += 1,
            FulfillmentEffect::AlreadyUnlocked => {}
            FulfillmentEffect::Ignored => panic!("completed event must not be ignored"),
        }
    }
    assert_eq!(unlocked, 1);
}

#[tokio::test]
async fn email_unlock_is_never_reverted_by_later_payment() {
    let h = harness(1.0, Arc::new(CountingProvider::default())).await;
    h.gate.email().submit(submission("a@example.com")).await.unwrap();

    let body = completed_event(CONTENT);
    let header = h.gate.reconciler().verifier().sign(&body, Utc::now().timestamp()).unwrap();
    let receipt = h.gate.reconciler().handle_confirmation(&body, &header).await.unwrap();

    assert_eq!(receipt.effect, FulfillmentEffect::AlreadyUnlocked);
    let record = h.storage.get_unlock(CONTENT).await.unwrap().unwrap();
    assert_eq!(record.unlocked_via, UnlockVia::Email);
}

#[test]
fn bootstrap_rejects_invalid_ratio() {
    let result = PlanGate::bootstrap(
        GateConfig {
            experiment: ExperimentConfig {
                email_gate_ratio: -0.1,
            },
            ..GateConfig::default()
        },
        PlanGateDeps {
            storage: Arc::new(InMemoryGateStorage::new()),
            provider: Arc::new(CountingProvider::default()),
            engine: Arc::new(StaticEngine),
            webhook_secret: WebhookSecret::new(SecretString::from("whsec_scenario_secret")).unwrap(),
            publishable_key: "pk".to_string(),
            endpoints: GateEndpoints::default(),
        },
    );
    assert!(matches!(result, Err(GateError::Config(_))));
}
