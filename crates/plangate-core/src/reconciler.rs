use crate::checkout::{METADATA_CONTENT_ID, METADATA_PRODUCT};
use crate::error::GateError;
use crate::signature::WebhookVerifier;
use crate::storage::GateStorage;
use crate::types::UnlockVia;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const EVENT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

/// Payment confirmation as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEventData {
    pub object: PaymentEventObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEventObject {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PaymentEvent {
    /// Whether this event confirms that the customer has paid.
    pub fn confirms_payment(&self) -> bool {
        match self.event_type.as_str() {
            EVENT_SESSION_COMPLETED => matches!(
                self.data.object.payment_status.as_deref(),
                None | Some("paid") | Some("no_payment_required")
            ),
            EVENT_ASYNC_PAYMENT_SUCCEEDED => true,
            _ => false,
        }
    }
}

/// What a confirmation did to unlock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentEffect {
    Unlocked,
    AlreadyUnlocked,
    /// Acknowledged without a state change (expired, canceled, unpaid, unrelated types).
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationReceipt {
    pub processed: bool,
    pub effect: FulfillmentEffect,
}

/// Turns verified payment confirmations into `payment` unlocks.
///
/// Delivery order is not assumed and duplicates are expected: the unlock is a
/// compare-and-set, so replays resolve to [`FulfillmentEffect::AlreadyUnlocked`].
pub struct FulfillmentReconciler {
    storage: Arc<dyn GateStorage>,
    verifier: WebhookVerifier,
    product_tag: String,
}

impl FulfillmentReconciler {
    pub fn new(
        storage: Arc<dyn GateStorage>,
        verifier: WebhookVerifier,
        product_tag: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            verifier,
            product_tag: product_tag.into(),
        }
    }

    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    pub async fn handle_confirmation(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ConfirmationReceipt, GateError> {
        self.verifier.verify(payload, signature_header)?;

        let event: PaymentEvent = serde_json::from_slice(payload).map_err(|e| {
            warn!(error = %e, "payment event rejected: undecodable body");
            GateError::MalformedEvent(format!("event body is not a payment event: {e}"))
        })?;

        if !event.confirms_payment() {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                payment_status = ?event.data.object.payment_status,
                "payment event acknowledged without state change"
            );
            return Ok(ConfirmationReceipt {
                processed: true,
                effect: FulfillmentEffect::Ignored,
            });
        }

        let content_id = self.correlate(&event).await?;
        let transition = self
            .storage
            .set_unlocked_if_locked(&content_id, UnlockVia::Payment, Utc::now())
            .await?;

        let effect = if transition.transitioned() {
            info!(
                event_id = %event.id,
                content_id = %content_id,
                via = "payment",
                "content unlocked"
            );
            FulfillmentEffect::Unlocked
        } else {
            debug!(
                event_id = %event.id,
                content_id = %content_id,
                unlocked_via = transition.record().unlocked_via.as_str(),
                "duplicate confirmation for unlocked content"
            );
            FulfillmentEffect::AlreadyUnlocked
        };

        Ok(ConfirmationReceipt {
            processed: true,
            effect,
        })
    }

    async fn correlate(&self, event: &PaymentEvent) -> Result<String, GateError> {
        let metadata = &event.data.object.metadata;

        if let Some(product) = metadata.get(METADATA_PRODUCT) {
            if product != &self.product_tag {
                return Err(reject(event, format!("unexpected product tag '{product}'")));
            }
        } else {
            return Err(reject(event, "metadata.product is missing".to_string()));
        }

        let content_id = metadata
            .get(METADATA_CONTENT_ID)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| reject(event, "metadata.content_id is missing".to_string()))?;

        if self.storage.get_content(content_id).await?.is_none() {
            return Err(reject(event, format!("content '{content_id}' is unknown")));
        }
        Ok(content_id.to_string())
    }
}

fn reject(event: &PaymentEvent, reason: String) -> GateError {
    warn!(event_id = %event.id, event_type = %event.event_type, reason = %reason, "payment event rejected");
    GateError::MalformedEvent(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookSecret;
    use crate::storage::{ContentStore, InMemoryGateStorage, UnlockStore};
    use crate::types::{ContentItem, PlanBody, PlanPreview};
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> (Arc<InMemoryGateStorage>, FulfillmentReconciler) {
        let storage = Arc::new(InMemoryGateStorage::new());
        storage
            .insert_content_if_absent(ContentItem {
                content_id: "plan-1".to_string(),
                preview: PlanPreview(json!({})),
                full: PlanBody(json!({})),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let verifier = WebhookVerifier::new(
            WebhookSecret::new(SecretString::from("whsec_reconciler_tests")).unwrap(),
            Duration::from_secs(300),
        );
        let reconciler = FulfillmentReconciler::new(storage.clone(), verifier, "date_plan");
        (storage, reconciler)
    }

    fn event(event_type: &str, status: Option<&str>, metadata: serde_json::Value) -> Vec<u8> {
        let mut object = json!({ "id": "cs_test_1", "metadata": metadata });
        if let Some(status) = status {
            object["payment_status"] = json!(status);
        }
        serde_json::to_vec(&json!({ "id": "evt_1", "type": event_type, "data": { "object": object } }))
            .unwrap()
    }

    fn plan_metadata() -> serde_json::Value {
        json!({ "content_id": "plan-1", "product": "date_plan" })
    }

    fn signed(reconciler: &FulfillmentReconciler, body: &[u8]) -> String {
        reconciler
            .verifier()
            .sign(body, Utc::now().timestamp())
            .unwrap()
    }

    #[tokio::test]
    async fn completed_event_unlocks_once() {
        let (storage, reconciler) = setup().await;
        let body = event(EVENT_SESSION_COMPLETED, Some("paid"), plan_metadata());
        let header = signed(&reconciler, &body);

        let first = reconciler.handle_confirmation(&body, &header).await.unwrap();
        let second = reconciler.handle_confirmation(&body, &header).await.unwrap();

        assert_eq!(first.effect, FulfillmentEffect::Unlocked);
        assert_eq!(second.effect, FulfillmentEffect::AlreadyUnlocked);
        assert!(second.processed);
        let record = storage.get_unlock("plan-1").await.unwrap().unwrap();
        assert_eq!(record.unlocked_via, UnlockVia::Payment);
    }

    #[tokio::test]
    async fn bad_signature_leaves_state_unchanged() {
        let (storage, reconciler) = setup().await;
        let body = event(EVENT_SESSION_COMPLETED, None, plan_metadata());
        let header = format!("t={},v1={}", Utc::now().timestamp(), "ab".repeat(32));

        let err = reconciler.handle_confirmation(&body, &header).await.unwrap_err();
        assert!(matches!(err, GateError::InvalidSignature(_)));
        assert!(storage.get_unlock("plan-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_completing_events_are_acknowledged() {
        let (storage, reconciler) = setup().await;
        for (event_type, status) in [
            ("checkout.session.expired", None),
            ("checkout.session.canceled", None),
            (EVENT_SESSION_COMPLETED, Some("unpaid")),
            ("charge.refunded", None),
        ] {
            let body = event(event_type, status, plan_metadata());
            let header = signed(&reconciler, &body);
            let receipt = reconciler.handle_confirmation(&body, &header).await.unwrap();
            assert_eq!(receipt.effect, FulfillmentEffect::Ignored, "{event_type}");
        }
        assert!(storage.get_unlock("plan-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn async_payment_success_unlocks() {
        let (_, reconciler) = setup().await;
        let body = event(EVENT_ASYNC_PAYMENT_SUCCEEDED, Some("paid"), plan_metadata());
        let header = signed(&reconciler, &body);
        let receipt = reconciler.handle_confirmation(&body, &header).await.unwrap();
        assert_eq!(receipt.effect, FulfillmentEffect::Unlocked);
    }

    #[tokio::test]
    async fn uncorrelatable_events_are_malformed() {
        let (storage, reconciler) = setup().await;
        for metadata in [
            json!({ "product": "date_plan" }),
            json!({ "content_id": "  ", "product": "date_plan" }),
            json!({ "content_id": "plan-404", "product": "date_plan" }),
            json!({ "content_id": "plan-1", "product": "gift_card" }),
            json!({ "content_id": "plan-1" }),
        ] {
            let body = event(EVENT_SESSION_COMPLETED, Some("paid"), metadata.clone());
            let header = signed(&reconciler, &body);
            let err = reconciler.handle_confirmation(&body, &header).await.unwrap_err();
            assert!(matches!(err, GateError::MalformedEvent(_)), "{metadata}");
        }
        assert!(storage.get_unlock("plan-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let (_, reconciler) = setup().await;
        let body = b"{not json";
        let header = signed(&reconciler, body);
        let err = reconciler.handle_confirmation(body, &header).await.unwrap_err();
        assert!(matches!(err, GateError::MalformedEvent(_)));
    }
}
