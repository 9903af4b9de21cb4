use crate::config::PricingConfig;
use crate::error::GateError;
use crate::storage::GateStorage;
use crate::types::PaymentSessionRecord;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Metadata key carrying the content id through the provider.
pub const METADATA_CONTENT_ID: &str = "content_id";
/// Metadata key carrying the fixed product discriminator.
pub const METADATA_PRODUCT: &str = "product";

/// Failure reported by a checkout provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider transport failed: {0}")]
    Transport(String),

    #[error("provider rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("provider response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub name: String,
    pub description: String,
    pub unit_amount_minor: u64,
    pub currency: String,
    pub quantity: u32,
}

/// Provider-facing checkout request. Always a single line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub line_item: CheckoutLineItem,
    pub metadata: BTreeMap<String, String>,
    pub locale: String,
    pub success_url: String,
    pub cancel_url: String,
    pub client_reference_id: String,
}

/// Session as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// External checkout provider contract.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    fn provider_id(&self) -> &'static str;

    async fn create_session(&self, request: &CheckoutRequest)
        -> Result<ProviderSession, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// Creates provider checkout sessions for the fixed plan price.
pub struct PaymentSessionManager {
    storage: Arc<dyn GateStorage>,
    provider: Arc<dyn CheckoutProvider>,
    pricing: PricingConfig,
    timeout: Duration,
}

impl PaymentSessionManager {
    pub fn new(
        storage: Arc<dyn GateStorage>,
        provider: Arc<dyn CheckoutProvider>,
        pricing: PricingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            provider,
            pricing,
            timeout,
        }
    }

    pub fn build_request(
        &self,
        content_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> CheckoutRequest {
        let metadata = BTreeMap::from([
            (METADATA_CONTENT_ID.to_string(), content_id.to_string()),
            (METADATA_PRODUCT.to_string(), self.pricing.product_tag.clone()),
        ]);

        CheckoutRequest {
            line_item: CheckoutLineItem {
                name: self.pricing.product_name.clone(),
                description: format!("Full plan {content_id}"),
                unit_amount_minor: self.pricing.unit_amount_minor,
                currency: self.pricing.currency.clone(),
                quantity: 1,
            },
            metadata,
            locale: self.pricing.locale.clone(),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
            client_reference_id: content_id.to_string(),
        }
    }

    /// Create a checkout session. Does not touch unlock state.
    pub async fn create_session(
        &self,
        content_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, GateError> {
        let content_id = content_id.trim();
        if content_id.is_empty() {
            return Err(GateError::invalid_input("content_id is required"));
        }
        validate_redirect("success_url", success_url)?;
        validate_redirect("cancel_url", cancel_url)?;

        if self.storage.get_content(content_id).await?.is_none() {
            return Err(GateError::content_not_found(content_id));
        }

        let request = self.build_request(content_id, success_url, cancel_url);
        let provider_id = self.provider.provider_id();
        let session = match tokio::time::timeout(self.timeout, self.provider.create_session(&request))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                warn!(content_id, provider = provider_id, error = %err, "checkout session creation failed");
                return Err(GateError::PaymentProviderUnavailable(format!(
                    "{provider_id}: {err}"
                )));
            }
            Err(_) => {
                warn!(
                    content_id,
                    provider = provider_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "checkout session creation timed out"
                );
                return Err(GateError::PaymentProviderUnavailable(format!(
                    "{provider_id}: timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if session.session_id.trim().is_empty() || session.redirect_url.trim().is_empty() {
            return Err(GateError::PaymentProviderUnavailable(format!(
                "{provider_id}: session response missing id or redirect url"
            )));
        }

        self.storage
            .record_session(PaymentSessionRecord {
                session_id: session.session_id.clone(),
                content_id: content_id.to_string(),
                product: self.pricing.product_tag.clone(),
                amount_minor: self.pricing.unit_amount_minor,
                currency: self.pricing.currency.clone(),
                redirect_url: session.redirect_url.clone(),
                created_at: Utc::now(),
            })
            .await?;

        info!(
            content_id,
            session_id = %session.session_id,
            provider = provider_id,
            "checkout session created"
        );

        Ok(CheckoutSession {
            session_id: session.session_id,
            redirect_url: session.redirect_url,
        })
    }
}

fn validate_redirect(field: &str, value: &str) -> Result<(), GateError> {
    if value.trim().is_empty() {
        return Err(GateError::invalid_input(format!("{field} is required")));
    }
    let parsed = Url::parse(value)
        .map_err(|e| GateError::invalid_input(format!("{field} is not a valid url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(GateError::invalid_input(format!(
            "{field} must be an absolute http(s) url"
        )));
    }
    Ok(())
}
