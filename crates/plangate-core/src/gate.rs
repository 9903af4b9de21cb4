use crate::config::PricingConfig;
use crate::error::GateError;
use crate::experiment::ExperimentAssigner;
use crate::storage::GateStorage;
use crate::types::{Arm, PlanBody, PlanPreview, UnlockState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Client-facing paths named in unlock instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateEndpoints {
    /// `{content_id}` is substituted per request.
    pub checkout_template: String,
    pub email_submit: String,
}

impl Default for GateEndpoints {
    fn default() -> Self {
        Self {
            checkout_template: "/v1/plans/{content_id}/checkout".to_string(),
            email_submit: "/v1/email".to_string(),
        }
    }
}

impl GateEndpoints {
    pub fn checkout_for(&self, content_id: &str) -> String {
        self.checkout_template.replace("{content_id}", content_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ContentPayload {
    Preview(PlanPreview),
    Full(PlanBody),
}

impl ContentPayload {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// How a locked caller can unlock the full plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum UnlockInstruction {
    Pay {
        checkout_endpoint: String,
        amount_minor: u64,
        currency: String,
        publishable_key: String,
    },
    Email {
        submit_endpoint: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentResponse {
    pub content_id: String,
    pub payload: ContentPayload,
    /// Present only while the content is locked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arm: Option<Arm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlock_instruction: Option<UnlockInstruction>,
}

/// Read-only entry point deciding between preview and full payloads.
pub struct ContentGateController {
    storage: Arc<dyn GateStorage>,
    assigner: ExperimentAssigner,
    pricing: PricingConfig,
    publishable_key: String,
    endpoints: GateEndpoints,
}

impl ContentGateController {
    pub fn new(
        storage: Arc<dyn GateStorage>,
        assigner: ExperimentAssigner,
        pricing: PricingConfig,
        publishable_key: impl Into<String>,
        endpoints: GateEndpoints,
    ) -> Self {
        Self {
            storage,
            assigner,
            pricing,
            publishable_key: publishable_key.into(),
            endpoints,
        }
    }

    pub async fn request_content(
        &self,
        content_id: &str,
        subject_id: Option<&str>,
    ) -> Result<ContentResponse, GateError> {
        let content_id = content_id.trim();
        if content_id.is_empty() {
            return Err(GateError::invalid_input("content_id is required"));
        }
        let subject_id = subject_id.map(str::trim).filter(|id| !id.is_empty());

        let item = self
            .storage
            .get_content(content_id)
            .await?
            .ok_or_else(|| GateError::content_not_found(content_id))?;

        if self.storage.get_unlock(content_id).await?.is_some() {
            return Ok(ContentResponse {
                content_id: item.content_id,
                payload: ContentPayload::Full(item.full),
                arm: None,
                unlock_instruction: None,
            });
        }

        let arm = self.assigner.assign(subject_id, content_id);
        debug!(content_id, arm = arm.as_str(), "serving preview");
        let instruction = match arm {
            Arm::PaymentGate => UnlockInstruction::Pay {
                checkout_endpoint: self.endpoints.checkout_for(content_id),
                amount_minor: self.pricing.unit_amount_minor,
                currency: self.pricing.currency.clone(),
                publishable_key: self.publishable_key.clone(),
            },
            Arm::EmailGate => UnlockInstruction::Email {
                submit_endpoint: self.endpoints.email_submit.clone(),
            },
        };

        Ok(ContentResponse {
            content_id: item.content_id,
            payload: ContentPayload::Preview(item.preview),
            arm: Some(arm),
            unlock_instruction: Some(instruction),
        })
    }

    pub async fn unlock_state(&self, content_id: &str) -> Result<UnlockState, GateError> {
        let content_id = content_id.trim();
        if content_id.is_empty() {
            return Err(GateError::invalid_input("content_id is required"));
        }
        if self.storage.get_content(content_id).await?.is_none() {
            return Err(GateError::content_not_found(content_id));
        }
        let record = self.storage.get_unlock(content_id).await?;
        Ok(UnlockState::from_record(record))
    }
}
