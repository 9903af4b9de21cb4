use crate::catalog::{ContentCatalog, ContentEngine};
use crate::checkout::{CheckoutProvider, PaymentSessionManager};
use crate::config::{GateConfig, WebhookSecret};
use crate::email::EmailCollectionService;
use crate::error::GateError;
use crate::experiment::ExperimentAssigner;
use crate::gate::{ContentGateController, GateEndpoints};
use crate::reconciler::FulfillmentReconciler;
use crate::signature::WebhookVerifier;
use crate::storage::GateStorage;
use std::sync::Arc;
use tracing::info;

/// Collaborators handed to [`PlanGate::bootstrap`].
pub struct PlanGateDeps {
    pub storage: Arc<dyn GateStorage>,
    pub provider: Arc<dyn CheckoutProvider>,
    pub engine: Arc<dyn ContentEngine>,
    pub webhook_secret: WebhookSecret,
    pub publishable_key: String,
    pub endpoints: GateEndpoints,
}

/// Fully wired gate: every component shares one storage backend.
pub struct PlanGate {
    config: GateConfig,
    storage: Arc<dyn GateStorage>,
    catalog: ContentCatalog,
    controller: ContentGateController,
    email: EmailCollectionService,
    payments: PaymentSessionManager,
    reconciler: FulfillmentReconciler,
}

impl PlanGate {
    /// Validate configuration and wire components. Fails fast on invalid config.
    pub fn bootstrap(config: GateConfig, deps: PlanGateDeps) -> Result<Self, GateError> {
        let config = config.normalized()?;
        let assigner = ExperimentAssigner::new(config.experiment)?;
        let verifier = WebhookVerifier::new(deps.webhook_secret, config.webhook_tolerance);

        let catalog = ContentCatalog::new(deps.storage.clone(), deps.engine.clone());
        let controller = ContentGateController::new(
            deps.storage.clone(),
            assigner.clone(),
            config.pricing.clone(),
            deps.publishable_key,
            deps.endpoints,
        );
        let email = EmailCollectionService::new(deps.storage.clone(), assigner);
        let payments = PaymentSessionManager::new(
            deps.storage.clone(),
            deps.provider.clone(),
            config.pricing.clone(),
            config.provider_timeout,
        );
        let reconciler = FulfillmentReconciler::new(
            deps.storage.clone(),
            verifier,
            config.pricing.product_tag.clone(),
        );

        info!(
            storage = deps.storage.backend_label(),
            provider = deps.provider.provider_id(),
            engine = deps.engine.engine_id(),
            email_gate_ratio = config.experiment.email_gate_ratio,
            unit_amount_minor = config.pricing.unit_amount_minor,
            currency = %config.pricing.currency,
            "plan gate bootstrapped"
        );

        Ok(Self {
            config,
            storage: deps.storage,
            catalog,
            controller,
            email,
            payments,
            reconciler,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn GateStorage> {
        &self.storage
    }

    pub fn catalog(&self) -> &ContentCatalog {
        &self.catalog
    }

    pub fn controller(&self) -> &ContentGateController {
        &self.controller
    }

    pub fn email(&self) -> &EmailCollectionService {
        &self.email
    }

    pub fn payments(&self) -> &PaymentSessionManager {
        &self.payments
    }

    pub fn reconciler(&self) -> &FulfillmentReconciler {
        &self.reconciler
    }
}
