//! Checkout provider and content engine adapters for plangate.

#![deny(unsafe_code)]

pub mod http;

pub use http::{HttpCheckoutProvider, HttpProviderConfig};

use async_trait::async_trait;
use plangate_core::catalog::{ContentEngine, GeneratedPlan, PlanBrief};
use plangate_core::checkout::{CheckoutProvider, CheckoutRequest, ProviderError, ProviderSession};
use plangate_core::error::GateError;
use plangate_core::types::{PlanBody, PlanPreview};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Mock checkout provider for local development and tests.
///
/// Session ids are derived from the content id and a per-instance counter, so
/// a fresh instance always replays the same sequence.
#[derive(Debug)]
pub struct MockCheckoutProvider {
    redirect_base: String,
    issued: AtomicU64,
}

impl MockCheckoutProvider {
    pub fn new(redirect_base: impl Into<String>) -> Self {
        Self {
            redirect_base: redirect_base.into(),
            issued: AtomicU64::new(0),
        }
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

impl Default for MockCheckoutProvider {
    fn default() -> Self {
        Self::new("https://checkout.invalid/pay")
    }
}

#[async_trait]
impl CheckoutProvider for MockCheckoutProvider {
    fn provider_id(&self) -> &'static str {
        "mock"
    }

    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderSession, ProviderError> {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.client_reference_id.as_bytes());
        hasher.update(&seq.to_be_bytes());
        let short: String = hasher.finalize().to_hex().chars().take(16).collect();
        let session_id = format!("cs_mock_{short}");

        Ok(ProviderSession {
            redirect_url: format!(
                "{}/{session_id}",
                self.redirect_base.trim_end_matches('/')
            ),
            session_id,
        })
    }
}

/// Deterministic failing provider useful for outage drills.
#[derive(Debug, Clone)]
pub struct AlwaysFailCheckoutProvider {
    reason: String,
}

impl AlwaysFailCheckoutProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CheckoutProvider for AlwaysFailCheckoutProvider {
    fn provider_id(&self) -> &'static str {
        "always-fail"
    }

    async fn create_session(
        &self,
        _request: &CheckoutRequest,
    ) -> Result<ProviderSession, ProviderError> {
        Err(ProviderError::Transport(self.reason.clone()))
    }
}

/// Provider that answers only after `delay`; pair with a shorter gate timeout.
#[derive(Debug, Clone)]
pub struct StallingCheckoutProvider {
    delay: Duration,
}

impl StallingCheckoutProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl CheckoutProvider for StallingCheckoutProvider {
    fn provider_id(&self) -> &'static str {
        "stalling"
    }

    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderSession, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(ProviderSession {
            session_id: format!("cs_stalled_{}", request.client_reference_id),
            redirect_url: "https://checkout.invalid/stalled".to_string(),
        })
    }
}

const VENUES: &[(&str, &str)] = &[
    ("Harbour walk", "sunset stroll along the water"),
    ("Neighbourhood bistro", "shared plates and a bottle of red"),
    ("Record bar", "vinyl listening session"),
    ("Night market", "street food crawl"),
    ("Rooftop cinema", "classic film under the stars"),
    ("Pottery studio", "wheel-throwing class for two"),
    ("Jazz cellar", "late set with a house trio"),
    ("Botanical garden", "glasshouse tour"),
];

const STOPS_PER_PLAN: usize = 3;

/// Deterministic content engine: the same brief always yields the same plan.
#[derive(Debug, Clone, Default)]
pub struct FixtureContentEngine;

impl FixtureContentEngine {
    fn pick_stops(brief: &PlanBrief) -> Vec<(&'static str, &'static str)> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(brief.title.as_deref().unwrap_or_default().as_bytes());
        hasher.update(&[0]);
        hasher.update(brief.city.as_deref().unwrap_or_default().as_bytes());
        for (key, value) in &brief.preferences {
            hasher.update(&[0]);
            hasher.update(key.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();

        let mut stops = Vec::with_capacity(STOPS_PER_PLAN);
        for byte in digest.as_bytes() {
            let venue = VENUES[*byte as usize % VENUES.len()];
            if !stops.contains(&venue) {
                stops.push(venue);
            }
            if stops.len() == STOPS_PER_PLAN {
                break;
            }
        }
        stops
    }
}

#[async_trait]
impl ContentEngine for FixtureContentEngine {
    fn engine_id(&self) -> &'static str {
        "fixture"
    }

    async fn generate(&self, brief: &PlanBrief) -> Result<GeneratedPlan, GateError> {
        let title = brief
            .title
            .clone()
            .unwrap_or_else(|| "An evening out".to_string());
        let city = brief.city.clone().unwrap_or_else(|| "your city".to_string());
        let stops = Self::pick_stops(brief);

        let teaser = stops.first().map(|(name, _)| *name).unwrap_or("A surprise");
        let preview = json!({
            "title": title,
            "city": city,
            "stop_count": stops.len(),
            "teaser": format!("Starts at {teaser}, then {} more stops", stops.len().saturating_sub(1)),
        });
        let full = json!({
            "title": title,
            "city": city,
            "stops": stops
                .iter()
                .enumerate()
                .map(|(idx, (name, detail))| json!({ "order": idx + 1, "name": name, "detail": detail }))
                .collect::<Vec<_>>(),
        });

        Ok(GeneratedPlan {
            preview: PlanPreview(preview),
            full: PlanBody(full),
        })
    }
}

/// Content engine that always fails.
#[derive(Debug, Clone)]
pub struct FailingContentEngine {
    reason: String,
}

impl FailingContentEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ContentEngine for FailingContentEngine {
    fn engine_id(&self) -> &'static str {
        "failing"
    }

    async fn generate(&self, _brief: &PlanBrief) -> Result<GeneratedPlan, GateError> {
        Err(GateError::ContentEngineFailure(self.reason.clone()))
    }
}
