use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

/// Startup configuration errors. Raised before any request is served.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("email_gate_ratio must be within [0, 1], got {0}")]
    InvalidRatio(f64),

    #[error("currency must be a three-letter ISO code, got '{0}'")]
    InvalidCurrency(String),

    #[error("unit amount must be greater than zero")]
    ZeroAmount,

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("provider timeout must be greater than zero")]
    ZeroTimeout,

    #[error("webhook tolerance must be greater than zero")]
    ZeroWebhookTolerance,

    #[error("webhook secret must be at least {min_length} bytes")]
    WebhookSecretTooShort { min_length: usize },
}

/// Fixed price of a plan unlock. Never derived from request data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingConfig {
    pub unit_amount_minor: u64,
    /// Lowercase ISO-4217 code.
    pub currency: String,
    pub product_name: String,
    /// Discriminator written into checkout metadata and required back on confirmation.
    pub product_tag: String,
    pub locale: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            unit_amount_minor: 499,
            currency: "usd".to_string(),
            product_name: "Date plan".to_string(),
            product_tag: "date_plan".to_string(),
            locale: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentConfig {
    /// Share of subjects assigned to the email arm.
    pub email_gate_ratio: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            email_gate_ratio: 0.5,
        }
    }
}

/// Immutable gate configuration injected at startup.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub pricing: PricingConfig,
    pub experiment: ExperimentConfig,
    pub provider_timeout: Duration,
    /// Maximum accepted age (and clock skew) of a signed webhook.
    pub webhook_tolerance: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            experiment: ExperimentConfig::default(),
            provider_timeout: Duration::from_secs(10),
            webhook_tolerance: Duration::from_secs(300),
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.experiment.email_gate_ratio;
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::InvalidRatio(ratio));
        }

        let currency = &self.pricing.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidCurrency(currency.clone()));
        }

        if self.pricing.unit_amount_minor == 0 {
            return Err(ConfigError::ZeroAmount);
        }
        if self.pricing.product_tag.trim().is_empty() {
            return Err(ConfigError::Empty("product_tag"));
        }
        if self.pricing.product_name.trim().is_empty() {
            return Err(ConfigError::Empty("product_name"));
        }
        if self.pricing.locale.trim().is_empty() {
            return Err(ConfigError::Empty("locale"));
        }
        if self.provider_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.webhook_tolerance.is_zero() {
            return Err(ConfigError::ZeroWebhookTolerance);
        }

        Ok(())
    }

    /// Normalizes free-form input (currency case) and validates.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        self.pricing.currency = self.pricing.currency.trim().to_ascii_lowercase();
        self.validate()?;
        Ok(self)
    }
}

/// Payment provider API credentials.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub secret_key: SecretString,
    /// Safe to hand to browsers.
    pub publishable_key: String,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("secret_key", &"[redacted]")
            .field("publishable_key", &self.publishable_key)
            .finish()
    }
}

/// Shared secret used to verify payment webhooks.
#[derive(Clone)]
pub struct WebhookSecret(SecretString);

impl WebhookSecret {
    pub const MIN_LENGTH: usize = 16;

    pub fn new(secret: SecretString) -> Result<Self, ConfigError> {
        if secret.expose_secret().len() < Self::MIN_LENGTH {
            return Err(ConfigError::WebhookSecretTooShort {
                min_length: Self::MIN_LENGTH,
            });
        }
        Ok(Self(secret))
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret([redacted])")
    }
}
