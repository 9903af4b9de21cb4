#![deny(unsafe_code)]

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use plangate_adapters::{
    FixtureContentEngine, HttpCheckoutProvider, HttpProviderConfig, MockCheckoutProvider,
};
use plangate_core::{
    bootstrap_storage, CheckoutProvider, CheckoutSession, ConfigError, ConfirmationReceipt,
    ContentEngine, ContentResponse, EmailSubmission, GateConfig, GateEndpoints, GateError,
    GateStorage, PlanBrief, PlanGate, PlanGateDeps, PlanPreview, ProviderCredentials,
    ProviderError, StorageConfig, StorageError, SubmissionReason, UnlockState, WebhookSecret,
    SIGNATURE_HEADER,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const DEV_WEBHOOK_SECRET: &str = "plangate-local-dev-webhook-secret";
pub const DEV_PUBLISHABLE_KEY: &str = "pk_test_plangate_local";

/// Which checkout provider backs the service.
#[derive(Debug, Clone)]
pub enum ProviderSettings {
    /// Deterministic in-process provider for local development.
    Mock,
    Http {
        secret_key: SecretString,
        http: HttpProviderConfig,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub gate: GateConfig,
    pub storage: StorageConfig,
    pub provider: ProviderSettings,
    pub publishable_key: String,
    pub webhook_secret: SecretString,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            storage: StorageConfig::Memory,
            provider: ProviderSettings::Mock,
            publishable_key: DEV_PUBLISHABLE_KEY.to_string(),
            webhook_secret: SecretString::from(DEV_WEBHOOK_SECRET),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub gate: Arc<PlanGate>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let storage = bootstrap_storage(config.storage.clone()).await?;
        let provider: Arc<dyn CheckoutProvider> = match &config.provider {
            ProviderSettings::Mock => Arc::new(MockCheckoutProvider::default()),
            ProviderSettings::Http { secret_key, http } => Arc::new(HttpCheckoutProvider::new(
                ProviderCredentials {
                    secret_key: secret_key.clone(),
                    publishable_key: config.publishable_key.clone(),
                },
                http.clone(),
            )?),
        };
        Self::assemble(config, storage, provider, Arc::new(FixtureContentEngine))
    }

    /// Wire the gate from already-built collaborators.
    pub fn assemble(
        config: ServiceConfig,
        storage: Arc<dyn GateStorage>,
        provider: Arc<dyn CheckoutProvider>,
        engine: Arc<dyn ContentEngine>,
    ) -> Result<Self, ServiceError> {
        let gate = PlanGate::bootstrap(
            config.gate,
            PlanGateDeps {
                storage,
                provider,
                engine,
                webhook_secret: WebhookSecret::new(config.webhook_secret)?,
                publishable_key: config.publishable_key,
                endpoints: GateEndpoints::default(),
            },
        )?;
        Ok(Self {
            gate: Arc::new(gate),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/plans", post(create_plan))
        .route("/v1/plans/:content_id", get(request_content))
        .route("/v1/plans/:content_id/unlock", get(unlock_state))
        .route("/v1/plans/:content_id/checkout", post(create_checkout))
        .route("/v1/email", post(submit_email))
        .route("/v1/webhooks/payment", post(payment_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core error: {0}")]
    Core(#[from] GateError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] GateError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Status and client-safe message. Internal details never leave the process.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Http { status, message } => (*status, message.clone()),
            ApiError::Core(err) => {
                let status = match err {
                    GateError::InvalidInput(_) | GateError::MalformedEvent(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    GateError::NotFound(_) => StatusCode::NOT_FOUND,
                    GateError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
                    GateError::PaymentProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    GateError::ContentEngineFailure(_)
                    | GateError::Config(_)
                    | GateError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = match err {
                    GateError::InvalidInput(_) | GateError::NotFound(_) => err.to_string(),
                    GateError::InvalidSignature(_) => "invalid signature".to_string(),
                    GateError::MalformedEvent(_) => "malformed event".to_string(),
                    GateError::PaymentProviderUnavailable(_) => {
                        "payment provider unavailable, retry later".to_string()
                    }
                    _ => "internal error".to_string(),
                };
                if status.is_server_error() {
                    error!(kind = err.kind(), error = %err, "request failed");
                }
                (status, message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Email route errors use the `{success, message}` envelope.
#[derive(Debug)]
pub struct EmailApiError(ApiError);

impl From<ApiError> for EmailApiError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<GateError> for EmailApiError {
    fn from(err: GateError) -> Self {
        Self(ApiError::Core(err))
    }
}

impl IntoResponse for EmailApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.0.status_and_message();
        (
            status,
            Json(serde_json::json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
    checked_at: DateTime<Utc>,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "plangate-service",
        storage_backend: state.gate.storage().backend_label(),
        checked_at: Utc::now(),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct CreatePlanRequest {
    content_id: Option<String>,
    #[serde(flatten)]
    brief: PlanBrief,
}

/// Creation response. The full body is only released through the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPlan {
    pub content_id: String,
    pub preview: PlanPreview,
    pub created_at: DateTime<Utc>,
}

async fn create_plan(
    State(state): State<ServiceState>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<CreatedPlan>), ApiError> {
    let item = state
        .gate
        .catalog()
        .create(&request.brief, request.content_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedPlan {
            content_id: item.content_id,
            preview: item.preview,
            created_at: item.created_at,
        }),
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct ContentQuery {
    subject_id: Option<String>,
}

async fn request_content(
    Path(content_id): Path<String>,
    State(state): State<ServiceState>,
    Query(query): Query<ContentQuery>,
) -> Result<Json<ContentResponse>, ApiError> {
    Ok(Json(
        state
            .gate
            .controller()
            .request_content(&content_id, query.subject_id.as_deref())
            .await?,
    ))
}

async fn unlock_state(
    Path(content_id): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<UnlockState>, ApiError> {
    Ok(Json(state.gate.controller().unlock_state(&content_id).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct CheckoutBody {
    success_url: String,
    cancel_url: String,
}

async fn create_checkout(
    Path(content_id): Path<String>,
    State(state): State<ServiceState>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutSession>, ApiError> {
    Ok(Json(
        state
            .gate
            .payments()
            .create_session(&content_id, &body.success_url, &body.cancel_url)
            .await?,
    ))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EmailBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    content_id: Option<String>,
    #[serde(default)]
    subject_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailResponse {
    pub success: bool,
    pub message: String,
    pub unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SubmissionReason>,
}

async fn submit_email(
    State(state): State<ServiceState>,
    body: Result<Json<EmailBody>, JsonRejection>,
) -> Result<Json<EmailResponse>, EmailApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let (Some(email), Some(content_id)) = (body.email, body.content_id) else {
        return Err(ApiError::bad_request("email and content_id are required").into());
    };

    let outcome = state
        .gate
        .email()
        .submit(EmailSubmission {
            content_id,
            email,
            subject_id: body.subject_id,
        })
        .await?;

    let message = match outcome.reason {
        Some(SubmissionReason::RecordedNotUnlocking) => "Thanks, we'll be in touch",
        Some(SubmissionReason::AlreadyRecorded) => "Email already recorded",
        None => "Plan unlocked",
    };
    Ok(Json(EmailResponse {
        success: outcome.accepted,
        message: message.to_string(),
        unlocked: outcome.unlocked,
        reason: outcome.reason,
    }))
}

async fn payment_webhook(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConfirmationReceipt>, ApiError> {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("payment webhook without signature header");
        return Err(GateError::InvalidSignature("missing signature header".to_string()).into());
    };

    let receipt = state
        .gate
        .reconciler()
        .handle_confirmation(&body, signature)
        .await?;
    info!(effect = ?receipt.effect, "payment webhook processed");
    Ok(Json(receipt))
}
