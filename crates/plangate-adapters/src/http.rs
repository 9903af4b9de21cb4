//! HTTP checkout provider speaking the hosted-checkout session API.

use async_trait::async_trait;
use plangate_core::checkout::{CheckoutProvider, CheckoutRequest, ProviderError, ProviderSession};
use plangate_core::config::ProviderCredentials;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

const SESSIONS_PATH: &str = "/v1/checkout/sessions";
const ERROR_BODY_LIMIT: usize = 320;

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub api_base: String,
    pub timeout: Duration,
    /// Honour `HTTP(S)_PROXY` from the environment.
    pub use_system_proxy: bool,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            use_system_proxy: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

/// Creates checkout sessions over HTTPS with bearer secret-key auth.
pub struct HttpCheckoutProvider {
    client: Client,
    endpoint: String,
    credentials: ProviderCredentials,
}

impl HttpCheckoutProvider {
    pub fn new(
        credentials: ProviderCredentials,
        config: HttpProviderConfig,
    ) -> Result<Self, ProviderError> {
        let mut builder = Client::builder().timeout(config.timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}{SESSIONS_PATH}", config.api_base.trim_end_matches('/')),
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Flattened form fields for a single-line-item payment session.
pub fn form_fields(request: &CheckoutRequest) -> Vec<(String, String)> {
    let item = &request.line_item;
    let mut fields = vec![
        ("mode".to_string(), "payment".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            item.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            item.unit_amount_minor.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            item.name.clone(),
        ),
        (
            "line_items[0][price_data][product_data][description]".to_string(),
            item.description.clone(),
        ),
        ("line_items[0][quantity]".to_string(), item.quantity.to_string()),
        ("locale".to_string(), request.locale.clone()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            "client_reference_id".to_string(),
            request.client_reference_id.clone(),
        ),
    ];
    fields.extend(
        request
            .metadata
            .iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
    );
    fields
}

#[async_trait]
impl CheckoutProvider for HttpCheckoutProvider {
    fn provider_id(&self) -> &'static str {
        "http"
    }

    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderSession, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.credentials.secret_key.expose_secret())
            .form(&form_fields(request))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let redirect_url = body
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProviderError::Decode("session response has no url".to_string()))?;

        debug!(session_id = %body.id, "provider session created");
        Ok(ProviderSession {
            session_id: body.id,
            redirect_url,
        })
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Form;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use plangate_core::checkout::CheckoutLineItem;
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, HashMap};

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            line_item: CheckoutLineItem {
                name: "Date plan".to_string(),
                description: "Full plan plan-1".to_string(),
                unit_amount_minor: 499,
                currency: "usd".to_string(),
                quantity: 1,
            },
            metadata: BTreeMap::from([
                ("content_id".to_string(), "plan-1".to_string()),
                ("product".to_string(), "date_plan".to_string()),
            ]),
            locale: "auto".to_string(),
            success_url: "https://app.test/ok".to_string(),
            cancel_url: "https://app.test/cancel".to_string(),
            client_reference_id: "plan-1".to_string(),
        }
    }

    fn credentials() -> ProviderCredentials {
        ProviderCredentials {
            secret_key: SecretString::from("sk_test_local"),
            publishable_key: "pk_test_local".to_string(),
        }
    }

    async fn fake_provider(
        status: StatusCode,
        body: Value,
    ) -> String {
        let app = Router::new().route(
            SESSIONS_PATH,
            post(move |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| {
                let body = body.clone();
                async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer sk_test_local");
                    if !authorized {
                        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "auth" })));
                    }
                    if form.get("metadata[content_id]").map(String::as_str) != Some("plan-1") {
                        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "metadata" })));
                    }
                    (status, Json(body))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn provider(api_base: String) -> HttpCheckoutProvider {
        HttpCheckoutProvider::new(
            credentials(),
            HttpProviderConfig {
                api_base,
                timeout: Duration::from_secs(5),
                use_system_proxy: false,
            },
        )
        .unwrap()
    }

    #[test]
    fn form_carries_single_line_item_and_metadata() {
        let fields: HashMap<_, _> = form_fields(&request()).into_iter().collect();
        assert_eq!(fields["mode"], "payment");
        assert_eq!(fields["line_items[0][price_data][unit_amount]"], "499");
        assert_eq!(fields["line_items[0][price_data][currency]"], "usd");
        assert_eq!(fields["line_items[0][quantity]"], "1");
        assert_eq!(fields["metadata[content_id]"], "plan-1");
        assert_eq!(fields["metadata[product]"], "date_plan");
        assert_eq!(fields["locale"], "auto");
        assert!(!fields.keys().any(|k| k.starts_with("line_items[1]")));
    }

    #[test]
    fn endpoint_joins_base_without_double_slash() {
        let provider = provider("https://provider.test/".to_string());
        assert_eq!(provider.endpoint(), "https://provider.test/v1/checkout/sessions");
    }

    #[tokio::test]
    async fn parses_session_from_success_response() {
        let base = fake_provider(
            StatusCode::OK,
            json!({ "id": "cs_test_abc", "url": "https://checkout.test/pay/cs_test_abc" }),
        )
        .await;
        let session = provider(base).create_session(&request()).await.unwrap();
        assert_eq!(session.session_id, "cs_test_abc");
        assert_eq!(session.redirect_url, "https://checkout.test/pay/cs_test_abc");
    }

    #[tokio::test]
    async fn non_success_status_is_rejected() {
        let base = fake_provider(
            StatusCode::PAYMENT_REQUIRED,
            json!({ "error": { "message": "card declined" } }),
        )
        .await;
        let err = provider(base).create_session(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 402, .. }));
    }

    #[tokio::test]
    async fn missing_url_is_a_decode_failure() {
        let base = fake_provider(StatusCode::OK, json!({ "id": "cs_test_abc" })).await;
        let err = provider(base).create_session(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
