use clap::{Parser, ValueEnum};
use plangate_adapters::HttpProviderConfig;
use plangate_core::{ExperimentConfig, GateConfig, PricingConfig, StorageConfig};
use plangate_service::{
    build_router, ProviderSettings, ServiceConfig, ServiceState, DEV_PUBLISHABLE_KEY,
    DEV_WEBHOOK_SECRET,
};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "plangated", version, about = "Plangate REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8092
    #[arg(long, default_value = "127.0.0.1:8092", env = "PLANGATE_LISTEN")]
    listen: SocketAddr,
    /// Payment provider secret key. Without it the mock provider is used.
    #[arg(long, env = "PLANGATE_PROVIDER_SECRET_KEY", hide_env_values = true)]
    provider_secret_key: Option<String>,
    /// Publishable key handed to clients on the payment arm.
    #[arg(long, env = "PLANGATE_PROVIDER_PUBLISHABLE_KEY")]
    provider_publishable_key: Option<String>,
    #[arg(
        long,
        default_value = plangate_adapters::http::DEFAULT_API_BASE,
        env = "PLANGATE_PROVIDER_API_BASE"
    )]
    provider_api_base: String,
    /// Honour HTTP(S)_PROXY for provider calls.
    #[arg(long, default_value_t = false, env = "PLANGATE_USE_SYSTEM_PROXY")]
    use_system_proxy: bool,
    /// Shared secret for payment webhook signatures.
    #[arg(long, env = "PLANGATE_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,
    #[arg(long, default_value_t = 300, env = "PLANGATE_WEBHOOK_TOLERANCE_SECS")]
    webhook_tolerance_secs: u64,
    /// Fixed plan price in minor currency units.
    #[arg(long, default_value_t = 499, env = "PLANGATE_UNIT_AMOUNT_MINOR")]
    unit_amount_minor: u64,
    #[arg(long, default_value = "usd", env = "PLANGATE_CURRENCY")]
    currency: String,
    #[arg(long, default_value = "Date plan", env = "PLANGATE_PRODUCT_NAME")]
    product_name: String,
    #[arg(long, default_value = "auto", env = "PLANGATE_LOCALE")]
    locale: String,
    /// Share of subjects offered the email unlock, in [0, 1].
    #[arg(long, default_value_t = 0.5, env = "PLANGATE_EMAIL_GATE_RATIO")]
    email_gate_ratio: f64,
    #[arg(long, default_value_t = 10, env = "PLANGATE_PROVIDER_TIMEOUT_SECS")]
    provider_timeout_secs: u64,
    /// Storage backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "PLANGATE_STORAGE")]
    storage: StorageMode,
    #[arg(long, env = "PLANGATE_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    #[arg(long, default_value_t = 5, env = "PLANGATE_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false, env = "PLANGATE_LOG_JSON")]
    log_json: bool,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => match resolved_url {
            Some(database_url) => StorageConfig::postgres(database_url, cli.pg_max_connections),
            None => StorageConfig::Memory,
        },
    };

    Ok(storage)
}

fn resolve_service_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let gate = GateConfig {
        pricing: PricingConfig {
            unit_amount_minor: cli.unit_amount_minor,
            currency: cli.currency.clone(),
            product_name: cli.product_name.clone(),
            locale: cli.locale.clone(),
            ..PricingConfig::default()
        },
        experiment: ExperimentConfig {
            email_gate_ratio: cli.email_gate_ratio,
        },
        provider_timeout: Duration::from_secs(cli.provider_timeout_secs),
        webhook_tolerance: Duration::from_secs(cli.webhook_tolerance_secs),
    };

    let provider = match &cli.provider_secret_key {
        Some(secret_key) => ProviderSettings::Http {
            secret_key: SecretString::from(secret_key.clone()),
            http: HttpProviderConfig {
                api_base: cli.provider_api_base.clone(),
                timeout: gate.provider_timeout,
                use_system_proxy: cli.use_system_proxy,
            },
        },
        None => {
            warn!("no provider secret key configured; using mock checkout provider");
            ProviderSettings::Mock
        }
    };

    let webhook_secret = match (&cli.webhook_secret, &provider) {
        (Some(secret), _) => SecretString::from(secret.clone()),
        (None, ProviderSettings::Mock) => {
            warn!("no webhook secret configured; using local development secret");
            SecretString::from(DEV_WEBHOOK_SECRET)
        }
        (None, ProviderSettings::Http { .. }) => {
            anyhow::bail!("a live provider requires --webhook-secret or PLANGATE_WEBHOOK_SECRET")
        }
    };

    let publishable_key = match (&cli.provider_publishable_key, &provider) {
        (Some(key), _) => key.clone(),
        (None, ProviderSettings::Mock) => DEV_PUBLISHABLE_KEY.to_string(),
        (None, ProviderSettings::Http { .. }) => anyhow::bail!(
            "a live provider requires --provider-publishable-key or PLANGATE_PROVIDER_PUBLISHABLE_KEY"
        ),
    };

    Ok(ServiceConfig {
        gate,
        storage: resolve_storage(cli)?,
        provider,
        publishable_key,
        webhook_secret,
    })
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("plangate_service=info,info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = resolve_service_config(&cli)?;
    info!(storage = config.storage.label(), "starting plangate-service");
    let state = ServiceState::bootstrap(config).await?;
    info!(
        provider_timeout_ms = state.gate.config().provider_timeout.as_millis() as u64,
        webhook_tolerance_secs = state.gate.reconciler().verifier().tolerance().as_secs(),
        locale = %state.gate.config().pricing.locale,
        "gate configuration loaded"
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("plangate-service REST listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("plangate-service stopped");
    Ok(())
}
