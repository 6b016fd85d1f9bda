use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderName, HeaderValue, Method};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use lx_domain::config::{Config, ObservabilityConfig};
use lx_gateway::api;
use lx_gateway::bootstrap;
use lx_gateway::cli::{Cli, Command, ConfigCommand, TokenCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (config, _config_path) = lx_gateway::cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            run_server(Arc::new(config), tracer_provider).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = lx_gateway::cli::load_config()?;
            let valid = lx_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = lx_gateway::cli::load_config()?;
            lx_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Token(TokenCommand::Issue { user, ttl_secs })) => {
            init_cli_tracing();
            let (config, _) = lx_gateway::cli::load_config()?;
            lx_gateway::cli::token::issue(&config, &user, ttl_secs)
        }
        Some(Command::Version) => {
            println!("lexchat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// JSON logs for `serve`, plus an OTLP span exporter when
/// `observability.otlp_endpoint` is set. The returned provider is flushed
/// after the server stops.
fn init_tracing(
    obs: &ObservabilityConfig,
) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lx_gateway=debug"));

    let provider = obs.otlp_endpoint.as_deref().and_then(|endpoint| {
        match build_tracer_provider(obs, endpoint) {
            Ok(provider) => Some(provider),
            Err(e) => {
                eprintln!("WARNING: OTLP export to {endpoint} disabled: {e}");
                None
            }
        }
    });

    // `Option<Layer>` is itself a layer, so one registry covers both cases.
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("lexchat")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel)
        .init();

    provider
}

fn build_tracer_provider(
    obs: &ObservabilityConfig,
    endpoint: &str,
) -> anyhow::Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(obs.sample_rate))
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(obs.service_name.clone())
                .build(),
        )
        .build())
}

/// Initialize compact stderr-only tracing for CLI one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Start the server with the given configuration.
async fn run_server(
    config: Arc<Config>,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!("lexchat starting");

    // ── Build shared state & spawn background loops ──────────────────
    let shutdown = CancellationToken::new();
    let state = bootstrap::build_app_state(config.clone(), shutdown.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors, &config.auth.dev_user_header);

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = config.server.max_concurrent_requests.max(1);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Rate-limit layer (per-IP token bucket via governor) ─────────
    let governor_layer = match config.server.rate_limit.as_ref() {
        Some(rl) => {
            use tower_governor::governor::GovernorConfigBuilder;
            use tower_governor::GovernorLayer;

            let gov_config = GovernorConfigBuilder::default()
                .per_second(rl.requests_per_second)
                .burst_size(rl.burst_size)
                .finish()
                .context("rate_limit: requests_per_second and burst_size must be > 0")?;

            tracing::info!(
                requests_per_second = rl.requests_per_second,
                burst_size = rl.burst_size,
                "per-IP rate limiting enabled"
            );

            Some(GovernorLayer {
                config: Arc::new(gov_config),
            })
        }
        None => {
            tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
            None
        }
    };

    // ── Router ───────────────────────────────────────────────────────
    let router = api::router(state.clone())
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state.clone())
    } else {
        router.with_state(state.clone())
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "lexchat listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context("axum server error")?;

    tracing::info!(open_websockets = state.connections.len(), "server stopped");

    // Flush and shut down the OTel tracer provider so pending spans
    // are exported before the process exits.
    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }

    tracing::info!("shutdown complete");

    Ok(())
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown` so open sockets and
/// background loops stop while axum drains in-flight requests.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )
        .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }

    shutdown.cancel();
}

const CORS_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Allowed origins split into literal values and `scheme://host:` prefixes
/// taken from entries written as `http://localhost:*`.
#[derive(Default)]
struct OriginRules {
    exact: Vec<HeaderValue>,
    any_port: Vec<String>,
}

impl OriginRules {
    fn parse(origins: &[String]) -> Self {
        let mut rules = Self::default();
        for origin in origins {
            if let Some(prefix) = origin.strip_suffix('*').filter(|p| p.ends_with(':')) {
                rules.any_port.push(prefix.to_owned());
                continue;
            }
            match origin.parse::<HeaderValue>() {
                Ok(value) => rules.exact.push(value),
                Err(_) => tracing::warn!(origin = %origin, "ignoring unparseable CORS origin"),
            }
        }
        rules
    }

    fn allows(&self, origin: &HeaderValue) -> bool {
        if self.exact.iter().any(|e| e == origin) {
            return true;
        }
        let Ok(origin) = origin.to_str() else {
            return false;
        };
        self.any_port.iter().any(|prefix| {
            origin.strip_prefix(prefix.as_str()).is_some_and(|port| {
                !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
            })
        })
    }
}

/// CORS for browser clients. `["*"]` opens every origin without
/// credentials; otherwise only the configured origins are echoed back.
fn build_cors_layer(cors: &lx_domain::config::CorsConfig, dev_user_header: &str) -> CorsLayer {
    use axum::http::header;

    let mut headers = vec![header::CONTENT_TYPE, header::AUTHORIZATION];
    if let Ok(name) = HeaderName::from_bytes(dev_user_header.as_bytes()) {
        headers.push(name);
    } else {
        tracing::warn!(header = %dev_user_header, "auth.dev_user_header is not a valid header name");
    }

    let base = CorsLayer::new()
        .allow_methods(CORS_METHODS)
        .allow_headers(headers);

    if matches!(cors.allowed_origins.as_slice(), [only] if only == "*") {
        tracing::warn!("CORS allows every origin");
        return base.allow_origin(tower_http::cors::Any);
    }

    let rules = OriginRules::parse(&cors.allowed_origins);
    let allow_origin = if rules.any_port.is_empty() {
        AllowOrigin::list(rules.exact)
    } else {
        AllowOrigin::predicate(move |origin, _| rules.allows(origin))
    };

    base.allow_origin(allow_origin).allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_rules_match_exact_and_any_port() {
        let rules = OriginRules::parse(&[
            "https://chat.example.com".to_owned(),
            "http://localhost:*".to_owned(),
        ]);
        let allows = |s: &str| rules.allows(&HeaderValue::from_str(s).unwrap());

        assert!(allows("https://chat.example.com"));
        assert!(allows("http://localhost:5173"));
        assert!(!allows("http://localhost:"));
        assert!(!allows("http://localhost:80x"));
        assert!(!allows("https://evil.example.com"));
    }
}
