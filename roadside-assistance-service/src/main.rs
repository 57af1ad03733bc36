use anyhow::Context as _;
use axum::{
    http::{HeaderValue, Request},
    middleware::{Next, from_fn},
};
use roadside_assistance_service::{AppState, LogFormat, ServiceConfig, build_router};
use tracing::{Instrument, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured tracing; `LOG_FORMAT=pretty` switches to human-readable output.
fn init_tracing(log_format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "roadside_assistance_service=debug,tower_http=debug".into()
    });

    match log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("failed to read configuration")?;
    init_tracing(config.log_format);

    let app_state = AppState::from_config(&config);
    let app = build_router(app_state).layer(from_fn(correlation_id_middleware));

    let address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    info!("Server running on http://{}", address);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
