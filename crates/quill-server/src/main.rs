//! quill-server: HTTP entry point for the generation gateway.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use quill::{AppConfig, GenerationService, HttpGenerator, QUILL_VERSION, transport::serve};

/// Filter directives for a `QUILL_LOG` level, used when `RUST_LOG` is unset.
fn filter_directives(quill_log: Option<&str>) -> String {
    let level = match quill_log {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("quill={level},quill_server={level}")
}

/// Initialize tracing with QUILL_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directives(std::env::var("QUILL_LOG").ok().as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("quill {}", QUILL_VERSION);

    let config = AppConfig::from_env()?;
    info!(
        max_concurrent = config.gate.max_concurrent,
        max_queued = ?config.gate.max_queued,
        queue_timeout = ?config.gate.queue_timeout,
        model = %config.provider.model,
        provider = %config.provider.base_url,
        "Loaded configuration"
    );
    if config.provider.api_key.is_none() {
        tracing::warn!("QUILL_PROVIDER_API_KEY not set, provider requests are unauthenticated");
    }

    let generator = Arc::new(HttpGenerator::new(config.provider.clone())?);
    let service = Arc::new(GenerationService::from_config(&config.gate, generator));

    serve(config.server, service).await
}
