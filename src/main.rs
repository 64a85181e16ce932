use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webhook_coalescer::coalescer::{CoalescerConfig, EventCoalescer};
use webhook_coalescer::config::Config;
use webhook_coalescer::dispatch::{Dispatcher, HttpContributionSink};
use webhook_coalescer::http_server::{app_router, AppState};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing();

    let sink = Arc::new(HttpContributionSink::new(
        &config.contribution_api_url,
        config.contribution_api_token.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(sink));
    let coalescer = EventCoalescer::new(
        dispatcher,
        CoalescerConfig {
            debounce: config.debounce,
            dlq_capacity: config.dlq_capacity,
        },
    );

    let state = AppState {
        coalescer,
        signature: config.signature(),
    };
    let router = app_router(state);

    tracing::info!(
        "listening on {}, debounce {}s",
        config.listen_addr,
        config.debounce.as_secs()
    );
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
