use anyhow::Result;
use tidegate_server::config::Config;
use tidegate_server::gate;
use tidegate_server::transport::{Transport, http::HttpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tidegate={}", config.log_level).parse()?),
        )
        .init();

    let gate = gate::build(&config);

    tracing::info!(
        "default policy: {} requests / {}s window, burst ceiling {}",
        config.max_requests,
        config.window.as_secs(),
        config.burst_capacity
    );
    tracing::info!(
        "{} route rule(s), ban after {} violations for {}s, {}",
        config.rules.len(),
        config.ban_threshold,
        config.ban_duration.as_secs(),
        if config.fail_closed { "fail-closed" } else { "fail-open" }
    );

    let transport = HttpTransport::new(&config.host, config.port);
    transport.start(gate).await
}
