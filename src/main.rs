use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use traffic_sign_classifier::{config, start_app};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration()?;
    let log_level = &format!("{},ort=info", config.log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_level(true)
                .with_thread_names(true),
        )
        .init();

    // One process, a couple of request threads, one shared model.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(start_app(config))
}
