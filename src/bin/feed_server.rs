// Feed service - HTTP feed + RPC bridge + post/user event ingestor

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use social_graph::{
    api::create_feed_app,
    app_state::{Adapters, FeedState, FEED_SERVICE},
    config::{Config, EnvSecretProvider, Secrets, FEED_DEFAULT_ADDRESS},
    infrastructure::monitoring::init_tracing,
    services::{ingestor::declare_topology, FEED_ROUTES},
};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env(FEED_DEFAULT_ADDRESS)?;
    let metrics = init_tracing(config.server.environment);
    let secrets = Secrets::load(&EnvSecretProvider).await?;

    let adapters = Adapters::open(&secrets, &config, metrics).await?;
    let (state, ingestor) = FeedState::build(&adapters, &config, &secrets.jwt);
    declare_topology(adapters.bus.as_ref(), FEED_SERVICE, FEED_ROUTES).await?;

    let shutdown = Arc::new(Notify::new());
    let consumer = Arc::new(ingestor).spawn(shutdown.clone());

    let app = create_feed_app(state);
    let address = config.server_address();
    let listener = TcpListener::bind(&address).await?;
    info!(%address, environment = %config.server.environment, "Feed service listening");

    let bus = adapters.bus.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutting down: stopping consumers, draining requests");
            shutdown.notify_waiters();
            if let Err(e) = bus.close().await {
                warn!(error = %e, "Cannot close the message bus");
            }
        })
        .await?;

    consumer.await??;
    info!("Feed service stopped");
    Ok(())
}
