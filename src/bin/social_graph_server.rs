// Social graph service - HTTP + RPC bridge + user event ingestor

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

use social_graph::{
    api::create_social_graph_app,
    app_state::{Adapters, SocialGraphState, SOCIAL_GRAPH_SERVICE},
    config::{Config, EnvSecretProvider, Secrets, SOCIAL_GRAPH_DEFAULT_ADDRESS},
    infrastructure::monitoring::init_tracing,
    services::{ingestor::declare_topology, SOCIAL_GRAPH_ROUTES},
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
    let config = Config::from_env(SOCIAL_GRAPH_DEFAULT_ADDRESS)?;
    let metrics = init_tracing(config.server.environment);
    let secrets = Secrets::load(&EnvSecretProvider).await?;

    let adapters = Adapters::open(&secrets, &config, metrics).await?;
    let (state, ingestor) = SocialGraphState::build(&adapters, &config, &secrets.jwt);
    declare_topology(adapters.bus.as_ref(), SOCIAL_GRAPH_SERVICE, SOCIAL_GRAPH_ROUTES).await?;

    let shutdown = Arc::new(Notify::new());
    let consumer = Arc::new(ingestor).spawn(shutdown.clone());

    let app = create_social_graph_app(state);
    let address = config.server_address();
    let listener = TcpListener::bind(&address).await?;
    info!(%address, environment = %config.server.environment, "Social graph service listening");

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
    info!("Social graph service stopped");
    Ok(())
}
