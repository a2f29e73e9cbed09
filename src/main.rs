use pmp_session_api::{app, clock::SystemClock, config, handlers};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pmp_session_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match config::load_config_with_fallback() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let services = match app::build(&config, Arc::new(SystemClock)).await {
        Ok(services) => services,
        Err(e) => {
            tracing::error!("Failed to start session services: {}", e);
            std::process::exit(1);
        }
    };

    let sweeper = services.sweeper.clone();
    let sweeper_handle = config.sweeper.enabled.then(|| sweeper.clone().start());

    let app = handlers::router(services.state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("server.host and server.port must form a socket address");
    tracing::info!("Starting PMP Session API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind server address");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
    })
    .await
    .expect("server error");

    sweeper.stop();
    if let Some(handle) = sweeper_handle {
        handle.await.ok();
    }
}
