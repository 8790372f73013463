use std::sync::Arc;

use syncrelay::core::config::Config;
use syncrelay::core::credentials::CredentialsManager;
use syncrelay::core::relay::{GatewayState, MessageRelay, RoomManager, RoomRegistry};

#[tokio::main]
async fn main() {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load application config from environment variables
    let config = Config::from_env();

    let credentials = match CredentialsManager::from_env() {
        Ok(credentials) => Arc::new(credentials),
        Err(e) => {
            tracing::error!("credentials setup failed: {e}");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(RoomRegistry::new(config.max_guests_per_room));
    let relay = Arc::new(MessageRelay::new(
        Arc::clone(&registry),
        config.request_timeout,
    ));
    let manager = Arc::new(RoomManager::new(registry, relay, credentials));
    let state = GatewayState::new(manager, config.channel_buffer);

    // Optional framed-TCP transport
    if let Some(tcp_addr) = &config.tcp_addr {
        let listener = match tokio::net::TcpListener::bind(tcp_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("failed to bind tcp listener on {tcp_addr}: {e}");
                std::process::exit(1);
            }
        };
        tracing::info!("tcp transport listening on {tcp_addr}");
        let tcp_state = state.clone();
        tokio::spawn(syncrelay::core::relay::serve_tcp(listener, tcp_state));
    }

    // WebSocket endpoint: ws://{host}/connect
    let app = syncrelay::core::relay::router(state);

    let listener = match tokio::net::TcpListener::bind(&config.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {e}", config.http_addr);
            std::process::exit(1);
        }
    };
    tracing::info!("websocket transport listening on {}", config.http_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
