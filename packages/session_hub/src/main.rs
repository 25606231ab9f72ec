use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use messaging_client::MessagingNetwork;
use messaging_client::sandbox::SandboxNetwork;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod db;
mod dispatch;
mod error;
mod events;
mod handlers;
mod manager;
mod metrics;
mod pairing;
mod registry;
mod repository;
mod session;
mod tenant;
#[cfg(test)]
mod test_helpers;

use crate::config::{AuthConfig, FileConfig, HubConfig, SandboxConfig, SessionsConfig};
use crate::db::Database;
use crate::manager::SessionManager;
use crate::metrics::HubMetrics;
use crate::repository::HubRepository;
use crate::tenant::{TenantId, TenantState};

/// Uploads larger than this are rejected before reaching the handler
const MAX_MEDIA_BYTES: usize = 64 * 1024 * 1024;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "hub")]
#[command(about = "Multi-tenant messaging session hub")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.session-hub)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server in the foreground
    Serve(ServeArgs),

    /// Manage API tokens
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Parser)]
struct ServeArgs {
    /// Host to bind to (overrides [server] host)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Mint a token for a tenant; it is printed once and only its hash is stored
    Create {
        #[arg(long)]
        tenant: u64,

        /// Free-form note stored next to the token
        #[arg(long)]
        label: Option<String>,
    },

    /// Revoke a previously minted token
    Revoke { token: String },
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub manager: SessionManager,
    pub repository: HubRepository,
    pub db: Arc<Database>,
    /// Hub metrics for observability
    pub metrics: Arc<HubMetrics>,
    #[allow(dead_code)]
    pub config: Arc<HubConfig>,
    /// Tenant authentication configuration
    pub auth_config: Arc<AuthConfig>,
    /// Present when the sandbox operator routes are enabled
    pub sandbox: Option<SandboxNetwork>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HubConfig::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Serve(args) => run_server(args, config).await,
        Commands::Token(command) => run_token_command(command, config).await,
    }
}

async fn run_token_command(command: TokenCommand, config: HubConfig) -> Result<()> {
    let db = Database::new(&config).await?;
    let repository = HubRepository::new(db.pool.clone());

    match command {
        TokenCommand::Create { tenant: id, label } => {
            let token = tenant::generate_token();
            repository
                .insert_api_token(&tenant::hash_token(&token), TenantId(id), label.as_deref())
                .await
                .context("Failed to store API token")?;
            println!("Token for tenant {} (shown once, store it now):", id);
            println!("{}", token);
        }
        TokenCommand::Revoke { token } => {
            if repository
                .revoke_api_token(&tenant::hash_token(token.trim()))
                .await?
            {
                println!("Token revoked.");
            } else {
                println!("No active token matched.");
            }
        }
    }
    Ok(())
}

/// Assemble every route; tenant routes sit behind the token middleware
pub(crate) fn build_router(state: AppState) -> Router {
    let tenant_state = TenantState {
        repository: state.repository.clone(),
        auth_config: state.auth_config.clone(),
    };

    let session_routes = Router::new()
        .route("/connect", post(handlers::connect_handler))
        .route("/disconnect", post(handlers::disconnect_handler))
        .route("/send-message", post(handlers::send_message_handler))
        .route(
            "/send-media",
            post(handlers::send_media_handler).layer(DefaultBodyLimit::max(MAX_MEDIA_BYTES)),
        )
        .route("/qr-code", get(handlers::qr_code_handler))
        .route("/check-connection", post(handlers::check_connection_handler))
        .route("/status", get(handlers::status_handler))
        .route("/contacts", get(handlers::contacts_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            tenant_state,
            tenant::tenant_middleware,
        ));

    let mut app = Router::new()
        .nest("/api/session", session_routes)
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler));

    if state.sandbox.is_some() {
        let sandbox_routes = Router::new()
            .route("/{tenant}/scan", post(handlers::scan_handler))
            .route("/{tenant}/inbound", post(handlers::inbound_handler))
            .route("/{tenant}/drop", post(handlers::drop_handler))
            .route_layer(axum::middleware::from_fn(tenant::loopback_only));
        app = app.nest("/api/sandbox", sandbox_routes);
    }

    app.layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_server(args: ServeArgs, config: HubConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "hub=debug,session_hub=debug,tower_http=debug,info"
    } else {
        "hub=info,session_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting session hub");

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .with_context(|| {
            format!(
                "Invalid configuration in {} or HUB_* environment",
                config.config_toml_path().display()
            )
        })?;
    let sessions_config = SessionsConfig::from_file(&file_config.sessions);
    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth));
    let sandbox_config = SandboxConfig::from_file(&file_config.sandbox);

    if !auth_config.enabled {
        info!("Tenant auth disabled: loopback callers may use the X-Tenant-Id header");
    }

    let config = Arc::new(config);

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = HubRepository::new(db.pool.clone());
    let known = repository.count_session_statuses().await?;
    info!("{} tenant(s) with recorded session status", known);

    let metrics = Arc::new(HubMetrics::new());
    let network = SandboxNetwork::new(sandbox_config.network_config());
    let manager = SessionManager::new(
        Arc::new(network.clone()) as Arc<dyn MessagingNetwork>,
        repository.clone(),
        metrics.clone(),
        sessions_config,
    );
    if sandbox_config.enabled {
        info!("Sandbox operator routes enabled under /api/sandbox (loopback only)");
    }

    let app_state = AppState {
        manager: manager.clone(),
        repository,
        db,
        metrics,
        config,
        auth_config,
        sandbox: sandbox_config.enabled.then_some(network),
    };
    let app = build_router(app_state);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(8080);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Session hub listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET    /api/session/qr-code          - Start pairing, returns a code");
    info!("  POST   /api/session/connect          - Mark a paired session connected");
    info!("  POST   /api/session/send-message     - Send a text message");
    info!("  POST   /api/session/send-media       - Send an image, video, audio or document");
    info!("  GET    /api/session/status           - Session status");

    // Create shutdown signal handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    info!("Tearing down sessions...");
    manager.shutdown_all().await;

    info!("Shutdown complete");
    server_result
}
