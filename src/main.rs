use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{any, get, post},
};
use clap::Parser;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

mod auth;
mod config;
mod observability;
mod routes;
mod saml;
#[cfg(test)]
mod tests;
mod validation;

use crate::{
    auth::{MemorySessionStore, SignIn},
    config::SpConfig,
    saml::{MetadataCache, MetadataProvider, SamlError, SamlHandler, SamlOptions},
};

/// How often expired local sessions are swept.
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SpConfig>,
    pub saml: Arc<SamlHandler>,
    /// Same provider the handler uses; shared for health checks.
    pub metadata: Arc<dyn MetadataProvider>,
    pub sessions: Arc<dyn SignIn>,
}

impl AppState {
    /// Wire the SAML handler and session store around a metadata provider.
    pub fn new(config: SpConfig, metadata: Arc<dyn MetadataProvider>) -> Result<Self, SamlError> {
        let mut options = SamlOptions::new(config.saml.sp_metadata()?, &config.saml.idp_metadata);
        options.callback_path = config.saml.callback_path.clone();
        options.force_authn = config.saml.force_authn;

        let saml = SamlHandler::new(
            options,
            metadata.clone(),
            config.saml.relay_state_protector()?,
        );
        let sessions = MemorySessionStore::new(Duration::from_secs(config.session.duration_secs));

        Ok(Self {
            config: Arc::new(config),
            saml: Arc::new(saml),
            metadata,
            sessions: Arc::new(sessions),
        })
    }

    /// Build state with the process-wide metadata cache.
    pub fn from_config(config: SpConfig) -> Result<Self, StartupError> {
        let http_client = config.server.http_client.build_client()?;
        let cache = MetadataCache::new(http_client)
            .with_require_https(config.saml.require_https_metadata);
        Ok(Self::new(config, Arc::new(cache))?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Saml(#[from] SamlError),
}

pub fn build_app(config: &SpConfig, state: AppState) -> Router {
    let callback = config.saml.callback_path.trim_end_matches('/');

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route(&format!("{callback}/login"), get(routes::saml::saml_login))
        .route(&format!("{callback}/me"), get(routes::saml::me))
        .route(&format!("{callback}/logout"), post(routes::saml::logout))
        .route(callback, any(routes::saml::saml_callback))
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}

/// CLI arguments for the SAML service provider
#[derive(Parser, Debug)]
#[command(version, about = "SAML 2.0 service provider", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "samlsp.toml")]
    config: String,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Print the SP metadata document
    Metadata {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Print a fresh relay-state secret
    GenerateSecret,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Metadata { output }) => run_metadata_export(&args.config, output),
        Some(Command::GenerateSecret) => println!("{}", saml::relay_state::generate_secret()),
        Some(Command::Serve) | None => run_server(&args.config).await,
    }
}

fn load_config(config_path: &str) -> SpConfig {
    match SpConfig::from_file(Path::new(config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", config_path, e);
            std::process::exit(1);
        }
    }
}

fn run_metadata_export(config_path: &str, output: Option<String>) {
    let config = load_config(config_path);
    let metadata = match config.saml.sp_metadata() {
        Ok(sp) => sp.to_xml(),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, metadata) {
                eprintln!("Failed to write metadata to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("SP metadata written to {}", path);
        }
        None => println!("{}", metadata),
    }
}

async fn run_server(config_path: &str) {
    let config = load_config(config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    tracing::info!(
        config_file = %config_path,
        sp_entity_id = %config.saml.sp_entity_id,
        idp_metadata = %config.saml.idp_metadata,
        "Starting SAML service provider"
    );

    if !config.session.secure {
        tracing::warn!("session.secure is disabled; the session cookie will be sent over HTTP");
    }

    let state = match AppState::from_config(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize");
            std::process::exit(1);
        }
    };

    // Warm the metadata cache; a failure here is retried on first login
    if let Err(e) = state.metadata.get(&config.saml.idp_metadata).await {
        tracing::warn!(error = %e, "IdP metadata not available at startup");
    }

    let sessions = state.sessions.clone();
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match sessions.cleanup().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Removed expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
        }
    });

    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, address = %bind_addr, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    cleanup.abort();
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
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

    tracing::info!("Shutdown signal received");
}
