//! Keyhaven SSO Server
//!
//! Serves the public SSO endpoints (initiate, OIDC callback, SAML ACS, SP metadata)
//! and the organization-scoped connection admin API.
//!
//! ## Configuration
//!
//! Read from `config.toml` (or `KEYHAVEN_CONFIG`) with `KEYHAVEN_*` overrides.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `KEYHAVEN_HTTP_PORT` | `8080` | HTTP port |
//! | `KEYHAVEN_MONGODB_URI` | `mongodb://localhost:27017` | MongoDB connection URL |
//! | `KEYHAVEN_MONGODB_DATABASE` | `keyhaven` | MongoDB database name |
//! | `KEYHAVEN_SSO_BASE_URL` | `http://localhost:8080` | Public base URL |
//! | `KEYHAVEN_SSO_STORE` | `mongodb` | `mongodb` or `memory` |
//! | `KEYHAVEN_JWT_SECRET` | - | HS256 secret (generated when empty) |
//! | `KEYHAVEN_JWT_PRIVATE_KEY_PATH` | - | RSA private key PEM for RS256 |
//! | `KEYHAVEN_JWT_PUBLIC_KEY_PATH` | - | RSA public key PEM for RS256 |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::Router;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kh_config::{AppConfig, ConfigLoader, STORE_MEMORY};
use kh_sso::api::{sso_router, SsoApiState};
use kh_sso::connection::api::{sso_connections_router, ConnectionsApiState};
use kh_sso::shared::indexes::initialize_indexes;
use kh_sso::shared::middleware::AdminAuth;
use kh_sso::shared::random::generate_token;
use kh_sso::state::reaper::StateReaper;
use kh_sso::{
    AccountDirectory, ConnectionRepository, InMemoryAccountDirectory,
    InMemoryConnectionRepository, InMemoryStateRepository, JwtSessionConfig, JwtSessionIssuer,
    MongoAccountDirectory, MongoConnectionRepository, MongoStateRepository,
    SsoService, SsoSettings, StateRepository,
};

struct Stores {
    connections: Arc<dyn ConnectionRepository>,
    states: Arc<dyn StateRepository>,
    directory: Arc<dyn AccountDirectory>,
}

#[tokio::main]
async fn main() -> Result<()> {
    kh_common::logging::init_logging("kh-sso-server");

    info!("Starting Keyhaven SSO Server");

    let config = ConfigLoader::new().load().context("Failed to load configuration")?;

    let stores = open_stores(&config).await?;
    let sessions = Arc::new(build_session_issuer(&config)?);

    let settings = SsoSettings {
        base_url: config.base_url().to_string(),
        state_ttl: Duration::from_secs(config.sso.state_ttl_secs),
        clock_skew: Duration::from_secs(config.sso.clock_skew_secs),
        http_timeout: Duration::from_secs(config.sso.http_timeout_secs),
        metadata_cache_ttl: Duration::from_secs(config.sso.metadata_cache_ttl_secs),
    };
    let service = Arc::new(SsoService::new(
        settings,
        stores.connections,
        stores.states,
        stores.directory.clone(),
        sessions.clone(),
    )?);

    let reaper_task = if config.sso.reaper_interval_secs > 0 {
        let reaper = StateReaper::new(
            service.states().clone(),
            Duration::from_secs(config.sso.reaper_interval_secs),
        );
        Some(reaper.spawn())
    } else {
        info!("Login state reaper disabled");
        None
    };

    let connections_state = ConnectionsApiState {
        registry: service.registry().clone(),
        auth: AdminAuth::new(sessions, stores.directory),
    };

    let app = Router::new()
        .merge(sso_router(SsoApiState { service }))
        .nest("/api/organizations", sso_connections_router(connections_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.http.cors_origins));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("SSO server listening on http://{}", addr);
    info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received...");
    if let Some(task) = reaper_task {
        task.abort();
    }

    info!("Keyhaven SSO Server shutdown complete");
    Ok(())
}

async fn open_stores(config: &AppConfig) -> Result<Stores> {
    if config.sso.store == STORE_MEMORY {
        warn!("Using in-memory stores; connections and login state are lost on restart");
        return Ok(Stores {
            connections: Arc::new(InMemoryConnectionRepository::new()),
            states: Arc::new(InMemoryStateRepository::new()),
            directory: Arc::new(InMemoryAccountDirectory::new()),
        });
    }

    info!(
        "Connecting to MongoDB: {}/{}",
        config.mongodb.uri, config.mongodb.database
    );
    let client = mongodb::Client::with_uri_str(&config.mongodb.uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let db = client.database(&config.mongodb.database);

    initialize_indexes(&db)
        .await
        .context("Failed to initialize MongoDB indexes")?;

    Ok(Stores {
        connections: Arc::new(MongoConnectionRepository::new(&db)),
        states: Arc::new(MongoStateRepository::new(&db)),
        directory: Arc::new(MongoAccountDirectory::new(&db)),
    })
}

fn build_session_issuer(config: &AppConfig) -> Result<JwtSessionIssuer> {
    let jwt = &config.jwt;
    let mut session_config = JwtSessionConfig {
        issuer: jwt.issuer.clone(),
        audience: jwt.audience.clone(),
        access_token_expiry_secs: jwt.access_token_expiry_secs as i64,
        refresh_token_expiry_secs: jwt.refresh_token_expiry_secs as i64,
        ..Default::default()
    };

    if jwt.uses_rsa_keys() {
        let private_key = std::fs::read_to_string(&jwt.private_key_path)
            .with_context(|| format!("Failed to read {}", jwt.private_key_path))?;
        let public_key = std::fs::read_to_string(&jwt.public_key_path)
            .with_context(|| format!("Failed to read {}", jwt.public_key_path))?;
        session_config.rsa_private_key = Some(private_key);
        session_config.rsa_public_key = Some(public_key);
    } else if jwt.secret.is_empty() {
        warn!("No JWT secret configured; generated an ephemeral one, sessions will not survive a restart");
        session_config.secret_key = generate_token();
    } else {
        session_config.secret_key = jwt.secret.clone();
    }

    Ok(JwtSessionIssuer::new(session_config)?)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
