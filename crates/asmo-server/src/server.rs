use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use asmo_notion::{MemoryDatabases, MemoryService, NotionClient, NotionError, NotionVerifier, TokenVerifier};
use asmo_relay::{RelayConfig, WebhookRelay};
use asmo_store::{AuthRepo, Database, StoreError, DEFAULT_USER_ID};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use dashmap::DashMap;
use secrecy::ExposeSecret;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::{self, webhook_config::WebhookConfig};
use crate::ratelimit::{self, RateLimiter};
use crate::socket;

/// How long `shutdown` waits for in-flight requests before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("notion client error: {0}")]
    Notion(#[from] NotionError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<WebhookRelay>,
    pub auth: Arc<AuthRepo>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Present when a server-side Notion token and chat memories database
    /// are configured.
    pub memory: Option<Arc<MemoryService>>,
    pub webhook_configs: Arc<DashMap<String, WebhookConfig>>,
    /// Outbound client for webhook-config test deliveries.
    pub http: reqwest::Client,
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let relay = WebhookRelay::new(RelayConfig {
            deadline: config.relay_timeout(),
            require_initialized: config.require_notion_token,
        });

        let auth = AuthRepo::new(Database::in_memory()?);
        auth.seed_user(DEFAULT_USER_ID, config.pin.expose_secret())?;

        let memory = match (&config.notion_token, &config.chat_memories_db) {
            (Some(token), Some(chat_memories)) => {
                let client = NotionClient::with_base_url(token.clone(), config.notion_api_url.clone())?;
                let databases = MemoryDatabases {
                    chat_memories: chat_memories.clone(),
                    memory_areas: config.memory_areas_db.clone(),
                    memory_groups: config.memory_groups_db.clone(),
                };
                Some(Arc::new(MemoryService::new(client, databases)))
            }
            _ => {
                tracing::info!("Memory routes disabled: NOTION_TOKEN or DB_CHAT_MEMORIES not set");
                None
            }
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            relay: Arc::new(relay),
            auth: Arc::new(auth),
            verifier: Arc::new(NotionVerifier::new(config.notion_api_url.clone())),
            memory,
            webhook_configs: Arc::new(DashMap::new()),
            http,
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                Duration::from_secs(config.rate_limit_window_secs),
            )),
            config: Arc::new(config),
        })
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-notion-token"),
            HeaderName::from_static("api-key"),
        ])
        .allow_credentials(true);
    match config
        .frontend_url
        .as_deref()
        .and_then(|origin| origin.parse::<HeaderValue>().ok())
    {
        Some(origin) => layer.allow_origin(origin),
        None => layer,
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/health", get(handlers::webhook::health))
        .route("/webhook/{id}", post(handlers::webhook::relay))
        .route("/hook/{id}", post(handlers::webhook::relay))
        .route("/api/webhook/{id}", post(handlers::webhook::relay))
        .route("/api/webhook/{id}/ping", post(handlers::webhook::ping))
        .route(
            "/api/webhook-config",
            get(handlers::webhook_config::list).post(handlers::webhook_config::configure),
        )
        .route(
            "/api/webhook-config/{database_id}",
            delete(handlers::webhook_config::remove),
        )
        .route("/api/validate-token", post(handlers::notion::validate_token))
        .route("/api/validate-key", post(handlers::notion::validate_key))
        .route("/api/databases", get(handlers::notion::databases))
        .route(
            "/api/auth",
            post(handlers::auth::login).get(handlers::auth::session_status),
        )
        .route("/api/logout", post(handlers::auth::logout))
        .route("/api/memory", post(handlers::memory::store))
        .route("/api/memory/search", post(handlers::memory::search))
        .route("/api/memory/group", post(handlers::memory::group));

    if let Some(dir) = &state.config.static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    let cors = cors_layer(&state.config);
    let limiter = Arc::clone(&state.limiter);

    router
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, ratelimit::rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
    let state = AppState::new(config)?;

    let cleanup = socket::start_cleanup_task(
        state.clone(),
        Duration::from_secs(state.config.cleanup_interval_secs),
    );

    let router = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        host = %state.config.host,
        port = local_addr.port(),
        static_dir = ?state.config.static_dir,
        "Asmo relay started"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state,
        shutdown_tx,
        server,
        cleanup,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive until
/// `shutdown` is called or the handle is dropped.
pub struct ServerHandle {
    pub port: u16,
    state: AppState,
    shutdown_tx: oneshot::Sender<()>,
    server: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl ServerHandle {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop accepting connections and wait briefly for in-flight requests.
    pub async fn shutdown(self) {
        let Self {
            shutdown_tx,
            mut server,
            cleanup,
            ..
        } = self;
        cleanup.abort();
        let _ = shutdown_tx.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            tracing::warn!("Graceful shutdown timed out, aborting");
            server.abort();
        }
        tracing::info!("Asmo relay stopped");
    }
}
