use crate::{
    api::handlers::{account, health, root, token, verify},
    cli::globals::GlobalArgs,
    keys::{VaultKeyConfig, VaultKeyRegistry},
    session::{Argon2Verifier, SessionConfig, SessionManager},
    store::PgSessionStore,
    vault,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod handlers;
mod openapi;

pub use error::{ApiError, ErrorBody};
pub use openapi::openapi;

/// Server wiring read from the command line.
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub keys: VaultKeyConfig,
    pub key_reload_interval: Duration,
    pub session: SessionConfig,
}

/// All routes, with the verify middleware in front of `/v1/account/*`.
pub fn router(manager: Arc<SessionManager>) -> Router {
    let protected = Router::new()
        .route("/v1/account/verify-token", post(account::verify_token))
        .route("/v1/account/loadin", get(account::loadin))
        .route_layer(middleware::from_fn(verify::verify_session));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .route("/oauth2/token", post(token::token))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(manager)),
        )
}

/// Start the server.
///
/// # Errors
/// Returns an error if Vault, the database or the listener fail to come up.
pub async fn new(config: ServerConfig, globals: &GlobalArgs) -> Result<()> {
    // Renew vault token and db lease, gracefully shutdown if that fails
    let (tx, mut rx) = mpsc::unbounded_channel();

    vault::renew::try_renew(globals, tx).await?;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    let keys = Arc::new(
        VaultKeyRegistry::load(config.keys, globals.vault_token.clone())
            .await
            .context("Failed to load signing keys")?,
    );
    let reload = keys.clone().spawn_reload(config.key_reload_interval);

    let manager = Arc::new(SessionManager::new(
        Arc::new(PgSessionStore::new(pool)),
        keys,
        Arc::new(Argon2Verifier),
        config.session,
    ));

    let app = router(manager);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        rx.recv().await;
        info!("Gracefully shutdown");
    })
    .await?;

    reload.abort();

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http-request",
        method = %request.method(),
        route,
        request_id
    )
}
