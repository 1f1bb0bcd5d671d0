use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use time;
use tokio::sync::broadcast;

use crate::clients::{LogMailer, Mailer, MailjetClient};
use crate::config::Config;
use crate::db::Store;
use crate::services::{IdentityService, SeaOrmIdentityService};
use crate::token::TokenCodec;

pub mod auth;
mod error;
pub mod events;
mod observability;
pub mod reset_password;
mod system;
mod types;
pub mod validate_email;

pub use error::ApiError;
pub use events::NotificationEvent;
pub use types::FlowResponse;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    pub store: Store,

    pub identity: Arc<dyn IdentityService>,

    pub event_bus: broadcast::Sender<NotificationEvent>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let store = Store::with_pool_options(
        &config.general.database_path,
        config.general.max_db_connections,
        config.general.min_db_connections,
    )
    .await?;

    let (event_bus, _) = broadcast::channel(config.general.event_bus_buffer_size);

    let tokens = TokenCodec::new(&config.auth.secret_key);

    let mailer: Arc<dyn Mailer> = if config.mail.enabled {
        Arc::new(MailjetClient::new(&config.mail)?)
    } else {
        Arc::new(LogMailer)
    };

    let identity = Arc::new(SeaOrmIdentityService::new(
        store.clone(),
        tokens,
        mailer,
        config.clone(),
        event_bus.clone(),
    )) as Arc<dyn IdentityService>;

    Ok(Arc::new(AppState {
        config,
        store,
        identity,
        event_bus,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    }))
}

pub async fn router(state: Arc<AppState>) -> Router {
    let (cors_origins, secure_cookies, session_minutes) = (
        state.config.server.cors_allowed_origins.clone(),
        state.config.server.secure_cookies,
        state.config.server.session_lifetime_minutes,
    );

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            session_minutes,
        )));

    // Routes behind the email-validation gate.
    let gated_routes = Router::new()
        .route("/home", get(auth::home))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::email_validation_required,
        ));

    let identity_routes = Router::new()
        .route("/", get(auth::splash))
        .route("/register", get(auth::register_form))
        .route("/register", post(auth::register))
        .route("/login", get(auth::login_form))
        .route("/login", post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/confirm-email", get(validate_email::confirm_email))
        .route(
            "/send-validation-email",
            post(validate_email::send_validation_email),
        )
        .route("/validate/expired", get(validate_email::validation_expired))
        .route("/validate/{token}", get(validate_email::validate_token))
        .route(
            "/forgot-password",
            get(reset_password::forgot_password_form),
        )
        .route("/forgot-password", post(reset_password::forgot_password))
        .route(
            "/reset-password/{token}",
            get(reset_password::reset_password_form),
        )
        .route(
            "/reset-password/{token}",
            post(reset_password::reset_password),
        );

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .merge(gated_routes)
        .merge(identity_routes)
        .route("/health", get(system::health))
        .route("/metrics", get(observability::get_metrics))
        .layer(session_layer)
        .with_state(state)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(middleware::from_fn(
            observability::security_headers_middleware,
        ))
}
