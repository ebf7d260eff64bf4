//! HTTP server setup and pipeline composition.
//!
//! # Responsibilities
//! - Build the shared registries once and inject them into handlers
//! - Wire up middleware in pipeline order
//! - Bind server to listener (plain TCP or TLS)
//! - Own the background sweeps for the server's lifetime
//!
//! # Layer Order (outermost first)
//! ```text
//! trace → request id → metrics → audit → security headers → request deadline
//!     → body limit → general per-IP limiter → route group guards → handler
//! ```
//! Audit sits outside every guard and the deadline so rejected and timed-out
//! requests are recorded too.

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::request::{propagate_request_id_layer, set_request_id_layer};
use crate::auth::middleware::ADMIN_ROLES;
use crate::auth::{require_auth, require_roles, AuthState, RevocationStore, TokenValidator};
use crate::config::schema::INSECURE_DEFAULT_SECRET;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::lifecycle::{MaintenanceTask, Shutdown};
use crate::observability::audit::{audit_middleware, AuditSink, AuditState, TracingAuditSink};
use crate::observability::metrics::track_requests;
use crate::resilience::{request_deadline_middleware, CircuitBreakerRegistry};
use crate::security::headers::security_headers_middleware;
use crate::security::limits::body_limit_layer;
use crate::security::rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter, RateLimiters};

/// How long in-flight requests get to finish after shutdown is triggered.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub validator: Arc<TokenValidator>,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
    limiters: RateLimiters,
}

impl GatewayServer {
    /// Create a server that writes audit records to the `audit` log target.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_audit_sink(config, Arc::new(TracingAuditSink))
    }

    pub fn with_audit_sink(
        config: GatewayConfig,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self, GatewayError> {
        if config.auth.enabled && config.auth.jwt_secret == INSECURE_DEFAULT_SECRET {
            tracing::warn!("JWT secret is the insecure default; set JWT_SECRET before deploying");
        }

        let breakers = Arc::new(CircuitBreakerRegistry::new(&config.circuit_breaker));
        let dispatcher = Arc::new(Dispatcher::from_config(&config, breakers.clone())?);
        let validator = Arc::new(TokenValidator::new(
            &config.auth.jwt_secret,
            Arc::new(RevocationStore::new()),
        ));
        let limiters = RateLimiters::from_config(&config.rate_limit);

        let state = AppState {
            dispatcher,
            breakers,
            validator,
        };

        let router = Self::build_router(&config, state.clone(), &limiters, audit_sink);
        Ok(Self {
            router,
            config,
            state,
            limiters,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        config: &GatewayConfig,
        state: AppState,
        limiters: &RateLimiters,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Router {
        let limit = |limiter: &Arc<RateLimiter>| RateLimitState {
            limiter: Arc::clone(limiter),
            enabled: limiters.enabled,
        };
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);
        let auth = AuthState {
            validator: state.validator.clone(),
            enabled: config.auth.enabled,
        };

        let public = Router::new()
            .route("/health", get(handlers::health))
            .route("/health/circuit-breakers", get(handlers::breaker_status));

        let credentials = Router::new()
            .route("/auth/login", post(handlers::login))
            .route("/auth/refresh", post(handlers::refresh))
            .route_layer(middleware::from_fn_with_state(limit(&limiters.login), rate_limit_middleware));

        let api = Router::new()
            .route("/api/v1/auth/logout", post(handlers::logout))
            .route("/api/v1/auth/me", get(handlers::me))
            .route("/api/v1/auth/change-password", put(handlers::change_password))
            .route("/api/v1/albums", get(handlers::list_albums).post(handlers::create_album))
            .route(
                "/api/v1/albums/{id}",
                get(handlers::get_album)
                    .put(handlers::update_album)
                    .delete(handlers::delete_album),
            )
            .route_layer(middleware::from_fn_with_state(auth.clone(), require_auth));

        // Innermost first: the admin limiter keys on the identity that
        // require_auth resolves.
        let admin = Router::new()
            .route("/admin/users", get(handlers::list_users).post(handlers::create_user))
            .route(
                "/admin/users/{id}",
                get(handlers::get_user)
                    .put(handlers::update_user)
                    .delete(handlers::delete_user),
            )
            .route("/admin/users/{id}/roles", post(handlers::assign_role))
            .route("/admin/users/{id}/roles/{role}", axum::routing::delete(handlers::remove_role))
            .route("/admin/roles", get(handlers::list_roles))
            .route("/admin/system/stats", get(handlers::system_stats))
            .route("/admin/audit-logs", get(handlers::audit_logs))
            .route("/admin/circuit-breakers/{service}/reset", post(handlers::reset_breaker))
            .route_layer(middleware::from_fn_with_state(limit(&limiters.admin), rate_limit_middleware))
            .route_layer(middleware::from_fn_with_state(ADMIN_ROLES, require_roles))
            .route_layer(middleware::from_fn_with_state(auth, require_auth));

        let mut router = Router::new()
            .merge(public)
            .merge(credentials)
            .merge(api)
            .merge(admin)
            .fallback(handlers::not_found)
            .with_state(state)
            .layer(middleware::from_fn_with_state(limit(&limiters.general), rate_limit_middleware))
            .layer(body_limit_layer(&config.security))
            .layer(middleware::from_fn_with_state(request_timeout, request_deadline_middleware));

        if config.security.enable_headers {
            router = router.layer(middleware::from_fn(security_headers_middleware));
        }
        if config.security.audit_enabled {
            let audit = AuditState {
                sink: audit_sink,
                max_body_size: config.security.max_body_size,
                request_timeout,
            };
            router = router.layer(middleware::from_fn_with_state(audit, audit_middleware));
        }

        router
            .layer(middleware::from_fn(track_requests))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The assembled router, for in-process use without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Start the background sweeps owned by this server.
    pub fn start_maintenance(&self, shutdown: &Shutdown) -> Vec<MaintenanceTask> {
        let mut tasks = if self.limiters.enabled {
            self.limiters.start_sweepers(shutdown)
        } else {
            Vec::new()
        };
        if self.config.auth.enabled {
            tasks.push(self.state.validator.revocations().start_sweeper(
                Duration::from_secs(self.config.auth.revocation_sweep_secs),
                shutdown.subscribe(),
            ));
        }
        tasks
    }

    /// Run the server until `shutdown` fires, then drain and stop the sweeps.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let tasks = self.start_maintenance(&shutdown);
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        match &self.config.listener.tls {
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                let mut rx = shutdown.subscribe();
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = rx.recv().await;
                    })
                    .await?;
            }
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                tracing::info!(address = %addr, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                let mut rx = shutdown.subscribe();
                tokio::spawn(async move {
                    let _ = rx.recv().await;
                    drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        for task in tasks {
            task.stop().await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Load TLS configuration from certificate and key files.
async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    for path in [cert_path, key_path] {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("TLS file not found: {}", path.display()),
            ));
        }
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}
