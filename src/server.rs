use crate::config::{AppConfig, LOCAL_SDK_PATH};
use crate::headers::ResponseHeaderTable;
use crate::proxy::SdkCache;
use crate::rewrite::RewriteTable;
use axum::Router;
use axum::routing::{delete, get};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub sdk_cache: Arc<SdkCache>,
    pub rewrites: Arc<RewriteTable>,
}

impl AppState {
    /// State with the default vendor rewrites for `config`.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let rewrites = RewriteTable::defaults(&config.vendor);
        Self::with_rewrites(config, rewrites)
    }

    pub fn with_rewrites(config: AppConfig, rewrites: RewriteTable) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Self {
            sdk_cache: Arc::new(SdkCache::new(config.sdk_cache_ttl)),
            config: Arc::new(config),
            http,
            rewrites: Arc::new(rewrites),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let headers = ResponseHeaderTable::from_config(&state.config);
    tracing::debug!(response_headers = headers.len(), "building router");
    let router = Router::new()
        .route(
            LOCAL_SDK_PATH,
            get(crate::proxy::serve_sdk)
                .options(crate::proxy::preflight)
                .fallback(crate::proxy::method_not_allowed),
        )
        .route("/_editor/config", get(crate::api::editor_config))
        .route("/_editor/bootstrap.js", get(crate::api::serve_bootstrap_script))
        .route("/_editor/cache", delete(crate::api::clear_cache))
        .route("/healthz", get(|| async { "ok" }))
        .fallback(crate::rewrite::forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    headers.apply(router)
}

pub async fn run(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    for rule in state.rewrites.rules() {
        tracing::debug!(prefix = rule.prefix(), "rewrite rule");
    }
    tracing::info!(
        rewrites = state.rewrites.rules().len(),
        sdk = %state.config.sdk_upstream_url,
        "listening"
    );
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
