//! HTTP 网关
//!
//! `/health` 无需鉴权；`/v1/*` 依次经过限流与鉴权中间件。

pub mod auth;
pub mod rate_limit;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/v1/chat/completions", post(routes::chat_completions))
        .route("/v1/web/search", post(routes::web_search))
        .route("/v1/news", post(routes::news))
        .route("/v1/images/search", post(routes::image_search))
        .route("/v1/models", get(routes::list_models).post(routes::list_models))
        .route("/v1/memory", get(routes::get_memory))
        .route("/v1/memory/facts", post(routes::add_fact))
        .route("/v1/memory/profile", post(routes::update_profile))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), auth::require_auth))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), rate_limit::enforce));

    Router::new()
        .route("/health", get(routes::health))
        .merge(v1)
        .with_state(state)
}

/// 绑定地址并运行直到出错；保留连接信息供限流按 IP 计数
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Nexa gateway listening on http://{}", listener.local_addr()?);

    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
}
