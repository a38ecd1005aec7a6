//! API 路由模块
//!
//! # 结构
//!
//! - [`health`] - 健康检查
//! - [`plates`] - 盘子报告上报、查询、计数和实时推送
//!
//! 所有路由在 [`build_app`] 中合并，并挂载日志、CORS、压缩中间件。

pub mod health;
pub mod middleware;
pub mod plates;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use crate::core::ServerState;

/// Build the Axum router (without state)
pub fn build_router() -> Router<ServerState> {
    Router::<ServerState>::new()
        .merge(health::router())
        .merge(plates::router())
}

/// Build the full application with state and Tower HTTP middleware
pub fn build_app(state: ServerState) -> Router {
    build_router()
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
}
