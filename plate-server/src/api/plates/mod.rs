//! Plate API Module
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /v1/plates | POST | 采集端上报盘子状态 |
//! | /v1/shops/{shop}/plates | GET | 店铺全部盘子 |
//! | /v1/shops/{shop}/plates/{qr_id} | GET | 单个盘子 |
//! | /v1/shops/{shop}/counters | GET | 各菜品计数 |
//! | /v1/shops/{shop}/counters/{pop_number} | GET | 单个菜品计数 |
//! | /v1/shops/{shop}/events | GET | SSE 实时推送 |

mod handler;

pub use handler::PlateReportBody;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/v1/plates", post(handler::collect))
        .nest("/v1/shops/{shop}", shop_routes())
}

fn shop_routes() -> Router<ServerState> {
    Router::new()
        .route("/plates", get(handler::list_plates))
        .route("/plates/{qr_id}", get(handler::get_plate))
        .route("/counters", get(handler::list_counters))
        .route("/counters/{pop_number}", get(handler::get_counter))
        .route("/events", get(handler::events))
}
