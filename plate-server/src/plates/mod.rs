//! 盘子状态追踪
//!
//! # 模块结构
//!
//! - [`clock`] - 时间源 (`SystemClock` / `ManualClock`)
//! - [`engine`] - 纯函数状态机: 上一次文档 + 报告 -> 新文档 + 计数变化
//! - [`service`] - 事务编排: 校验、事务内读写、提交后广播
//! - [`error`] - `PlateError`

pub mod clock;
pub mod engine;
pub mod error;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{DISCARD_THRESHOLD_SECS, PlateEngine, Transition};
pub use error::{PlateError, PlateResult};
pub use service::PlateService;
