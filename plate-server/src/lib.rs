//! Plate Server - 回转寿司盘子状态追踪服务
//!
//! # 架构概述
//!
//! 采集端上报每个盘位 (qrId) 的开/合状态，服务端在单个存储事务内
//! 更新盘子文档和对应菜品 (popNumber) 的计数，提交后向展示端推送。
//!
//! - **存储** (`store`): 事务文档存储，redb / 内存两种后端
//! - **盘子** (`plates`): 状态机、事务编排
//! - **HTTP API** (`api`): 上报、查询、SSE 推送
//!
//! # 模块结构
//!
//! ```text
//! plate-server/src/
//! ├── core/          # 配置、状态、错误、服务器
//! ├── api/           # HTTP 路由和处理器
//! ├── plates/        # 时钟、状态机、编排服务
//! ├── store/         # 事务文档存储
//! └── utils/         # 错误转换、日志、校验
//! ```

pub mod api;
pub mod core;
pub mod plates;
pub mod store;
pub mod utils;

// Re-export 公共类型
pub use core::{Config, Server, ServerState};
pub use plates::{PlateEngine, PlateError, PlateService};
pub use store::{AnyStore, DocumentStore, MemoryStore, RedbStore, RetryPolicy, StorageError};
pub use utils::{AppError, AppResult};

// Re-export unified error types from shared
pub use utils::{ApiResponse, ErrorCategory, ErrorCode};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

pub use tracing_appender::non_blocking::WorkerGuard;

/// 设置运行环境
///
/// 1. 加载 `.env` (若存在)
/// 2. 读取配置
/// 3. 创建工作目录
/// 4. 初始化日志
/// 5. 输出无效的环境变量
///
/// 返回的 guard 需保持到进程结束，否则文件日志可能丢失
pub fn setup_environment() -> anyhow::Result<(Config, Option<WorkerGuard>)> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let config = Config::from_env();
    config.ensure_work_dir_structure()?;

    let guard = init_logger_with_file(
        Some(&config.log_level),
        config.log_json,
        config.log_dir.as_deref(),
    )?;

    if dotenv_loaded {
        tracing::debug!("Loaded .env file");
    }
    config.log_invalid_env();
    Ok((config, guard))
}

pub fn print_banner() {
    println!(
        r#"
    ____  __      __
   / __ \/ /___ _/ /____
  / /_/ / / __ `/ __/ _ \
 / ____/ / /_/ / /_/  __/
/_/   /_/\__,_/\__/\___/
    "#
    );
}
