use std::sync::Arc;

use crate::core::Config;
use crate::core::config::StoreKind;
use crate::plates::{Clock, PlateEngine, PlateService, SystemClock};
use crate::store::{AnyStore, MemoryStore, RedbStore, StorageError};

/// 服务使用的盘子编排器类型
pub type Plates = PlateService<AnyStore>;

/// 服务器状态 - 持有所有服务的共享引用
///
/// 使用 Arc 实现浅拷贝，每个请求 clone 一次。
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | plates | Arc<Plates> | 盘子状态编排 (持有存储客户端) |
#[derive(Clone, Debug)]
pub struct ServerState {
    /// 服务器配置
    pub config: Config,
    /// 盘子状态服务
    pub plates: Arc<Plates>,
}

impl ServerState {
    /// 创建服务器状态 (手动构造)
    ///
    /// 通常使用 [`ServerState::initialize`] 代替；测试中用于注入内存存储和手动时钟
    pub fn new(config: Config, store: AnyStore, clock: Arc<dyn Clock>) -> Self {
        let engine = PlateEngine::new(config.discard_threshold_secs);
        let plates = PlateService::new(Arc::new(store), clock, engine);
        Self {
            config,
            plates: Arc::new(plates),
        }
    }

    /// 初始化服务器状态
    ///
    /// 1. 创建工作目录
    /// 2. 打开存储后端 (redb 文件或内存)
    /// 3. 创建盘子服务
    pub fn initialize(config: &Config) -> Result<Self, StorageError> {
        let retry = config.retry_policy();
        let store = match config.store_backend {
            StoreKind::Redb => {
                let path = config.database_path();
                if let Some(parent) = path.parent()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::warn!(dir = %parent.display(), error = %e, "Failed to create database directory");
                }
                tracing::info!(path = %path.display(), "Opening redb plate store");
                AnyStore::Redb(RedbStore::open(&path, retry)?)
            }
            StoreKind::Memory => {
                tracing::warn!("Using in-memory plate store, data is lost on restart");
                AnyStore::Memory(MemoryStore::new(retry))
            }
        };

        Ok(Self::new(config.clone(), store, Arc::new(SystemClock)))
    }
}
