use crate::plates::DISCARD_THRESHOLD_SECS;
use crate::store::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// 持久化 (redb 文件)
    Redb,
    /// 仅内存，重启即丢失
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redb" => Ok(StoreKind::Redb),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// 服务器配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./work_dir | 工作目录 (数据库、日志) |
/// | HTTP_PORT | 8080 | HTTP 服务端口 |
/// | ENVIRONMENT | development | 运行环境 |
/// | LOG_LEVEL | info | 日志级别 (RUST_LOG 优先) |
/// | LOG_JSON | false | JSON 格式日志 |
/// | LOG_DIR | - | 日志文件目录 (按天滚动) |
/// | STORE_BACKEND | redb | redb \| memory |
/// | REQUEST_TIMEOUT_MS | 30000 | 单个请求处理超时 |
/// | SHUTDOWN_TIMEOUT_MS | 10000 | 优雅关闭等待时间 |
/// | STORE_MAX_ATTEMPTS | 5 | 事务冲突最大尝试次数 |
/// | STORE_RETRY_BASE_MS | 10 | 冲突重试初始退避 |
/// | DISCARD_THRESHOLD_SECS | 3600 | 出餐超时丢弃阈值 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/plates HTTP_PORT=9000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    /// HTTP API 服务端口
    pub http_port: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
    pub store_backend: StoreKind,
    /// 请求超时时间 (毫秒)
    pub request_timeout_ms: u64,
    /// 关闭超时时间 (毫秒)
    pub shutdown_timeout_ms: u64,
    pub store_max_attempts: u32,
    pub store_retry_base_ms: u64,
    pub discard_threshold_secs: i64,
    /// 无法解析、已回退为默认值的环境变量 (日志初始化后再输出)
    pub invalid_env: Vec<InvalidEnvVar>,
}

/// 一个无法解析的环境变量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEnvVar {
    pub key: String,
    pub value: String,
}

/// 环境变量读取器，记录解析失败的条目
struct EnvReader<F> {
    lookup: F,
    invalid: Vec<InvalidEnvVar>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string_or(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    /// 缺失或无法解析时使用默认值
    fn parse_or<T: FromStr>(&mut self, key: &str, default: T) -> T {
        match (self.lookup)(key) {
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(_) => {
                    self.invalid.push(InvalidEnvVar {
                        key: key.to_string(),
                        value: raw,
                    });
                    default
                }
            },
            None => default,
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载配置
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut env = EnvReader {
            lookup,
            invalid: Vec::new(),
        };

        let mut config = Self {
            work_dir: env.string_or("WORK_DIR", "./work_dir"),
            http_port: env.parse_or("HTTP_PORT", 8080),
            environment: env.string_or("ENVIRONMENT", "development"),
            log_level: env.string_or("LOG_LEVEL", "info"),
            log_json: env.parse_or("LOG_JSON", false),
            log_dir: (env.lookup)("LOG_DIR").filter(|d| !d.is_empty()),
            store_backend: env.parse_or("STORE_BACKEND", StoreKind::Redb),
            request_timeout_ms: env.parse_or("REQUEST_TIMEOUT_MS", 30_000),
            shutdown_timeout_ms: env.parse_or("SHUTDOWN_TIMEOUT_MS", 10_000),
            store_max_attempts: env.parse_or("STORE_MAX_ATTEMPTS", 5),
            store_retry_base_ms: env.parse_or("STORE_RETRY_BASE_MS", 10),
            discard_threshold_secs: env.parse_or("DISCARD_THRESHOLD_SECS", DISCARD_THRESHOLD_SECS),
            invalid_env: Vec::new(),
        };
        config.invalid_env = env.invalid;
        config
    }

    /// 输出回退为默认值的环境变量，需在日志初始化之后调用
    pub fn log_invalid_env(&self) {
        for entry in &self.invalid_env {
            tracing::warn!(
                key = %entry.key,
                value = %entry.value,
                "Invalid environment value, using default"
            );
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// redb 数据库文件路径
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("database").join("plates.redb")
    }

    /// 创建工作目录结构
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(PathBuf::from(&self.work_dir).join("database"))?;
        if let Some(dir) = &self.log_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.store_max_attempts,
            Duration::from_millis(self.store_retry_base_ms),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("redb".parse::<StoreKind>(), Ok(StoreKind::Redb));
        assert_eq!(" Memory ".parse::<StoreKind>(), Ok(StoreKind::Memory));
        assert!("sqlite".parse::<StoreKind>().is_err());
    }

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None);

        assert_eq!(config.work_dir, "./work_dir");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.store_backend, StoreKind::Redb);
        assert_eq!(config.discard_threshold_secs, DISCARD_THRESHOLD_SECS);
        assert!(config.log_dir.is_none());
        assert!(config.invalid_env.is_empty());
    }

    #[test]
    fn test_invalid_values_are_recorded() {
        let config = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "memroy"),
            ("HTTP_PORT", "9000"),
            ("REQUEST_TIMEOUT_MS", "soon"),
        ]));

        assert_eq!(config.store_backend, StoreKind::Redb);
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(
            config.invalid_env,
            vec![
                InvalidEnvVar {
                    key: "STORE_BACKEND".into(),
                    value: "memroy".into(),
                },
                InvalidEnvVar {
                    key: "REQUEST_TIMEOUT_MS".into(),
                    value: "soon".into(),
                },
            ]
        );
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::with_overrides("/tmp/plates", 9000);
        config.store_max_attempts = 3;
        config.store_retry_base_ms = 20;
        config.request_timeout_ms = 1500;

        assert_eq!(config.http_port, 9000);
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/plates/database/plates.redb")
        );
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(3, Duration::from_millis(20))
        );
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
    }
}
