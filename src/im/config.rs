//! 客户端配置

use std::time::Duration;
use tracing::warn;

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 本地 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://bloodlink.db?mode=rwc`，测试中使用 `sqlite::memory:`
    pub db_url: String,
    /// 连接池最大连接数（内存数据库会被强制为 1）
    pub max_db_connections: u32,
    /// 托管后端的 REST 地址（为空时使用本地 SQLite）
    pub rest_base_url: Option<String>,
    /// 托管后端的匿名 key
    pub anon_key: Option<String>,
    /// 实时订阅断开后，重新订阅前的等待时间
    pub reconnect_delay: Duration,
    /// 连续重连失败的最大次数，超过后停留在 Error 状态
    pub max_reconnect_attempts: u32,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self {
            db_url: "sqlite://bloodlink.db?mode=rwc".to_string(),
            max_db_connections: 5,
            rest_base_url: None,
            anon_key: None,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }

    /// 内存数据库配置（测试 / 演示用）
    pub fn in_memory() -> Self {
        Self::new().with_db_url("sqlite::memory:")
    }

    pub fn with_db_url(mut self, db_url: impl Into<String>) -> Self {
        self.db_url = db_url.into();
        self
    }

    pub fn with_rest_backend(mut self, base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        self.rest_base_url = Some(base_url.into());
        self.anon_key = Some(anon_key.into());
        self
    }

    pub fn with_reconnect(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// 从环境变量覆盖默认值，无法解析的数值保留默认值并打印警告
    pub fn from_env() -> Self {
        let mut cfg = Self::new();
        if let Ok(url) = std::env::var("BLOODLINK_DB_URL") {
            cfg.db_url = url;
        }
        if let Ok(url) = std::env::var("BLOODLINK_REST_URL") {
            cfg.rest_base_url = Some(url);
        }
        if let Ok(key) = std::env::var("BLOODLINK_ANON_KEY") {
            cfg.anon_key = Some(key);
        }
        if let Ok(raw) = std::env::var("BLOODLINK_RECONNECT_DELAY_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => cfg.reconnect_delay = Duration::from_millis(ms),
                Err(e) => warn!("[Config] BLOODLINK_RECONNECT_DELAY_MS 无效 ({}): {}", raw, e),
            }
        }
        if let Ok(raw) = std::env::var("BLOODLINK_MAX_RECONNECTS") {
            match raw.parse::<u32>() {
                Ok(n) => cfg.max_reconnect_attempts = n,
                Err(e) => warn!("[Config] BLOODLINK_MAX_RECONNECTS 无效 ({}): {}", raw, e),
            }
        }
        cfg
    }

    pub(crate) fn is_in_memory(&self) -> bool {
        self.db_url.contains(":memory:") || self.db_url.contains("mode=memory")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_sqlite() {
        let cfg = ClientConfig::new();
        assert_eq!(cfg.db_url, "sqlite://bloodlink.db?mode=rwc");
        assert_eq!(cfg.max_db_connections, 5);
        assert!(cfg.rest_base_url.is_none());
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(1));
        assert!(!cfg.is_in_memory());
    }

    #[test]
    fn builders_override_fields() {
        let cfg = ClientConfig::in_memory()
            .with_rest_backend("https://example.test", "anon")
            .with_reconnect(Duration::from_millis(10), 2);
        assert!(cfg.is_in_memory());
        assert_eq!(cfg.rest_base_url.as_deref(), Some("https://example.test"));
        assert_eq!(cfg.anon_key.as_deref(), Some("anon"));
        assert_eq!(cfg.max_reconnect_attempts, 2);
    }
}
