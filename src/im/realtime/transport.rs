//! 数据库变更订阅（change feed）传输层
//!
//! 托管后端通过长连接推送表的 INSERT 事件；这里抽象成按表订阅的行流，
//! 行内容是 JSON（与后端推送的 `payload.new` 一致）。

use crate::im::config::ClientConfig;
use crate::im::error::{ImError, Result};
use crate::im::realtime::websocket::RealtimeChangeFeed;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const MESSAGES_TABLE: &str = "messages";
pub const BLOOD_REQUESTS_TABLE: &str = "blood_requests";

/// 变更订阅传输
#[async_trait]
pub trait ChangeFeedTransport: Send + Sync {
    /// 订阅某张表的 INSERT 事件
    ///
    /// 返回即表示服务器已确认订阅。接收端关闭表示底层连接丢失，
    /// 且不保证可恢复的游标，调用方需要重新订阅并全量补拉。
    async fn subscribe_inserts(&self, table: &str) -> Result<mpsc::UnboundedReceiver<Value>>;
}

/// 按配置选择变更订阅：配置了托管后端时走 WebSocket，否则使用进程内广播
pub fn transport_for(
    config: &ClientConfig,
    local: Arc<LocalChangeFeed>,
    access_token: Option<&str>,
) -> Result<Arc<dyn ChangeFeedTransport>> {
    match (&config.rest_base_url, &config.anon_key) {
        (Some(base_url), Some(anon_key)) => {
            info!("[ChangeFeed] 使用托管后端实时订阅: {}", base_url);
            Ok(Arc::new(RealtimeChangeFeed::new(base_url, anon_key, access_token)?))
        }
        (Some(_), None) => Err(ImError::validation("配置了托管后端地址但缺少 anon key")),
        _ => Ok(local),
    }
}

/// 订阅断开后的重连参数
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::new())
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            delay: config.reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// 按策略重新订阅，每次尝试前等待 `delay`；全部失败返回最后一次的错误
pub async fn resubscribe(
    transport: &dyn ChangeFeedTransport,
    table: &str,
    policy: ReconnectPolicy,
) -> Result<mpsc::UnboundedReceiver<Value>> {
    let mut last = ImError::transport(format!("{} 未尝试重新订阅", table));
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.delay).await;
        match transport.subscribe_inserts(table).await {
            Ok(rx) => {
                info!("[ChangeFeed] 🔄 {} 第 {} 次重新订阅成功", table, attempt);
                return Ok(rx);
            }
            Err(e) => {
                warn!(
                    "[ChangeFeed] {} 第 {}/{} 次重新订阅失败: {}",
                    table, attempt, policy.max_attempts, e
                );
                last = e;
            }
        }
    }
    error!("[ChangeFeed] ❌ {} 重新订阅 {} 次均失败", table, policy.max_attempts);
    Err(last)
}

/// 进程内变更订阅（本地 SQLite 后端写入后在这里广播）
pub struct LocalChangeFeed {
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
    online: AtomicBool,
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// 广播一行 INSERT，返回投递到的订阅数
    pub fn publish(&self, table: &str, row: Value) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(senders) = channels.get_mut(table) else {
            return 0;
        };
        senders.retain(|tx| tx.send(row.clone()).is_ok());
        debug!("[ChangeFeed] 📤 {} INSERT 投递给 {} 个订阅", table, senders.len());
        senders.len()
    }

    /// 断开所有订阅（模拟连接丢失）
    pub fn drop_connections(&self) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let count: usize = channels.values().map(Vec::len).sum();
        channels.clear();
        warn!("[ChangeFeed] 🔌 断开全部 {} 个订阅", count);
    }

    /// 离线时新的订阅会失败
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        info!("[ChangeFeed] 连接状态: {}", if online { "在线" } else { "离线" });
    }

    pub fn subscriber_count(&self, table: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(table)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeedTransport for LocalChangeFeed {
    async fn subscribe_inserts(&self, table: &str) -> Result<mpsc::UnboundedReceiver<Value>> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ImError::transport("变更订阅连接不可用"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.entry(table.to_string()).or_default().push(tx);
        debug!("[ChangeFeed] ✅ 订阅确认: {}", table);
        Ok(rx)
    }
}
