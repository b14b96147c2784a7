//! 推送通道

use crate::im::error::Result;
use crate::im::notification::matcher::AlertPayload;
use async_trait::async_trait;
use tracing::info;

/// 推送投递，尽力而为，不负责重试
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn push(&self, target: &str, payload: &AlertPayload) -> Result<()>;
}

/// 只记录日志的推送通道
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPushTransport;

#[async_trait]
impl PushTransport for LoggingPushTransport {
    async fn push(&self, target: &str, payload: &AlertPayload) -> Result<()> {
        info!(
            "[Push] 📣 -> {} [{}] {}: {}",
            target,
            payload.reason.as_str(),
            payload.title,
            payload.body
        );
        Ok(())
    }
}
