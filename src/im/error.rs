//! 错误类型定义
//!
//! 所有错误都只作用于触发它的那次操作，不会导致进程退出。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImError>;

#[derive(Error, Debug)]
pub enum ImError {
    /// 当前没有登录身份，调用方应跳转到登录页
    #[error("未登录")]
    NotAuthenticated,

    /// 输入校验失败（空消息、缺少必填字段等），不会自动重试
    #[error("校验失败: {0}")]
    Validation(String),

    /// 网络 / 数据存储失败
    #[error("传输错误: {0}")]
    Transport(String),

    /// 在当前状态下不允许的操作（例如对已关闭的订阅再次订阅）
    #[error("状态错误: {0}")]
    InvalidState(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP 请求错误: {0}")]
    Request(#[from] reqwest::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket 错误: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ImError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// 是否属于传输类错误（可由调用方手动刷新 / 由实时订阅自动重连）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Database(_) | Self::Request(_) | Self::WebSocket(_)
        )
    }
}

impl From<anyhow::Error> for ImError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class_errors_are_retryable() {
        assert!(ImError::transport("连接断开").is_retryable());
        assert!(ImError::from(anyhow::anyhow!("pool closed")).is_retryable());
        assert!(!ImError::NotAuthenticated.is_retryable());
        assert!(!ImError::validation("消息内容不能为空").is_retryable());
        assert!(!ImError::InvalidState("closed".into()).is_retryable());
    }

    #[test]
    fn serialization_errors_are_not_retryable() {
        let err: ImError = serde_json::from_str::<i32>("oops").unwrap_err().into();
        assert!(matches!(err, ImError::Serialization(_)));
        assert!(!err.is_retryable());
    }
}
