pub mod auth;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod message;
pub mod notification;
pub mod profile;
pub mod realtime;
pub mod serialization;

// 重新导出认证相关函数
pub use auth::{login_async, LocalSession, SessionProvider};

// 重新导出错误类型
pub use error::{ImError, Result};
