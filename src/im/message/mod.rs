//! 消息模块
//!
//! 一对一消息日志的只追加读写

pub mod api;
pub mod dao;
pub mod models;
pub mod store;

// 重新导出主要类型
pub use api::RestMessageRepository;
pub use dao::{MessageRepository, SqliteMessageRepository};
pub use models::Message;
pub use store::{repository_for, MessageStore};
