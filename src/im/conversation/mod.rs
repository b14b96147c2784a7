//! 会话列表模块
//!
//! 由消息日志推导出每个对方一条的会话摘要

pub mod aggregator;
pub mod listener;
pub mod models;
pub mod service;

// 重新导出主要类型和函数
pub use aggregator::{filter_by_name, sorted_newest_first, summarize};
pub use listener::{ConversationListener, EmptyConversationListener};
pub use models::ConversationSummary;
pub use service::ConversationService;
