//! 一对一聊天会话模块
//!
//! 历史加载 + 实时订阅 + 按 ID 去重的聊天记录

pub mod listener;
pub mod session;
pub mod transcript;

// 重新导出主要类型
pub use listener::{ChatSessionListener, EmptyChatSessionListener};
pub use session::{ChatOptions, ChatSession};
pub use transcript::Transcript;
