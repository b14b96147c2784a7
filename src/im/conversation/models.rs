//! 会话列表模型

use serde::{Deserialize, Serialize};

/// 与某个对方的会话摘要（由消息日志推导，不落库）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub counterparty_id: String,
    pub display_name: String,
    /// 最近一条消息正文
    pub last_message: String,
    /// 最近一条消息时间戳（毫秒）
    pub last_message_time: i64,
    /// 没有已读回执，恒为 0
    pub unread_count: u32,
}
