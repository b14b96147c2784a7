//! 会话列表监听器回调接口

use crate::im::conversation::models::ConversationSummary;
use async_trait::async_trait;

#[async_trait]
pub trait ConversationListener: Send + Sync {
    /// 开始刷新
    async fn on_sync_start(&self);

    /// 刷新完成
    async fn on_sync_finish(&self);

    /// 刷新失败
    async fn on_sync_failed(&self, error: String);

    /// 会话列表变更（按最近消息时间降序的完整列表）
    async fn on_conversations_changed(&self, conversations: Vec<ConversationSummary>);
}

/// 空实现（默认监听器）
pub struct EmptyConversationListener;

#[async_trait]
impl ConversationListener for EmptyConversationListener {
    async fn on_sync_start(&self) {}
    async fn on_sync_finish(&self) {}
    async fn on_sync_failed(&self, _error: String) {}
    async fn on_conversations_changed(&self, _conversations: Vec<ConversationSummary>) {}
}
