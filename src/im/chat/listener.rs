//! 聊天会话监听器回调接口

use crate::im::message::models::Message;
use crate::im::realtime::feed::FeedState;
use async_trait::async_trait;

/// 聊天会话回调
///
/// `on_transcript_changed` 按聊天记录的变更顺序串行调用，过期的快照不会送达；
/// 回调内不能调用同一会话的 `send` 或 `close`。
#[async_trait]
pub trait ChatSessionListener: Send + Sync {
    /// 聊天记录变更（完整快照，按时间升序）
    async fn on_transcript_changed(&self, messages: Vec<Message>);

    /// 实时订阅状态变更
    async fn on_feed_state_changed(&self, state: FeedState);
}

/// 空实现（默认监听器）
pub struct EmptyChatSessionListener;

#[async_trait]
impl ChatSessionListener for EmptyChatSessionListener {
    async fn on_transcript_changed(&self, _messages: Vec<Message>) {}
    async fn on_feed_state_changed(&self, _state: FeedState) {}
}
