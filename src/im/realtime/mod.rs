//! 实时订阅模块
//!
//! 数据库变更推送的传输抽象（进程内广播 / 托管后端 WebSocket），以及按会话过滤的消息订阅状态机

pub mod feed;
pub mod transport;
pub mod websocket;

pub use feed::{FeedState, LiveMessageFeed, MessageFeedListener, PairFilter};
pub use transport::{
    resubscribe, transport_for, ChangeFeedTransport, LocalChangeFeed, ReconnectPolicy,
    BLOOD_REQUESTS_TABLE, MESSAGES_TABLE,
};
pub use websocket::RealtimeChangeFeed;
