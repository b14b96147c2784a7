pub mod im;

// 重新导出常用类型和函数，方便外部使用
pub use im::{
    chat::{ChatOptions, ChatSession},
    config::ClientConfig,
    conversation::{ConversationService, ConversationSummary},
    login_async,
    message::{Message, MessageStore},
    notification::{match_request, BloodRequest, BloodType, NotificationSettings, RequestAlertDispatcher},
    realtime::{FeedState, LiveMessageFeed, LocalChangeFeed, RealtimeChangeFeed},
    ImError,
};
