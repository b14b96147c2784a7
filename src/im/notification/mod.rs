//! 血液请求与通知匹配模块
//!
//! - `compatibility`: 血型相容性表
//! - `models`: 通知偏好、免打扰、血液请求
//! - `matcher`: 决定通知哪些献血者
//! - `dao`: 血液请求存储
//! - `dispatcher`: 监听新请求并推送

pub mod compatibility;
pub mod dao;
pub mod dispatcher;
pub mod matcher;
pub mod models;
pub mod push;

// 重新导出主要类型和函数
pub use compatibility::BloodType;
pub use dao::SqliteBloodRequestRepository;
pub use dispatcher::{ActiveRequestSource, RequestAlertDispatcher};
pub use matcher::{
    build_payload, city_matches, evaluate, match_request, AlertPayload, DonorCandidate,
    NotificationTarget, NotifyReason,
};
pub use models::{
    BloodRequest, EmergencyRequest, NewBloodRequest, NotificationCategory, NotificationSettings,
    QuietHours, RequestStatus, Urgency,
};
pub use push::{LoggingPushTransport, PushTransport};
