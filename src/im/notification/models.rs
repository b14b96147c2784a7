//! 通知偏好与血液请求模型

use crate::im::error::{ImError, Result};
use crate::im::notification::compatibility::BloodType;
use crate::im::serialization::{deserialize_millis, generate_message_id};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// 通知类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    EmergencyRequests,
    NearbyRequests,
    MatchingBloodType,
    DonationResponses,
    RequestUpdates,
    ChatMessages,
    DonationReminders,
    AppUpdates,
}

impl NotificationCategory {
    pub const ALL: [NotificationCategory; 8] = [
        NotificationCategory::EmergencyRequests,
        NotificationCategory::NearbyRequests,
        NotificationCategory::MatchingBloodType,
        NotificationCategory::DonationResponses,
        NotificationCategory::RequestUpdates,
        NotificationCategory::ChatMessages,
        NotificationCategory::DonationReminders,
        NotificationCategory::AppUpdates,
    ];

    pub fn key(self) -> &'static str {
        match self {
            NotificationCategory::EmergencyRequests => "emergency_requests",
            NotificationCategory::NearbyRequests => "nearby_requests",
            NotificationCategory::MatchingBloodType => "matching_blood_type",
            NotificationCategory::DonationResponses => "donation_responses",
            NotificationCategory::RequestUpdates => "request_updates",
            NotificationCategory::ChatMessages => "chat_messages",
            NotificationCategory::DonationReminders => "donation_reminders",
            NotificationCategory::AppUpdates => "app_updates",
        }
    }
}

/// 免打扰时段，`[start, end)`，`start > end` 时跨越午夜
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QuietHours {
    pub enabled: bool,
    /// "HH:MM"
    pub start: String,
    /// "HH:MM"
    pub end: String,
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

impl QuietHours {
    pub fn new(enabled: bool, start: &str, end: &str) -> Self {
        Self {
            enabled,
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// `now` 是否落在窗口内（不考虑 enabled）；`start == end` 视为空窗口
    pub fn window_contains(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
        if start <= end {
            start <= now && now < end
        } else {
            now >= start || now < end
        }
    }

    /// 当前是否处于免打扰
    ///
    /// 已启用但时间无法解析时按处于免打扰处理，只会少发非紧急通知。
    pub fn is_quiet_at(&self, now: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        match (parse_clock(&self.start), parse_clock(&self.end)) {
            (Some(start), Some(end)) => Self::window_contains(start, end, now),
            _ => {
                warn!(
                    "[Notify] 免打扰时间无法解析: start={:?} end={:?}",
                    self.start, self.end
                );
                true
            }
        }
    }
}

/// 通知偏好
///
/// 缺失的字段一律视为关闭。紧急请求不受任何偏好影响。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationSettings {
    pub emergency_requests: bool,
    pub nearby_requests: bool,
    pub matching_blood_type: bool,
    pub donation_responses: bool,
    pub request_updates: bool,
    pub chat_messages: bool,
    pub donation_reminders: bool,
    pub app_updates: bool,
    pub quiet_hours: QuietHours,
}

impl NotificationSettings {
    /// 应用首次安装时的默认值
    pub fn app_defaults() -> Self {
        Self {
            emergency_requests: true,
            nearby_requests: true,
            matching_blood_type: true,
            donation_responses: true,
            request_updates: true,
            chat_messages: true,
            donation_reminders: false,
            app_updates: false,
            quiet_hours: QuietHours::new(false, "22:00", "08:00"),
        }
    }

    pub fn is_enabled(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::EmergencyRequests => self.emergency_requests,
            NotificationCategory::NearbyRequests => self.nearby_requests,
            NotificationCategory::MatchingBloodType => self.matching_blood_type,
            NotificationCategory::DonationResponses => self.donation_responses,
            NotificationCategory::RequestUpdates => self.request_updates,
            NotificationCategory::ChatMessages => self.chat_messages,
            NotificationCategory::DonationReminders => self.donation_reminders,
            NotificationCategory::AppUpdates => self.app_updates,
        }
    }

    pub fn set(&mut self, category: NotificationCategory, enabled: bool) {
        let slot = match category {
            NotificationCategory::EmergencyRequests => &mut self.emergency_requests,
            NotificationCategory::NearbyRequests => &mut self.nearby_requests,
            NotificationCategory::MatchingBloodType => &mut self.matching_blood_type,
            NotificationCategory::DonationResponses => &mut self.donation_responses,
            NotificationCategory::RequestUpdates => &mut self.request_updates,
            NotificationCategory::ChatMessages => &mut self.chat_messages,
            NotificationCategory::DonationReminders => &mut self.donation_reminders,
            NotificationCategory::AppUpdates => &mut self.app_updates,
        };
        *slot = enabled;
    }

    /// 宽松解析，永不失败
    ///
    /// 支持两种形态：以类别名为 key 的对象，或客户端本地保存的
    /// `[{ "id": "...", "enabled": true }, ...]` 数组。
    /// 免打扰可以放在 `quiet_hours` 或 `quietHours` 下。
    pub fn from_json_lenient(value: &Value) -> Self {
        let mut settings = Self::default();
        match value {
            Value::Object(map) => {
                for category in NotificationCategory::ALL {
                    let enabled = map
                        .get(category.key())
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    settings.set(category, enabled);
                }
                if let Some(q) = map.get("quiet_hours").or_else(|| map.get("quietHours")) {
                    settings.quiet_hours = Self::quiet_hours_lenient(q);
                }
            }
            Value::Array(items) => {
                for item in items {
                    let Some(id) = item.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    let enabled = item.get("enabled").and_then(Value::as_bool).unwrap_or(false);
                    if let Some(category) = NotificationCategory::ALL.into_iter().find(|c| c.key() == id) {
                        settings.set(category, enabled);
                    }
                }
            }
            _ => {}
        }
        settings
    }

    fn quiet_hours_lenient(value: &Value) -> QuietHours {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        QuietHours {
            enabled: value.get("enabled").and_then(Value::as_bool).unwrap_or(false),
            start: text("start"),
            end: text("end"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Active,
    Fulfilled,
    Cancelled,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "Low",
            Urgency::Medium => "Medium",
            Urgency::High => "High",
            Urgency::Critical => "Critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [Urgency::Low, Urgency::Medium, Urgency::High, Urgency::Critical]
            .into_iter()
            .find(|u| u.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Active => "active",
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [RequestStatus::Active, RequestStatus::Fulfilled, RequestStatus::Cancelled]
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

/// 血液请求
///
/// 血型、地点和留言创建后不可修改；状态只能由发起人修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodRequest {
    pub id: String,
    #[serde(rename = "user_id")]
    pub requester_id: String,
    pub blood_type: BloodType,
    pub location: String,
    pub message: String,
    pub urgency: Urgency,
    #[serde(default)]
    pub is_emergency: bool,
    pub status: RequestStatus,
    #[serde(deserialize_with = "deserialize_millis")]
    pub created_at: i64,
}

impl BloodRequest {
    /// 修改请求状态：只有发起人可以操作，且只能从 active 变为 fulfilled / cancelled
    pub fn transition(&mut self, actor: &str, status: RequestStatus) -> Result<()> {
        if actor != self.requester_id {
            return Err(ImError::NotAuthenticated);
        }
        if self.status != RequestStatus::Active || status == RequestStatus::Active {
            return Err(ImError::InvalidState(format!(
                "请求状态不能从 {:?} 变为 {:?}",
                self.status, status
            )));
        }
        self.status = status;
        Ok(())
    }
}

/// 新建请求的表单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBloodRequest {
    pub blood_type: BloodType,
    pub location: String,
    pub message: String,
    pub urgency: Urgency,
    pub is_emergency: bool,
}

impl NewBloodRequest {
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() || self.message.trim().is_empty() {
            return Err(ImError::validation("地点和留言为必填项"));
        }
        Ok(())
    }

    pub fn into_request(self, requester_id: &str, created_at: i64) -> Result<BloodRequest> {
        self.validate()?;
        Ok(BloodRequest {
            id: generate_message_id(),
            requester_id: requester_id.to_string(),
            blood_type: self.blood_type,
            location: self.location.trim().to_string(),
            message: self.message.trim().to_string(),
            urgency: self.urgency,
            is_emergency: self.is_emergency,
            status: RequestStatus::Active,
            created_at,
        })
    }
}

/// 紧急请求表单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyRequest {
    pub blood_type: BloodType,
    pub hospital: String,
    pub contact_number: String,
    /// 当前城市（定位得到，可能为空）
    pub location: String,
}

impl EmergencyRequest {
    pub fn into_new_request(self) -> Result<NewBloodRequest> {
        let hospital = self.hospital.trim();
        let contact = self.contact_number.trim();
        if hospital.is_empty() || contact.is_empty() {
            return Err(ImError::validation("医院和联系电话为必填项"));
        }
        let message = format!(
            "🚨 EMERGENCY REQUEST 🚨\n\nHospital: {}\nContact: {}\nLocation: {}\n\nThis is an urgent blood requirement. Please respond immediately if you can donate.",
            hospital,
            contact,
            self.location.trim()
        );
        Ok(NewBloodRequest {
            blood_type: self.blood_type,
            location: hospital.to_string(),
            message,
            urgency: Urgency::Critical,
            is_emergency: true,
        })
    }
}
