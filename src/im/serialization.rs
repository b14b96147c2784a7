use chrono::DateTime;
use serde::Deserialize;

/// 时间戳反序列化：兼容毫秒整数（本地 SQLite 行）与 RFC3339 字符串（托管后端行）
pub fn deserialize_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(ms),
        Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.timestamp_millis())
            .map_err(serde::de::Error::custom),
    }
}

/// 生成消息 ID
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
