//! 消息模型定义

use crate::im::serialization::deserialize_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一条一对一消息（创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// 服务端分配的唯一 ID
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// 消息正文（已去除首尾空白，非空）
    #[serde(rename = "message")]
    pub body: String,
    /// 服务端时间戳（毫秒），按插入单调不减
    #[serde(deserialize_with = "deserialize_millis")]
    pub created_at: i64,
    /// 插入顺序，用于时间戳相同时排序；托管后端不返回时为 0
    #[serde(default)]
    pub seq: i64,
}

impl Message {
    /// 相对 `user` 的对方 ID；`user` 不是参与方时返回 None
    pub fn counterparty_of(&self, user: &str) -> Option<&str> {
        if self.sender_id == user {
            Some(&self.receiver_id)
        } else if self.receiver_id == user {
            Some(&self.sender_id)
        } else {
            None
        }
    }

    /// 是否属于 `{a, b}` 这一对（不区分方向）
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// 排序键：先时间戳，再插入顺序
    pub fn order_key(&self) -> (i64, i64) {
        (self.created_at, self.seq)
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at)
    }
}

#[cfg(test)]
pub(crate) fn sample(id: &str, sender: &str, receiver: &str, body: &str, created_at: i64, seq: i64) -> Message {
    Message {
        id: id.to_string(),
        sender_id: sender.to_string(),
        receiver_id: receiver.to_string(),
        body: body.to_string(),
        created_at,
        seq,
    }
}
