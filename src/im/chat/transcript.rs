//! 聊天记录（按时间升序、按 ID 去重）

use crate::im::message::models::Message;
use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    ids: HashSet<String>,
    /// 每新增一条消息加一
    revision: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一条消息，已存在同 ID 的消息时忽略并返回 false
    ///
    /// 按 `(created_at, seq)` 找到插入位置，键相同时排在已有消息之后。
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        let key = message.order_key();
        let pos = self.messages.partition_point(|m| m.order_key() <= key);
        self.messages.insert(pos, message);
        self.revision += 1;
        true
    }

    /// 批量合并，返回新增条数
    pub fn merge(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages
            .into_iter()
            .map(|m| self.insert(m))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
