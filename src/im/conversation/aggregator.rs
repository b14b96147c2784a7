//! 会话列表折叠
//!
//! 把当前用户相关的消息一次遍历折叠为“对方 → 最近一条消息”的映射。

use crate::im::conversation::models::ConversationSummary;
use crate::im::message::models::Message;
use crate::im::profile::dao::UNKNOWN_USER;
use std::collections::HashMap;

/// 折叠消息集合，每个对方恰好一条摘要
///
/// 比较 `(created_at, seq)`，只有严格更新的消息才替换已保留的那条，
/// 因此键完全相同时先出现的胜出；按降序输入即得到最新消息。
/// 不涉及 `current_user` 的消息和自己发给自己的消息被忽略。
pub fn summarize(
    current_user: &str,
    messages: &[Message],
    names: &HashMap<String, String>,
) -> HashMap<String, ConversationSummary> {
    let mut latest: HashMap<&str, &Message> = HashMap::new();
    for message in messages {
        let Some(counterparty) = message.counterparty_of(current_user) else {
            continue;
        };
        if counterparty == current_user {
            continue;
        }
        latest
            .entry(counterparty)
            .and_modify(|kept| {
                if message.order_key() > kept.order_key() {
                    *kept = message;
                }
            })
            .or_insert(message);
    }

    latest
        .into_iter()
        .map(|(counterparty, message)| {
            let display_name = names
                .get(counterparty)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_USER.to_string());
            (
                counterparty.to_string(),
                ConversationSummary {
                    counterparty_id: counterparty.to_string(),
                    display_name,
                    last_message: message.body.clone(),
                    last_message_time: message.created_at,
                    unread_count: 0,
                },
            )
        })
        .collect()
}

/// 按最近消息时间降序排列
pub fn sorted_newest_first(
    summaries: HashMap<String, ConversationSummary>,
) -> Vec<ConversationSummary> {
    let mut list: Vec<_> = summaries.into_values().collect();
    list.sort_by(|a, b| {
        b.last_message_time
            .cmp(&a.last_message_time)
            .then_with(|| a.counterparty_id.cmp(&b.counterparty_id))
    });
    list
}

/// 按对方显示名做不区分大小写的子串过滤；空查询返回全部
pub fn filter_by_name<'a>(
    summaries: &'a [ConversationSummary],
    query: &str,
) -> Vec<&'a ConversationSummary> {
    let needle = query.trim().to_lowercase();
    summaries
        .iter()
        .filter(|s| needle.is_empty() || s.display_name.to_lowercase().contains(&needle))
        .collect()
}
