//! 消息数据访问层（DAO）
//!
//! 消息表只追加；读取按参与方过滤并排序。

use crate::im::error::{ImError, Result};
use crate::im::message::models::Message;
use crate::im::realtime::transport::{LocalChangeFeed, MESSAGES_TABLE};
use crate::im::serialization::generate_message_id;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::sync::Arc;
use tracing::debug;

/// 消息日志的存储后端
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 追加一条消息，返回带服务端 ID / 时间戳的记录
    async fn insert(&self, sender_id: &str, receiver_id: &str, body: &str) -> Result<Message>;

    /// `{a, b}` 之间的全部消息，按 (created_at, seq) 升序
    async fn list_between(&self, a: &str, b: &str) -> Result<Vec<Message>>;

    /// 与 `user` 相关的全部消息，按 (created_at, seq) 降序
    async fn list_involving(&self, user: &str) -> Result<Vec<Message>>;
}

/// 本地消息存储（sqlx / SQLite）
pub struct SqliteMessageRepository {
    pool: Pool<Sqlite>,
    /// 写入成功后广播 INSERT 事件
    feed: Option<Arc<LocalChangeFeed>>,
}

impl SqliteMessageRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool, feed: None }
    }

    pub fn with_change_feed(pool: Pool<Sqlite>, feed: Arc<LocalChangeFeed>) -> Self {
        Self {
            pool,
            feed: Some(feed),
        }
    }

    fn row_to_message(row: SqliteRow) -> Result<Message> {
        Ok(Message {
            id: row.try_get("id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            body: row.try_get("message")?,
            created_at: row.try_get("created_at")?,
            seq: row.try_get("seq")?,
        })
    }
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    async fn insert(&self, sender_id: &str, receiver_id: &str, body: &str) -> Result<Message> {
        let id = generate_message_id();
        // 时间戳取 max(当前时间, 表内最大时间)，单条语句内完成，保证单调
        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, sender_id, receiver_id, message, created_at)
            VALUES (?, ?, ?, ?, MAX(?, IFNULL((SELECT MAX(created_at) FROM messages), 0)))
            RETURNING seq, created_at
            "#,
        )
        .bind(&id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(body)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        let msg = Message {
            id,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            body: body.to_string(),
            created_at: row.try_get("created_at")?,
            seq: row.try_get("seq")?,
        };
        debug!(
            "[MsgDAO] 💾 写入消息 id={} seq={} {} -> {}",
            msg.id, msg.seq, msg.sender_id, msg.receiver_id
        );

        if let Some(feed) = &self.feed {
            feed.publish(MESSAGES_TABLE, serde_json::to_value(&msg)?);
        }
        Ok(msg)
    }

    async fn list_between(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, sender_id, receiver_id, message, created_at
            FROM messages
            WHERE (sender_id = ? AND receiver_id = ?)
               OR (sender_id = ? AND receiver_id = ?)
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.pool)
        .await?;

        debug!("[MsgDAO] 查询 {} <-> {} 的消息，共 {} 条", a, b, rows.len());
        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn list_involving(&self, user: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, sender_id, receiver_id, message, created_at
            FROM messages
            WHERE sender_id = ? OR receiver_id = ?
            ORDER BY created_at DESC, seq DESC
            "#,
        )
        .bind(user)
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        debug!("[MsgDAO] 查询 {} 相关消息，共 {} 条", user, rows.len());
        rows.into_iter().map(Self::row_to_message).collect()
    }
}

/// 托管后端可能返回空结果集，插入时需要确认拿到了记录
pub(crate) fn first_row(mut rows: Vec<Message>, op: &str) -> Result<Message> {
    if rows.is_empty() {
        return Err(ImError::transport(format!("{}: 服务器未返回记录", op)));
    }
    Ok(rows.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::memory_pool;
    use crate::im::realtime::transport::ChangeFeedTransport;

    #[tokio::test]
    async fn history_is_pair_scoped_and_ascending() {
        let repo = SqliteMessageRepository::new(memory_pool().await);
        repo.insert("a", "b", "one").await.unwrap();
        repo.insert("c", "a", "other").await.unwrap();
        repo.insert("b", "a", "two").await.unwrap();
        repo.insert("a", "b", "three").await.unwrap();

        let history = repo.list_between("b", "a").await.unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["one", "two", "three"]);
        assert!(history.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
    }

    #[tokio::test]
    async fn timestamps_are_monotonic_per_insert() {
        let repo = SqliteMessageRepository::new(memory_pool().await);
        let mut last = i64::MIN;
        for i in 0..20 {
            let msg = repo.insert("a", "b", &format!("m{}", i)).await.unwrap();
            assert!(msg.created_at >= last);
            last = msg.created_at;
        }
    }

    #[tokio::test]
    async fn involving_is_descending() {
        let repo = SqliteMessageRepository::new(memory_pool().await);
        repo.insert("a", "b", "first").await.unwrap();
        repo.insert("c", "a", "second").await.unwrap();
        repo.insert("c", "d", "unrelated").await.unwrap();

        let all = repo.list_involving("a").await.unwrap();
        let bodies: Vec<_> = all.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["second", "first"]);
    }

    #[tokio::test]
    async fn inserts_are_published_to_change_feed() {
        let feed = Arc::new(LocalChangeFeed::new());
        let mut rx = feed.subscribe_inserts(MESSAGES_TABLE).await.unwrap();
        let repo = SqliteMessageRepository::with_change_feed(memory_pool().await, feed.clone());

        let stored = repo.insert("b", "a", "Can you help?").await.unwrap();
        let row = rx.recv().await.unwrap();
        let published: Message = serde_json::from_value(row).unwrap();
        assert_eq!(published, stored);
    }
}
