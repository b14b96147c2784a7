//! 消息存储适配层
//!
//! 在存储后端之上做输入校验和身份检查。身份每次操作都重新读取。

use crate::im::auth::{require_user, SessionProvider};
use crate::im::config::ClientConfig;
use crate::im::error::{ImError, Result};
use crate::im::message::api::RestMessageRepository;
use crate::im::message::dao::{MessageRepository, SqliteMessageRepository};
use crate::im::message::models::Message;
use crate::im::realtime::transport::LocalChangeFeed;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct MessageStore {
    repo: Arc<dyn MessageRepository>,
    session: Arc<dyn SessionProvider>,
}

impl MessageStore {
    pub fn new(repo: Arc<dyn MessageRepository>, session: Arc<dyn SessionProvider>) -> Self {
        Self { repo, session }
    }

    /// 追加一条消息
    ///
    /// 正文去除首尾空白后为空返回 `Validation`；没有登录身份，
    /// 或 `sender` 不是当前登录用户时返回 `NotAuthenticated`。
    pub async fn append(&self, sender: &str, receiver: &str, body: &str) -> Result<Message> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ImError::validation("消息内容不能为空"));
        }
        if receiver.trim().is_empty() {
            return Err(ImError::validation("接收者不能为空"));
        }

        let active = require_user(self.session.as_ref()).await?;
        if active != sender {
            warn!("[MsgStore] 发送者 {} 不是当前登录用户 {}", sender, active);
            return Err(ImError::NotAuthenticated);
        }

        let msg = self.repo.insert(sender, receiver, body).await?;
        info!("[MsgStore] ✅ 消息已写入 id={} {} -> {}", msg.id, sender, receiver);
        Ok(msg)
    }

    /// `{a, b}` 之间的完整聊天记录，按时间升序；可重复调用
    ///
    /// 只有会话双方可以读取，否则返回 `NotAuthenticated`。
    pub async fn history(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let active = require_user(self.session.as_ref()).await?;
        if active != a && active != b {
            warn!("[MsgStore] {} 无权读取 {} <-> {} 的聊天记录", active, a, b);
            return Err(ImError::NotAuthenticated);
        }
        let history = self.repo.list_between(a, b).await?;
        debug!("[MsgStore] 📜 {} <-> {} 历史 {} 条", a, b, history.len());
        Ok(history)
    }

    /// 与 `user` 相关的全部消息，按时间降序（会话列表折叠使用）
    pub async fn involving(&self, user: &str) -> Result<Vec<Message>> {
        let active = require_user(self.session.as_ref()).await?;
        if active != user {
            warn!("[MsgStore] {} 无权读取 {} 的消息", active, user);
            return Err(ImError::NotAuthenticated);
        }
        self.repo.list_involving(user).await
    }

    /// 当前登录用户
    pub async fn current_user(&self) -> Result<String> {
        require_user(self.session.as_ref()).await
    }
}

/// 按配置选择存储后端：配置了托管后端地址时使用 REST，否则使用本地 SQLite
pub fn repository_for(
    config: &ClientConfig,
    pool: Pool<Sqlite>,
    feed: Arc<LocalChangeFeed>,
    access_token: Option<&str>,
) -> Result<Arc<dyn MessageRepository>> {
    match (&config.rest_base_url, &config.anon_key) {
        (Some(base_url), Some(anon_key)) => {
            info!("[MsgStore] 使用托管后端: {}", base_url);
            Ok(Arc::new(RestMessageRepository::new(base_url, anon_key, access_token)?))
        }
        (Some(_), None) => Err(ImError::validation("配置了托管后端地址但缺少 anon key")),
        _ => Ok(Arc::new(SqliteMessageRepository::with_change_feed(pool, feed))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::auth::LocalSession;
    use crate::im::db::memory_pool;

    async fn store_for(session: Arc<LocalSession>) -> MessageStore {
        let repo = Arc::new(SqliteMessageRepository::new(memory_pool().await));
        MessageStore::new(repo, session)
    }

    #[tokio::test]
    async fn append_then_history_contains_exactly_one() {
        let session = Arc::new(LocalSession::signed_in("b"));
        let store = store_for(session).await;

        let first = store.append("b", "a", "earlier").await.unwrap();
        let sent = store.append("b", "a", "  Can you help?  ").await.unwrap();
        assert_eq!(sent.body, "Can you help?");
        assert!(sent.created_at >= first.created_at);

        let history = store.history("b", "a").await.unwrap();
        let matching: Vec<_> = history.iter().filter(|m| m.body == "Can you help?").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].id, sent.id);
    }

    #[tokio::test]
    async fn backend_follows_config() {
        let pool = memory_pool().await;
        let feed = Arc::new(LocalChangeFeed::new());

        let local = repository_for(&ClientConfig::in_memory(), pool.clone(), feed.clone(), None).unwrap();
        assert_eq!(local.insert("a", "b", "hi").await.unwrap().body, "hi");

        let rest = ClientConfig::in_memory().with_rest_backend("https://db.example.org", "anon");
        assert!(repository_for(&rest, pool.clone(), feed.clone(), Some("token")).is_ok());

        let mut missing_key = rest.clone();
        missing_key.anon_key = None;
        assert!(matches!(
            repository_for(&missing_key, pool, feed, None),
            Err(ImError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn blank_body_is_rejected_before_auth() {
        let store = store_for(Arc::new(LocalSession::new())).await;
        assert!(matches!(
            store.append("b", "a", "   \n\t").await,
            Err(ImError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn append_requires_active_identity_matching_sender() {
        let session = Arc::new(LocalSession::new());
        let store = store_for(session.clone()).await;
        assert!(matches!(
            store.append("b", "a", "hi").await,
            Err(ImError::NotAuthenticated)
        ));

        session.sign_in("a");
        assert!(matches!(
            store.append("b", "a", "hi").await,
            Err(ImError::NotAuthenticated)
        ));
        assert!(store.append("a", "b", "hi").await.is_ok());

        session.sign_out();
        assert!(matches!(
            store.history("a", "b").await,
            Err(ImError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn reads_are_limited_to_participants() {
        let session = Arc::new(LocalSession::signed_in("a"));
        let store = store_for(session.clone()).await;
        store.append("a", "b", "private").await.unwrap();

        session.sign_in("eve");
        assert!(matches!(
            store.history("a", "b").await,
            Err(ImError::NotAuthenticated)
        ));
        assert!(matches!(
            store.involving("a").await,
            Err(ImError::NotAuthenticated)
        ));
        assert!(store.history("eve", "a").await.unwrap().is_empty());

        session.sign_in("b");
        assert_eq!(store.history("a", "b").await.unwrap().len(), 1);
        assert_eq!(store.involving("b").await.unwrap().len(), 1);
    }
}
