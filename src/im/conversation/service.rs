//! 会话列表服务层
//!
//! 拉取当前用户相关的全部消息，解析显示名，折叠为会话列表并通知监听器。

use crate::im::conversation::aggregator::{filter_by_name, sorted_newest_first, summarize};
use crate::im::conversation::listener::{ConversationListener, EmptyConversationListener};
use crate::im::conversation::models::ConversationSummary;
use crate::im::error::Result;
use crate::im::message::models::Message;
use crate::im::message::store::MessageStore;
use crate::im::profile::dao::ProfileDirectory;
use crate::im::realtime::transport::{
    resubscribe, ChangeFeedTransport, ReconnectPolicy, MESSAGES_TABLE,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ConversationService {
    store: Arc<MessageStore>,
    directory: Arc<dyn ProfileDirectory>,
    listener: Arc<dyn ConversationListener>,
    /// 最近一次刷新的结果
    cache: RwLock<Vec<ConversationSummary>>,
    reconnect: ReconnectPolicy,
}

impl ConversationService {
    /// 使用默认空监听器
    pub fn new(store: Arc<MessageStore>, directory: Arc<dyn ProfileDirectory>) -> Self {
        Self::with_listener(store, directory, Arc::new(EmptyConversationListener))
    }

    pub fn with_listener(
        store: Arc<MessageStore>,
        directory: Arc<dyn ProfileDirectory>,
        listener: Arc<dyn ConversationListener>,
    ) -> Self {
        Self {
            store,
            directory,
            listener,
            cache: RwLock::new(Vec::new()),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// 自动刷新订阅断开后的重连参数
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// 重新计算会话列表；身份每次重新读取
    pub async fn refresh(&self) -> Result<Vec<ConversationSummary>> {
        self.listener.on_sync_start().await;
        match self.load().await {
            Ok(list) => {
                *self.cache.write().await = list.clone();
                self.listener.on_conversations_changed(list.clone()).await;
                self.listener.on_sync_finish().await;
                Ok(list)
            }
            Err(e) => {
                warn!("[ConvList] ❌ 刷新会话列表失败: {}", e);
                self.listener.on_sync_failed(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<Vec<ConversationSummary>> {
        let current_user = self.store.current_user().await?;
        let messages = self.store.involving(&current_user).await?;

        let ids: Vec<String> = messages
            .iter()
            .filter_map(|m| m.counterparty_of(&current_user))
            .filter(|id| *id != current_user)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let names = self.directory.display_names(&ids).await?;

        let list = sorted_newest_first(summarize(&current_user, &messages, &names));
        info!(
            "[ConvList] ✅ {} 的会话 {} 个（消息 {} 条）",
            current_user,
            list.len(),
            messages.len()
        );
        Ok(list)
    }

    /// 最近一次刷新的会话列表
    pub async fn list(&self) -> Vec<ConversationSummary> {
        self.cache.read().await.clone()
    }

    /// 按显示名搜索缓存的会话列表，不修改缓存
    pub async fn search(&self, query: &str) -> Vec<ConversationSummary> {
        let cache = self.cache.read().await;
        filter_by_name(&cache, query).into_iter().cloned().collect()
    }

    /// 有涉及当前用户的新消息时自动刷新
    ///
    /// 订阅断开后自动重新订阅，成功后全量刷新一次以补上断线期间的消息。
    pub async fn start_live_refresh(
        self: Arc<Self>,
        transport: Arc<dyn ChangeFeedTransport>,
    ) -> Result<JoinHandle<()>> {
        let rx = transport.subscribe_inserts(MESSAGES_TABLE).await?;
        Ok(tokio::spawn(self.follow(transport, rx)))
    }

    async fn follow(
        self: Arc<Self>,
        transport: Arc<dyn ChangeFeedTransport>,
        mut rx: mpsc::UnboundedReceiver<Value>,
    ) {
        loop {
            while let Some(row) = rx.recv().await {
                if let Some(message) = self.relevant(row).await {
                    debug!("[ConvList] 新消息 {}，刷新会话列表", message.id);
                    // 失败已通过监听器上报
                    let _ = self.refresh().await;
                }
            }
            warn!("[ConvList] 🔌 消息变更订阅已断开，准备重新订阅");
            rx = match resubscribe(transport.as_ref(), MESSAGES_TABLE, self.reconnect).await {
                Ok(rx) => rx,
                Err(e) => {
                    error!("[ConvList] ❌ 停止自动刷新会话列表: {}", e);
                    return;
                }
            };
            let _ = self.refresh().await;
        }
    }

    /// 只关心涉及当前用户的消息
    async fn relevant(&self, row: Value) -> Option<Message> {
        let message = serde_json::from_value::<Message>(row).ok()?;
        let current_user = self.store.current_user().await.ok()?;
        message.counterparty_of(&current_user)?;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::auth::LocalSession;
    use crate::im::db::memory_pool;
    use crate::im::error::ImError;
    use crate::im::message::dao::SqliteMessageRepository;
    use crate::im::notification::models::NotificationSettings;
    use crate::im::profile::dao::SqliteProfileDirectory;
    use crate::im::profile::models::{Profile, Role};
    use crate::im::realtime::transport::LocalChangeFeed;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChangeCollector {
        tx: mpsc::UnboundedSender<Vec<ConversationSummary>>,
    }

    #[async_trait]
    impl ConversationListener for ChangeCollector {
        async fn on_sync_start(&self) {}
        async fn on_sync_finish(&self) {}
        async fn on_sync_failed(&self, _error: String) {}
        async fn on_conversations_changed(&self, conversations: Vec<ConversationSummary>) {
            let _ = self.tx.send(conversations);
        }
    }

    fn profile(id: &str, name: &str, role: Role) -> Profile {
        Profile {
            id: id.to_string(),
            full_name: name.to_string(),
            phone: "555-0100".to_string(),
            role,
            blood_type: None,
            city: "Springfield".to_string(),
            is_verified: true,
            is_available: true,
        }
    }

    struct Fixture {
        session: Arc<LocalSession>,
        store: Arc<MessageStore>,
        directory: Arc<SqliteProfileDirectory>,
        feed: Arc<LocalChangeFeed>,
    }

    async fn fixture() -> Fixture {
        let pool = memory_pool().await;
        let feed = Arc::new(LocalChangeFeed::new());
        let session = Arc::new(LocalSession::new());
        let repo = Arc::new(SqliteMessageRepository::with_change_feed(pool.clone(), feed.clone()));
        let directory = Arc::new(SqliteProfileDirectory::new(pool));
        for (id, name, role) in [("a", "Alice Donor", Role::Donor), ("b", "Bob Recipient", Role::Recipient)] {
            directory
                .upsert(id, &profile(id, name, role), &NotificationSettings::default())
                .await
                .unwrap();
        }
        Fixture {
            store: Arc::new(MessageStore::new(repo, session.clone())),
            session,
            directory,
            feed,
        }
    }

    #[tokio::test]
    async fn refresh_folds_and_resolves_names() {
        let f = fixture().await;
        f.session.sign_in("b");
        f.store.append("b", "a", "Can you help?").await.unwrap();
        f.store.append("b", "ghost", "hello?").await.unwrap();

        f.session.sign_in("a");
        let service = ConversationService::new(f.store.clone(), f.directory.clone());
        let list = service.refresh().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].counterparty_id, "b");
        assert_eq!(list[0].display_name, "Bob Recipient");
        assert_eq!(list[0].last_message, "Can you help?");

        f.session.sign_in("b");
        let list = service.refresh().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name, "Unknown User");
        assert_eq!(service.search("alice").await.len(), 1);
        assert_eq!(service.list().await.len(), 2);
    }

    #[tokio::test]
    async fn refresh_requires_identity() {
        let f = fixture().await;
        let service = ConversationService::new(f.store.clone(), f.directory.clone());
        assert!(matches!(service.refresh().await, Err(ImError::NotAuthenticated)));
        assert!(service.list().await.is_empty());
    }

    #[tokio::test]
    async fn live_refresh_follows_new_messages() {
        let f = fixture().await;
        f.session.sign_in("a");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = Arc::new(ConversationService::with_listener(
            f.store.clone(),
            f.directory.clone(),
            Arc::new(ChangeCollector { tx }),
        ));
        let handle = service.clone().start_live_refresh(f.feed.clone()).await.unwrap();

        f.store.append("a", "b", "I can donate tomorrow").await.unwrap();
        let list = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("等待刷新超时")
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_message, "I can donate tomorrow");
        handle.abort();
    }

    #[tokio::test]
    async fn live_refresh_resubscribes_after_connection_loss() {
        let f = fixture().await;
        f.session.sign_in("a");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = Arc::new(
            ConversationService::with_listener(
                f.store.clone(),
                f.directory.clone(),
                Arc::new(ChangeCollector { tx }),
            )
            .with_reconnect(ReconnectPolicy {
                delay: Duration::from_millis(10),
                max_attempts: 200,
            }),
        );
        let handle = service.clone().start_live_refresh(f.feed.clone()).await.unwrap();

        f.feed.drop_connections();
        f.store.append("a", "b", "hello").await.unwrap();

        let list = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let list = rx.recv().await.unwrap();
                if !list.is_empty() {
                    return list;
                }
            }
        })
        .await
        .expect("等待刷新超时");
        assert_eq!(list[0].last_message, "hello");
        assert_eq!(service.list().await.len(), 1);
        assert!(!handle.is_finished());
        handle.abort();
    }
}
