//! 一对一聊天会话
//!
//! 打开时先拉取历史，再订阅实时消息；两条路径到达的消息按 ID 去重，
//! 聊天记录始终按时间升序。实时订阅断开后由后台任务自动重新订阅并全量补拉。

use crate::im::chat::listener::{ChatSessionListener, EmptyChatSessionListener};
use crate::im::chat::transcript::Transcript;
use crate::im::config::ClientConfig;
use crate::im::error::{ImError, Result};
use crate::im::message::models::Message;
use crate::im::message::store::MessageStore;
use crate::im::realtime::feed::{FeedState, LiveMessageFeed, MessageFeedListener, PairFilter};
use crate::im::realtime::transport::ChangeFeedTransport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 重连参数
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::new())
    }
}

impl From<&ClientConfig> for ChatOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

struct SessionShared {
    current_user: String,
    counterparty: String,
    store: Arc<MessageStore>,
    feed: LiveMessageFeed,
    sink: Arc<dyn MessageFeedListener>,
    transcript: Mutex<Transcript>,
    /// 最近一次通知给监听器的聊天记录版本
    notified: Mutex<u64>,
    /// close 之后置为 false，之后到达的结果一律丢弃
    active: AtomicBool,
    listener: Arc<dyn ChatSessionListener>,
    options: ChatOptions,
}

/// 实时订阅的投递目标
struct FeedSink {
    session: Weak<SessionShared>,
}

#[async_trait]
impl MessageFeedListener for FeedSink {
    async fn on_insert(&self, message: Message) {
        if let Some(session) = self.session.upgrade() {
            session.accept(vec![message]).await;
        }
    }
}

impl SessionShared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 合并消息并在有新增时通知监听器
    ///
    /// 通知按版本串行，晚到的旧快照直接丢弃，监听器最后看到的总是最新记录。
    async fn accept(&self, messages: Vec<Message>) -> usize {
        if !self.is_active() {
            return 0;
        }
        let (added, revision, snapshot) = {
            let mut transcript = self.transcript.lock().await;
            let added = transcript.merge(messages);
            if added == 0 {
                return 0;
            }
            (added, transcript.revision(), transcript.messages().to_vec())
        };
        debug!(
            "[Chat] {} <-> {} 新增 {} 条，共 {} 条",
            self.current_user,
            self.counterparty,
            added,
            snapshot.len()
        );

        let mut notified = self.notified.lock().await;
        if revision <= *notified {
            debug!("[Chat] 丢弃过期快照 r{}（已通知 r{}）", revision, *notified);
            return added;
        }
        *notified = revision;
        self.listener.on_transcript_changed(snapshot).await;
        added
    }

    /// 全量拉取历史并合并；会话关闭后才返回的结果被丢弃
    async fn reload(&self) -> Result<usize> {
        if !self.is_active() {
            return Err(ImError::InvalidState("会话已关闭".into()));
        }
        let history = self
            .store
            .history(&self.current_user, &self.counterparty)
            .await?;
        if !self.is_active() {
            debug!("[Chat] 会话已关闭，丢弃迟到的历史记录 {} 条", history.len());
            return Ok(0);
        }
        Ok(self.accept(history).await)
    }

    /// 重新订阅并补拉；连续失败达到上限返回 false
    async fn reconnect(&self) -> bool {
        let max = self.options.max_reconnect_attempts;
        for attempt in 1..=max {
            tokio::time::sleep(self.options.reconnect_delay).await;
            if !self.is_active() {
                return false;
            }
            match self.feed.subscribe(self.sink.clone()).await {
                Ok(()) => {
                    info!(
                        "[Chat] 🔄 第 {} 次重连成功: {} <-> {}",
                        attempt, self.current_user, self.counterparty
                    );
                    if let Err(e) = self.reload().await {
                        warn!("[Chat] 重连后补拉历史失败: {}", e);
                    }
                    return true;
                }
                Err(ImError::InvalidState(_)) => return false,
                Err(e) => warn!("[Chat] 第 {}/{} 次重连失败: {}", attempt, max, e),
            }
        }
        error!(
            "[Chat] ❌ 重连 {} 次均失败，停止重连: {} <-> {}",
            max, self.current_user, self.counterparty
        );
        false
    }
}

/// 订阅状态监督：转发状态变化，进入 Error 时自动重连
async fn supervise(shared: Arc<SessionShared>, mut states: watch::Receiver<FeedState>) {
    loop {
        let state = *states.borrow_and_update();
        shared.listener.on_feed_state_changed(state).await;
        match state {
            FeedState::Closed => return,
            FeedState::Error => {
                if !shared.reconnect().await {
                    return;
                }
            }
            _ => {}
        }
        if states.changed().await.is_err() {
            return;
        }
    }
}

pub struct ChatSession {
    shared: Arc<SessionShared>,
    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// 使用默认重连参数和空监听器打开会话
    pub async fn open(
        store: Arc<MessageStore>,
        transport: Arc<dyn ChangeFeedTransport>,
        current_user: &str,
        counterparty: &str,
    ) -> Result<Self> {
        Self::open_with(
            store,
            transport,
            current_user,
            counterparty,
            ChatOptions::default(),
            Arc::new(EmptyChatSessionListener),
        )
        .await
    }

    /// 打开会话：先加载历史，再订阅实时消息，订阅成功后再补拉一次
    ///
    /// 历史加载失败直接返回错误；订阅失败不会导致打开失败，
    /// 后台会按 `options` 自动重试。
    pub async fn open_with(
        store: Arc<MessageStore>,
        transport: Arc<dyn ChangeFeedTransport>,
        current_user: &str,
        counterparty: &str,
        options: ChatOptions,
        listener: Arc<dyn ChatSessionListener>,
    ) -> Result<Self> {
        if counterparty.trim().is_empty() || counterparty == current_user {
            return Err(ImError::validation(format!("无效的聊天对象: {:?}", counterparty)));
        }

        let shared = Arc::new_cyclic(|weak: &Weak<SessionShared>| SessionShared {
            current_user: current_user.to_string(),
            counterparty: counterparty.to_string(),
            store,
            feed: LiveMessageFeed::new(transport, PairFilter::new(current_user, counterparty)),
            sink: Arc::new(FeedSink {
                session: weak.clone(),
            }),
            transcript: Mutex::new(Transcript::new()),
            notified: Mutex::new(0),
            active: AtomicBool::new(true),
            listener,
            options,
        });

        let mut loaded = shared.reload().await?;
        match shared.feed.subscribe(shared.sink.clone()).await {
            // 补上历史快照之后、订阅确认之前写入的消息
            Ok(()) => match shared.reload().await {
                Ok(added) => loaded += added,
                Err(e) => warn!("[Chat] 订阅后补拉历史失败: {}", e),
            },
            Err(e) => warn!("[Chat] 实时订阅失败，稍后重试: {}", e),
        }

        let supervisor = tokio::spawn(supervise(shared.clone(), shared.feed.watch_state()));
        info!(
            "[Chat] 💬 打开会话 {} <-> {}，历史 {} 条",
            current_user, counterparty, loaded
        );
        Ok(Self {
            shared,
            supervisor: std::sync::Mutex::new(Some(supervisor)),
        })
    }

    /// 发送消息
    ///
    /// 成功后立即把返回的消息合并进聊天记录；实时订阅稍后送达的同一条消息会被去重。
    pub async fn send(&self, body: &str) -> Result<Message> {
        if !self.shared.is_active() {
            return Err(ImError::InvalidState("会话已关闭".into()));
        }
        let message = self
            .shared
            .store
            .append(&self.shared.current_user, &self.shared.counterparty, body)
            .await?;
        self.shared.accept(vec![message.clone()]).await;
        Ok(message)
    }

    /// 手动刷新：全量拉取历史并合并，返回新增条数
    pub async fn reload(&self) -> Result<usize> {
        self.shared.reload().await
    }

    /// 关闭会话，释放实时订阅；可重复调用
    pub async fn close(&self) {
        if !self.shared.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.abort_supervisor();
        self.shared.feed.unsubscribe().await;
        self.shared
            .listener
            .on_feed_state_changed(FeedState::Closed)
            .await;
        info!(
            "[Chat] 🛑 关闭会话 {} <-> {}",
            self.shared.current_user, self.shared.counterparty
        );
    }

    fn abort_supervisor(&self) {
        let mut slot = self.supervisor.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// 当前聊天记录快照（按时间升序）
    pub async fn transcript(&self) -> Vec<Message> {
        self.shared.transcript.lock().await.messages().to_vec()
    }

    pub async fn feed_state(&self) -> FeedState {
        self.shared.feed.state().await
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn current_user(&self) -> &str {
        &self.shared.current_user
    }

    pub fn counterparty(&self) -> &str {
        &self.shared.counterparty
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.abort_supervisor();
    }
}
