//! 实时消息订阅
//!
//! 每个订阅是一个显式状态机：`Idle → Subscribing → Active → (Error | Closed)`。
//! 连接丢失进入 `Error`，可以重新订阅；`Closed` 是终态。

use crate::im::error::{ImError, Result};
use crate::im::message::models::Message;
use crate::im::realtime::transport::{ChangeFeedTransport, MESSAGES_TABLE};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    Subscribing,
    Active,
    Error,
    Closed,
}

/// 新消息回调
///
/// 回调期间持有订阅的状态锁，回调内部不能调用同一订阅的 `unsubscribe`。
#[async_trait]
pub trait MessageFeedListener: Send + Sync {
    async fn on_insert(&self, message: Message);
}

/// 只放行某一对身份之间的消息（两个方向都算）
#[derive(Debug, Clone)]
pub struct PairFilter {
    pub a: String,
    pub b: String,
}

impl PairFilter {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        message.is_between(&self.a, &self.b)
    }
}

struct FeedInner {
    state: FeedState,
    /// 每次订阅 / 取消订阅递增，旧的投递任务据此失效
    generation: u64,
}

pub struct LiveMessageFeed {
    transport: Arc<dyn ChangeFeedTransport>,
    filter: PairFilter,
    gate: Arc<Mutex<FeedInner>>,
    state_tx: Arc<watch::Sender<FeedState>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LiveMessageFeed {
    pub fn new(transport: Arc<dyn ChangeFeedTransport>, filter: PairFilter) -> Self {
        let (state_tx, _rx) = watch::channel(FeedState::Idle);
        Self {
            transport,
            filter,
            gate: Arc::new(Mutex::new(FeedInner {
                state: FeedState::Idle,
                generation: 0,
            })),
            state_tx: Arc::new(state_tx),
            task: std::sync::Mutex::new(None),
        }
    }

    pub async fn state(&self) -> FeedState {
        self.gate.lock().await.state
    }

    /// 状态变化通知
    pub fn watch_state(&self) -> watch::Receiver<FeedState> {
        self.state_tx.subscribe()
    }

    fn set_state(inner: &mut FeedInner, state_tx: &watch::Sender<FeedState>, state: FeedState) {
        if inner.state != state {
            debug!("[Feed] 状态 {:?} -> {:?}", inner.state, state);
            inner.state = state;
            state_tx.send_replace(state);
        }
    }

    fn replace_task(&self, handle: Option<JoinHandle<()>>) {
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = std::mem::replace(&mut *slot, handle) {
            old.abort();
        }
    }

    /// 建立订阅，收到确认后进入 `Active`
    ///
    /// 只允许从 `Idle` 或 `Error` 发起；`Error` 下重新订阅不会补发断线期间的消息，
    /// 调用方需要自行全量补拉。
    pub async fn subscribe(&self, listener: Arc<dyn MessageFeedListener>) -> Result<()> {
        let mut inner = self.gate.lock().await;
        match inner.state {
            FeedState::Idle | FeedState::Error => {}
            FeedState::Closed => return Err(ImError::InvalidState("订阅已关闭".into())),
            FeedState::Subscribing | FeedState::Active => {
                return Err(ImError::InvalidState("订阅已存在".into()))
            }
        }

        Self::set_state(&mut inner, &self.state_tx, FeedState::Subscribing);
        let rx = match self.transport.subscribe_inserts(MESSAGES_TABLE).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("[Feed] ❌ 订阅失败: {}", e);
                Self::set_state(&mut inner, &self.state_tx, FeedState::Error);
                return Err(e);
            }
        };

        inner.generation += 1;
        let generation = inner.generation;
        Self::set_state(&mut inner, &self.state_tx, FeedState::Active);
        info!(
            "[Feed] 📡 订阅生效: {} <-> {} (第 {} 次)",
            self.filter.a, self.filter.b, generation
        );

        let handle = tokio::spawn(Self::pump(
            rx,
            self.filter.clone(),
            listener,
            self.gate.clone(),
            self.state_tx.clone(),
            generation,
        ));
        self.replace_task(Some(handle));
        Ok(())
    }

    async fn pump(
        mut rx: mpsc::UnboundedReceiver<Value>,
        filter: PairFilter,
        listener: Arc<dyn MessageFeedListener>,
        gate: Arc<Mutex<FeedInner>>,
        state_tx: Arc<watch::Sender<FeedState>>,
        generation: u64,
    ) {
        while let Some(row) = rx.recv().await {
            let message: Message = match serde_json::from_value(row) {
                Ok(m) => m,
                Err(e) => {
                    warn!("[Feed] 跳过无法解析的消息行: {}", e);
                    continue;
                }
            };
            if !filter.matches(&message) {
                continue;
            }

            let inner = gate.lock().await;
            if inner.generation != generation || inner.state != FeedState::Active {
                return;
            }
            debug!("[Feed] 📨 投递消息 id={}", message.id);
            listener.on_insert(message).await;
        }

        let mut inner = gate.lock().await;
        if inner.generation == generation && inner.state == FeedState::Active {
            warn!("[Feed] 🔌 变更订阅连接丢失");
            Self::set_state(&mut inner, &state_tx, FeedState::Error);
        }
    }

    /// 取消订阅；返回后不会再有任何回调。可重复调用。
    pub async fn unsubscribe(&self) {
        let mut inner = self.gate.lock().await;
        if inner.state == FeedState::Closed {
            return;
        }
        inner.generation += 1;
        Self::set_state(&mut inner, &self.state_tx, FeedState::Closed);
        self.replace_task(None);
        info!("[Feed] 🛑 已取消订阅: {} <-> {}", self.filter.a, self.filter.b);
    }
}

impl Drop for LiveMessageFeed {
    fn drop(&mut self) {
        self.replace_task(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::message::models::sample;
    use crate::im::realtime::transport::LocalChangeFeed;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Collector {
        tx: mpsc::UnboundedSender<Message>,
    }

    #[async_trait]
    impl MessageFeedListener for Collector {
        async fn on_insert(&self, message: Message) {
            let _ = self.tx.send(message);
        }
    }

    fn collector() -> (Arc<Collector>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Collector { tx }), rx)
    }

    fn publish(feed: &LocalChangeFeed, msg: &Message) {
        feed.publish(MESSAGES_TABLE, serde_json::to_value(msg).unwrap());
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("等待消息超时")
            .expect("订阅已结束")
    }

    #[tokio::test]
    async fn delivers_pair_messages_in_order() {
        let transport = Arc::new(LocalChangeFeed::new());
        let feed = LiveMessageFeed::new(transport.clone(), PairFilter::new("a", "b"));
        let (listener, mut rx) = collector();

        assert_eq!(feed.state().await, FeedState::Idle);
        feed.subscribe(listener).await.unwrap();
        assert_eq!(feed.state().await, FeedState::Active);
        assert_eq!(*feed.watch_state().borrow(), FeedState::Active);

        publish(&transport, &sample("m1", "a", "b", "one", 1, 1));
        publish(&transport, &sample("x1", "a", "c", "other pair", 2, 2));
        transport.publish(MESSAGES_TABLE, serde_json::json!({"garbage": true}));
        publish(&transport, &sample("m2", "b", "a", "two", 3, 3));

        assert_eq!(next(&mut rx).await.id, "m1");
        assert_eq!(next(&mut rx).await.id, "m2");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_final() {
        let transport = Arc::new(LocalChangeFeed::new());
        let feed = LiveMessageFeed::new(transport.clone(), PairFilter::new("a", "b"));
        let (listener, mut rx) = collector();
        feed.subscribe(listener.clone()).await.unwrap();

        feed.unsubscribe().await;
        feed.unsubscribe().await;
        assert_eq!(feed.state().await, FeedState::Closed);

        publish(&transport, &sample("m1", "a", "b", "late", 1, 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            feed.subscribe(listener).await,
            Err(ImError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn double_subscribe_is_rejected() {
        let transport = Arc::new(LocalChangeFeed::new());
        let feed = LiveMessageFeed::new(transport, PairFilter::new("a", "b"));
        let (listener, _rx) = collector();
        feed.subscribe(listener.clone()).await.unwrap();
        assert!(matches!(
            feed.subscribe(listener).await,
            Err(ImError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn connection_loss_enters_error_and_resubscribes() {
        let transport = Arc::new(LocalChangeFeed::new());
        let feed = LiveMessageFeed::new(transport.clone(), PairFilter::new("a", "b"));
        let (listener, mut rx) = collector();
        feed.subscribe(listener.clone()).await.unwrap();

        let mut states = feed.watch_state();
        transport.drop_connections();
        timeout(Duration::from_secs(2), states.wait_for(|s| *s == FeedState::Error))
            .await
            .expect("等待 Error 超时")
            .unwrap();

        feed.subscribe(listener).await.unwrap();
        assert_eq!(feed.state().await, FeedState::Active);
        publish(&transport, &sample("m3", "b", "a", "after reconnect", 5, 5));
        assert_eq!(next(&mut rx).await.id, "m3");
    }

    #[tokio::test]
    async fn failed_subscribe_reports_transport_error() {
        let transport = Arc::new(LocalChangeFeed::new());
        transport.set_online(false);
        let feed = LiveMessageFeed::new(transport.clone(), PairFilter::new("a", "b"));
        let (listener, _rx) = collector();

        assert!(matches!(
            feed.subscribe(listener.clone()).await,
            Err(ImError::Transport(_))
        ));
        assert_eq!(feed.state().await, FeedState::Error);

        transport.set_online(true);
        feed.subscribe(listener).await.unwrap();
        assert_eq!(feed.state().await, FeedState::Active);
    }
}
