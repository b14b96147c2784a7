//! 血液请求提醒分发
//!
//! 订阅 `blood_requests` 插入事件，对每个新的 active 请求执行匹配并推送。
//! 订阅断开后按重连策略重新订阅，并补拉断线期间发布的请求；每个请求只分发一次。

use crate::im::error::Result;
use crate::im::notification::dao::SqliteBloodRequestRepository;
use crate::im::notification::matcher::{build_payload, match_request, NotificationTarget};
use crate::im::notification::models::{BloodRequest, RequestStatus};
use crate::im::notification::push::PushTransport;
use crate::im::profile::dao::ProfileDirectory;
use crate::im::realtime::transport::{
    resubscribe, ChangeFeedTransport, ReconnectPolicy, BLOOD_REQUESTS_TABLE,
};
use async_trait::async_trait;
use chrono::{Local, NaiveTime};
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 进行中请求的来源，用于重连后补拉
#[async_trait]
pub trait ActiveRequestSource: Send + Sync {
    async fn list_active(&self) -> Result<Vec<BloodRequest>>;
}

#[async_trait]
impl ActiveRequestSource for SqliteBloodRequestRepository {
    async fn list_active(&self) -> Result<Vec<BloodRequest>> {
        SqliteBloodRequestRepository::list_active(self).await
    }
}

pub struct RequestAlertDispatcher {
    transport: Arc<dyn ChangeFeedTransport>,
    directory: Arc<dyn ProfileDirectory>,
    push: Arc<dyn PushTransport>,
    requests: Option<Arc<dyn ActiveRequestSource>>,
    policy: ReconnectPolicy,
    /// 已分发（或启动前已存在）的请求 ID
    dispatched: Mutex<HashSet<String>>,
}

impl RequestAlertDispatcher {
    pub fn new(
        transport: Arc<dyn ChangeFeedTransport>,
        directory: Arc<dyn ProfileDirectory>,
        push: Arc<dyn PushTransport>,
    ) -> Self {
        Self {
            transport,
            directory,
            push,
            requests: None,
            policy: ReconnectPolicy::default(),
            dispatched: Mutex::new(HashSet::new()),
        }
    }

    /// 设置补拉来源；未设置时重连后只处理新的推送
    pub fn with_request_source(mut self, requests: Arc<dyn ActiveRequestSource>) -> Self {
        self.requests = Some(requests);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 按本地当前时间分发
    pub async fn dispatch(&self, request: &BloodRequest) -> Result<Vec<NotificationTarget>> {
        self.dispatch_at(request, Local::now().time()).await
    }

    /// 匹配并推送，返回命中的目标；单个推送失败只记录日志
    pub async fn dispatch_at(
        &self,
        request: &BloodRequest,
        now: NaiveTime,
    ) -> Result<Vec<NotificationTarget>> {
        if request.status != RequestStatus::Active {
            info!("[Dispatch] 跳过非 active 请求 {} ({:?})", request.id, request.status);
            return Ok(Vec::new());
        }

        let candidates = self.directory.donor_candidates().await?;
        let targets = match_request(request, &candidates, now);

        let sends = targets.iter().map(|target| {
            let payload = build_payload(request, target.reason);
            let push = self.push.clone();
            async move {
                let res = push.push(&target.donor_id, &payload).await;
                (target.donor_id.as_str(), res)
            }
        });
        let mut failed = 0;
        for (donor_id, res) in join_all(sends).await {
            if let Err(e) = res {
                failed += 1;
                warn!("[Dispatch] 推送给 {} 失败: {}", donor_id, e);
            }
        }

        info!(
            "[Dispatch] ✅ 请求 {} 推送 {} 人，失败 {} 人",
            request.id,
            targets.len(),
            failed
        );
        Ok(targets)
    }

    /// 订阅请求插入事件并在后台分发
    ///
    /// 启动时已存在的请求视为已处理，不会因为之后的补拉再次推送。
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        let rx = self.transport.subscribe_inserts(BLOOD_REQUESTS_TABLE).await?;
        if let Some(requests) = &self.requests {
            let existing = requests.list_active().await?;
            debug!("[Dispatch] 启动前已有 {} 个进行中的请求", existing.len());
            self.dispatched
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(existing.into_iter().map(|r| r.id));
        }
        info!("[Dispatch] 📡 开始监听新的血液请求");
        Ok(tokio::spawn(self.run(rx)))
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Value>) {
        loop {
            while let Some(row) = rx.recv().await {
                match serde_json::from_value::<BloodRequest>(row) {
                    Ok(request) => self.dispatch_once(&request).await,
                    Err(e) => warn!("[Dispatch] 跳过无法解析的请求行: {}", e),
                }
            }
            warn!("[Dispatch] 🔌 请求变更订阅已断开，准备重新订阅");
            rx = match resubscribe(self.transport.as_ref(), BLOOD_REQUESTS_TABLE, self.policy).await {
                Ok(rx) => rx,
                Err(e) => {
                    error!("[Dispatch] ❌ 停止监听血液请求: {}", e);
                    return;
                }
            };
            self.catch_up().await;
        }
    }

    /// 补拉断线期间发布的请求，按发布时间先后分发
    async fn catch_up(&self) {
        let Some(requests) = &self.requests else {
            return;
        };
        match requests.list_active().await {
            Ok(active) => {
                debug!("[Dispatch] 补拉到 {} 个进行中的请求", active.len());
                for request in active.iter().rev() {
                    self.dispatch_once(request).await;
                }
            }
            Err(e) => warn!("[Dispatch] 重连后补拉请求失败: {}", e),
        }
    }

    async fn dispatch_once(&self, request: &BloodRequest) {
        let fresh = self
            .dispatched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.id.clone());
        if !fresh {
            debug!("[Dispatch] 请求 {} 已分发过，跳过", request.id);
            return;
        }
        if let Err(e) = self.dispatch(request).await {
            error!("[Dispatch] ❌ 请求 {} 分发失败: {}", request.id, e);
            // 失败的请求留给下一次补拉
            self.dispatched
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request.id);
        }
    }
}
