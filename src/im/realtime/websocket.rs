//! 托管后端的实时变更订阅（WebSocket）
//!
//! 每次订阅建立一条独立连接：发送 `phx_join` 加入 `realtime:public:{table}` 频道，
//! 收到 `ok` 回复即视为订阅确认；之后定时发送心跳，把 INSERT 事件中的行转发给接收端。
//! 连接断开或频道被关闭时接收端随之关闭，由调用方重新订阅。

use crate::im::error::{ImError, Result};
use crate::im::realtime::transport::ChangeFeedTransport;
use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, error, info, warn};

const JOIN_REF: &str = "1";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 服务器下发的一帧（只保留订阅关心的部分）
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    /// 对 join / 心跳的回复
    Reply {
        reference: Option<String>,
        ok: bool,
        detail: String,
    },
    /// 一行 INSERT
    Insert(Value),
    /// 频道被服务器关闭或出错
    ChannelDown(String),
    Other,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
}

pub(crate) fn topic_for(table: &str) -> String {
    format!("realtime:public:{}", table)
}

/// 加入频道：只订阅该表的 INSERT
pub(crate) fn join_frame(table: &str, access_token: Option<&str>) -> Value {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "INSERT", "schema": "public", "table": table }
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    json!({
        "topic": topic_for(table),
        "event": "phx_join",
        "payload": payload,
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
    })
}

pub(crate) fn heartbeat_frame(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

/// 解析一帧文本
///
/// 新协议的行在 `payload.data.record`，旧协议（事件名为 `INSERT`）在 `payload.record`。
pub(crate) fn parse_frame(text: &str) -> Result<Frame> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let frame = match raw.event.as_str() {
        "phx_reply" => Frame::Reply {
            reference: raw.reference,
            ok: raw.payload["status"] == "ok",
            detail: raw.payload["response"].to_string(),
        },
        "postgres_changes" => {
            let data = &raw.payload["data"];
            match (data["type"].as_str(), data.get("record")) {
                (Some("INSERT"), Some(record)) => Frame::Insert(record.clone()),
                _ => Frame::Other,
            }
        }
        "INSERT" => match raw.payload.get("record") {
            Some(record) => Frame::Insert(record.clone()),
            None => Frame::Other,
        },
        "phx_close" | "phx_error" => Frame::ChannelDown(format!("{} ({})", raw.event, raw.topic)),
        _ => Frame::Other,
    };
    Ok(frame)
}

/// 由 REST 地址推出实时订阅地址：`http(s)` 换成 `ws(s)`
pub(crate) fn socket_url(base_url: &str, anon_key: &str) -> Result<Url> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|e| ImError::validation(format!("无效的后端地址 {}: {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(ImError::validation(format!("不支持的协议: {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ImError::validation(format!("无法转换为 {} 地址: {}", scheme, base_url)))?;
    let path = format!("{}/realtime/v1/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// 等待加入频道的回复
async fn wait_for_join<S>(read: &mut S, table: &str) -> Result<()>
where
    S: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    while let Some(msg) = read.next().await {
        let WsMessage::Text(text) = msg? else {
            continue;
        };
        match parse_frame(&text) {
            Ok(Frame::Reply { reference, ok, detail }) if reference.as_deref() == Some(JOIN_REF) => {
                return if ok {
                    Ok(())
                } else {
                    Err(ImError::transport(format!("订阅 {} 被拒绝: {}", table, detail)))
                };
            }
            Ok(Frame::ChannelDown(reason)) => {
                return Err(ImError::transport(format!("订阅 {} 失败: {}", table, reason)));
            }
            Ok(_) => {}
            Err(e) => debug!("[Realtime] 忽略无法解析的帧: {}", e),
        }
    }
    Err(ImError::transport("等待订阅确认时连接已关闭"))
}

/// 托管后端的变更订阅
pub struct RealtimeChangeFeed {
    url: Url,
    access_token: Option<String>,
    heartbeat: Duration,
}

impl RealtimeChangeFeed {
    /// `access_token` 为空时以匿名身份订阅
    pub fn new(base_url: &str, anon_key: &str, access_token: Option<&str>) -> Result<Self> {
        Ok(Self {
            url: socket_url(base_url, anon_key)?,
            access_token: access_token.map(str::to_string),
            heartbeat: HEARTBEAT_INTERVAL,
        })
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

#[async_trait]
impl ChangeFeedTransport for RealtimeChangeFeed {
    async fn subscribe_inserts(&self, table: &str) -> Result<mpsc::UnboundedReceiver<Value>> {
        info!("[Realtime] 🔗 连接实时订阅: {} ({})", self.url.host_str().unwrap_or(""), table);
        let (ws_stream, response) = connect_async(self.url.as_str()).await?;
        debug!("[Realtime] ✅ WebSocket 连接成功, 状态: {}", response.status());

        let (mut write, mut read) = ws_stream.split();
        let join = join_frame(table, self.access_token.as_deref());
        write.send(WsMessage::Text(join.to_string())).await?;

        timeout(JOIN_TIMEOUT, wait_for_join(&mut read, table))
            .await
            .map_err(|_| ImError::transport(format!("等待订阅 {} 确认超时", table)))??;
        info!("[Realtime] ✅ 订阅确认: {}", topic_for(table));

        let writer = Arc::new(Mutex::new(write));
        let (tx, rx) = mpsc::unbounded_channel();

        // 心跳
        let heartbeat = {
            let writer = writer.clone();
            let period = self.heartbeat;
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.tick().await;
                let mut reference = 1u64;
                loop {
                    ticker.tick().await;
                    reference += 1;
                    let frame = heartbeat_frame(reference).to_string();
                    let mut w = writer.lock().await;
                    if w.send(WsMessage::Text(frame)).await.is_err() {
                        break;
                    }
                }
            })
        };

        // 读取任务：转发 INSERT 行，连接断开时关闭接收端
        let table = table.to_string();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(frame)) => {
                        warn!("[Realtime] 🔌 服务器关闭连接: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("[Realtime] ❌ 连接错误: {}", e);
                        break;
                    }
                };
                match parse_frame(&text) {
                    Ok(Frame::Insert(row)) => {
                        if tx.send(row).is_err() {
                            debug!("[Realtime] 接收端已关闭，结束 {} 订阅", table);
                            break;
                        }
                    }
                    Ok(Frame::ChannelDown(reason)) => {
                        warn!("[Realtime] 🔌 频道已关闭: {}", reason);
                        break;
                    }
                    Ok(Frame::Reply { ok: false, detail, .. }) => {
                        warn!("[Realtime] 服务器返回错误: {}", detail);
                    }
                    Ok(_) => {}
                    Err(e) => debug!("[Realtime] 忽略无法解析的帧: {}", e),
                }
            }
            heartbeat.abort();
            let _ = writer.lock().await.close().await;
            warn!("[Realtime] 🔌 {} 订阅已断开", table);
        });

        Ok(rx)
    }
}
