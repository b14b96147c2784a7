//! 消息 HTTP API 客户端（托管后端的 REST 接口）

use crate::im::error::{ImError, Result};
use crate::im::message::dao::{first_row, MessageRepository};
use crate::im::message::models::Message;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

/// 基于 REST 的消息存储
pub struct RestMessageRepository {
    client: reqwest::Client,
    base_url: String,
}

impl RestMessageRepository {
    /// `access_token` 为空时以匿名身份访问
    pub fn new(base_url: &str, anon_key: &str, access_token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(anon_key).map_err(|e| ImError::validation(format!("无效的 key: {}", e)))?,
        );
        let bearer = format!("Bearer {}", access_token.unwrap_or(anon_key));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| ImError::validation(format!("无效的 token: {}", e)))?,
        );

        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: format!("{}/rest/v1/messages", base_url.trim_end_matches('/')),
        })
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, op: &str) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!("[MsgAPI] {}请求失败，HTTP状态: {}, 响应: {}", op, status, body);
            return Err(ImError::transport(format!("HTTP 错误 {}: {}", status, body)));
        }
        debug!("[MsgAPI] {}请求成功，HTTP状态: {}", op, status);
        Ok(serde_json::from_str(&body)?)
    }

    async fn select(&self, filter: String, order: &str, op: &str) -> Result<Vec<Message>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("select", "*"), ("or", filter.as_str()), ("order", order)])
            .send()
            .await?;
        Self::read_json(response, op).await
    }
}

#[async_trait]
impl MessageRepository for RestMessageRepository {
    async fn insert(&self, sender_id: &str, receiver_id: &str, body: &str) -> Result<Message> {
        info!("[MsgAPI] 📡 发送消息 {} -> {}", sender_id, receiver_id);
        let response = self
            .client
            .post(&self.base_url)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "sender_id": sender_id,
                "receiver_id": receiver_id,
                "message": body,
            }))
            .send()
            .await?;
        let rows: Vec<Message> = Self::read_json(response, "发送消息").await?;
        first_row(rows, "发送消息")
    }

    async fn list_between(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        let filter = format!(
            "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))"
        );
        let mut rows = self.select(filter, "created_at.asc", "拉取聊天记录").await?;
        rows.sort_by_key(Message::order_key);
        Ok(rows)
    }

    async fn list_involving(&self, user: &str) -> Result<Vec<Message>> {
        let filter = format!("(sender_id.eq.{user},receiver_id.eq.{user})");
        let mut rows = self.select(filter, "created_at.desc", "拉取会话消息").await?;
        rows.sort_by_key(|m| std::cmp::Reverse(m.order_key()));
        Ok(rows)
    }
}
