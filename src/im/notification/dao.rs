//! 血液请求数据访问层（DAO）
//!
//! 新请求写入后广播到 `blood_requests` 变更订阅，供提醒分发使用。

use crate::im::error::{ImError, Result};
use crate::im::notification::models::{BloodRequest, NewBloodRequest, RequestStatus, Urgency};
use crate::im::profile::models::Role;
use crate::im::realtime::transport::{LocalChangeFeed, BLOOD_REQUESTS_TABLE};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SqliteBloodRequestRepository {
    pool: Pool<Sqlite>,
    feed: Option<Arc<LocalChangeFeed>>,
}

impl SqliteBloodRequestRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool, feed: None }
    }

    pub fn with_change_feed(pool: Pool<Sqlite>, feed: Arc<LocalChangeFeed>) -> Self {
        Self {
            pool,
            feed: Some(feed),
        }
    }

    fn row_to_request(row: SqliteRow) -> Result<BloodRequest> {
        let blood_type: String = row.try_get("blood_type")?;
        let urgency: String = row.try_get("urgency")?;
        let status: String = row.try_get("status")?;
        Ok(BloodRequest {
            id: row.try_get("id")?,
            requester_id: row.try_get("user_id")?,
            blood_type: blood_type.parse()?,
            location: row.try_get("location")?,
            message: row.try_get("message")?,
            urgency: Urgency::parse(&urgency)
                .ok_or_else(|| ImError::InvalidState(format!("未知紧急程度: {}", urgency)))?,
            is_emergency: row.try_get::<i64, _>("is_emergency")? != 0,
            status: RequestStatus::parse(&status)
                .ok_or_else(|| ImError::InvalidState(format!("未知请求状态: {}", status)))?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// 发起人必须是已建档的受血者
    async fn ensure_recipient(&self, requester_id: &str) -> Result<()> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM profiles WHERE id = ? LIMIT 1")
            .bind(requester_id)
            .fetch_optional(&self.pool)
            .await?;
        match role.as_deref().and_then(Role::parse) {
            Some(Role::Recipient) => Ok(()),
            other => {
                warn!("[RequestDAO] {} 无权发布请求 (角色: {:?})", requester_id, other);
                Err(ImError::NotAuthenticated)
            }
        }
    }

    /// 发布新请求
    pub async fn create(&self, requester_id: &str, form: NewBloodRequest) -> Result<BloodRequest> {
        let request = form.into_request(requester_id, Utc::now().timestamp_millis())?;
        self.ensure_recipient(requester_id).await?;
        sqlx::query(
            r#"
            INSERT INTO blood_requests (
                id, user_id, blood_type, location, message,
                urgency, is_emergency, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.requester_id)
        .bind(request.blood_type.as_str())
        .bind(&request.location)
        .bind(&request.message)
        .bind(request.urgency.as_str())
        .bind(request.is_emergency)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;

        info!(
            "[RequestDAO] 🩸 新请求 {} ({}{})",
            request.id,
            request.blood_type,
            if request.is_emergency { ", 紧急" } else { "" }
        );
        if let Some(feed) = &self.feed {
            feed.publish(BLOOD_REQUESTS_TABLE, serde_json::to_value(&request)?);
        }
        Ok(request)
    }

    pub async fn get(&self, id: &str) -> Result<Option<BloodRequest>> {
        let row = sqlx::query("SELECT * FROM blood_requests WHERE id = ? LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_request).transpose()
    }

    /// 修改请求状态，只有发起人可以操作
    pub async fn update_status(
        &self,
        actor: &str,
        id: &str,
        status: RequestStatus,
    ) -> Result<BloodRequest> {
        let mut request = self
            .get(id)
            .await?
            .ok_or_else(|| ImError::validation(format!("请求不存在: {}", id)))?;
        request.transition(actor, status)?;

        // 条件更新，避免覆盖并发修改
        let res = sqlx::query("UPDATE blood_requests SET status = ? WHERE id = ? AND status = 'active'")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(ImError::InvalidState(format!("请求 {} 已不是 active", id)));
        }
        debug!("[RequestDAO] 请求 {} -> {}", id, status.as_str());
        Ok(request)
    }

    /// 进行中的请求，最新的在前
    pub async fn list_active(&self) -> Result<Vec<BloodRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM blood_requests WHERE status = 'active' ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_request).collect()
    }
}
