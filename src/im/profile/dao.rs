//! 用户资料数据访问层（DAO）

use crate::im::error::{ImError, Result};
use crate::im::notification::matcher::DonorCandidate;
use crate::im::notification::models::NotificationSettings;
use crate::im::profile::models::{Profile, Role};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// 找不到资料时的显示名
pub const UNKNOWN_USER: &str = "Unknown User";

/// 资料查询
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// 批量查询显示名；查不到的 ID 不出现在结果中
    async fn display_names(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    /// 全部献血者及其通知偏好
    async fn donor_candidates(&self) -> Result<Vec<DonorCandidate>>;
}

pub struct SqliteProfileDirectory {
    pool: Pool<Sqlite>,
}

impl SqliteProfileDirectory {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(",")
    }

    /// 创建或更新资料；只能修改自己的资料
    pub async fn upsert(
        &self,
        actor: &str,
        profile: &Profile,
        settings: &NotificationSettings,
    ) -> Result<()> {
        if actor != profile.id {
            return Err(ImError::NotAuthenticated);
        }
        profile.validate()?;

        sqlx::query(
            r#"
            INSERT INTO profiles (
                id, full_name, phone, role, blood_type, city,
                is_verified, is_available, notification_settings
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                phone = excluded.phone,
                role = excluded.role,
                blood_type = excluded.blood_type,
                city = excluded.city,
                is_verified = excluded.is_verified,
                is_available = excluded.is_available,
                notification_settings = excluded.notification_settings
            "#,
        )
        .bind(&profile.id)
        .bind(profile.full_name.trim())
        .bind(profile.phone.trim())
        .bind(profile.role.as_str())
        .bind(profile.blood_type.map(|t| t.as_str()))
        .bind(profile.city.trim())
        .bind(profile.is_verified)
        .bind(profile.is_available)
        .bind(serde_json::to_string(settings)?)
        .execute(&self.pool)
        .await?;

        info!("[ProfileDAO] 💾 保存资料: {}", profile.id);
        Ok(())
    }

    /// 只更新通知偏好
    pub async fn update_notification_settings(
        &self,
        actor: &str,
        settings: &NotificationSettings,
    ) -> Result<()> {
        let res = sqlx::query("UPDATE profiles SET notification_settings = ? WHERE id = ?")
            .bind(serde_json::to_string(settings)?)
            .bind(actor)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(ImError::validation(format!("资料不存在: {}", actor)));
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DonorCandidate>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = ? LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_candidate).transpose()
    }

    fn row_to_candidate(row: SqliteRow) -> Result<DonorCandidate> {
        let id: String = row.try_get("id")?;
        let role_raw: String = row.try_get("role")?;
        let role = Role::parse(&role_raw).unwrap_or_else(|| {
            warn!("[ProfileDAO] {} 的角色无效: {:?}", id, role_raw);
            Role::Recipient
        });
        let blood_type = row
            .try_get::<Option<String>, _>("blood_type")?
            .and_then(|raw| match raw.parse() {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("[ProfileDAO] {} 的血型无效: {}", id, e);
                    None
                }
            });
        let settings_raw: String = row.try_get("notification_settings")?;
        let settings_json = serde_json::from_str::<Value>(&settings_raw).unwrap_or(Value::Null);

        Ok(DonorCandidate {
            profile: Profile {
                full_name: row.try_get("full_name")?,
                phone: row.try_get("phone")?,
                role,
                blood_type,
                city: row.try_get("city")?,
                is_verified: row.try_get::<i64, _>("is_verified")? != 0,
                is_available: row.try_get::<i64, _>("is_available")? != 0,
                id,
            },
            settings: NotificationSettings::from_json_lenient(&settings_json),
        })
    }
}

#[async_trait]
impl ProfileDirectory for SqliteProfileDirectory {
    async fn display_names(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT id, full_name FROM profiles WHERE id IN ({})",
            Self::placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut names = HashMap::with_capacity(rows.len());
        for row in rows {
            names.insert(row.try_get("id")?, row.try_get("full_name")?);
        }
        debug!("[ProfileDAO] 查询显示名 {} 个，命中 {} 个", ids.len(), names.len());
        Ok(names)
    }

    async fn donor_candidates(&self) -> Result<Vec<DonorCandidate>> {
        let rows = sqlx::query("SELECT * FROM profiles WHERE role = 'donor'")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_candidate).collect()
    }
}
