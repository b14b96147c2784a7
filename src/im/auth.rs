//! 身份 / 会话提供方
//!
//! 当前身份只由外部认证流程修改；核心组件每次操作前重新读取，不做长期缓存。

use crate::im::error::{ImError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 身份提供方
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// 当前登录用户 ID，未登录返回 None
    async fn current_user(&self) -> Option<String>;

    /// 会话变更事件流（登录 / 登出）
    fn session_changes(&self) -> watch::Receiver<Option<String>>;
}

/// 读取当前身份，未登录时返回 `NotAuthenticated`
pub async fn require_user(provider: &dyn SessionProvider) -> Result<String> {
    provider
        .current_user()
        .await
        .ok_or(ImError::NotAuthenticated)
}

/// 进程内会话（登录结果由外部写入）
pub struct LocalSession {
    tx: watch::Sender<Option<String>>,
}

impl LocalSession {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(user_id);
        session
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        info!("[Auth] 🔐 登录: {}", user_id);
        self.tx.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        info!("[Auth] 👋 登出");
        self.tx.send_replace(None);
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for LocalSession {
    async fn current_user(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    fn session_changes(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Serialize)]
struct PasswordGrantRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct PasswordGrantResponse {
    access_token: String,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

/// 登录结果
#[derive(Debug, Clone)]
pub struct LoginData {
    pub user_id: String,
    pub access_token: String,
}

/// 邮箱密码登录（托管后端的 password grant）
pub async fn login_async(
    base_url: &str,
    anon_key: &str,
    email: &str,
    password: &str,
) -> Result<LoginData> {
    let url = format!("{}/auth/v1/token?grant_type=password", base_url.trim_end_matches('/'));

    info!("[Auth] 🔐 正在登录...");
    debug!("[Auth]   URL: {}", url);
    debug!("[Auth]   邮箱: {}", email);

    let response = reqwest::Client::new()
        .post(&url)
        .header("apikey", anon_key)
        .header("Content-Type", "application/json")
        .json(&PasswordGrantRequest { email, password })
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;
    if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED {
        warn!("[Auth] ❌ 登录被拒绝: {}", text);
        return Err(ImError::NotAuthenticated);
    }
    if !status.is_success() {
        return Err(ImError::transport(format!("HTTP 错误 {}: {}", status, text)));
    }

    let resp: PasswordGrantResponse = serde_json::from_str(&text)?;
    debug!("[Auth] ✅ 登录成功: {}", resp.user.id);
    Ok(LoginData {
        user_id: resp.user.id,
        access_token: resp.access_token,
    })
}
