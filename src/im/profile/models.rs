//! 用户资料模型

use crate::im::error::{ImError, Result};
use crate::im::notification::compatibility::BloodType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Recipient,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Recipient => "recipient",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "donor" => Some(Role::Donor),
            "recipient" => Some(Role::Recipient),
            _ => None,
        }
    }
}

/// 用户资料（只能由本人修改）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    pub role: Role,
    #[serde(default)]
    pub blood_type: Option<BloodType>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default = "default_available")]
    pub is_available: bool,
}

/// 与表结构默认值一致：新资料默认可献血
fn default_available() -> bool {
    true
}

impl Profile {
    /// 姓名、电话、城市为必填项
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ImError::validation("缺少用户 ID"));
        }
        if self.full_name.trim().is_empty()
            || self.phone.trim().is_empty()
            || self.city.trim().is_empty()
        {
            return Err(ImError::validation("姓名、电话和城市为必填项"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn donor(id: &str, blood_type: Option<BloodType>, city: &str) -> Profile {
    Profile {
        id: id.to_string(),
        full_name: format!("Donor {}", id),
        phone: "555-0000".to_string(),
        role: Role::Donor,
        blood_type,
        city: city.to_string(),
        is_verified: false,
        is_available: true,
    }
}
