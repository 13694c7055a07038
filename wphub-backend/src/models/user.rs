use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
    Moderator,
}

impl Default for UserRole {
    fn default() -> Self {
        UserRole::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

/// Platform account. Secrets never leave the server.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub stripe_customer_id: Option<String>,
    pub subscription_updated_at: Option<DateTime<Utc>>,
    pub subscription_paused_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub two_fa_enabled: bool,
    #[serde(skip_serializing)]
    pub two_fa_code: Option<String>,
    #[serde(skip_serializing)]
    pub two_fa_code_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub two_fa_verified_session: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Name shown in messages; falls back to the email address
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Admin-side user edit; absent fields are left untouched
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub user_id: String,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TwoFactorSettingsRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub code: String,
}
