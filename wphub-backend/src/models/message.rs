use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageCategory {
    General,
    SiteTransferRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Context attached to a site transfer request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferContext {
    pub site_id: String,
    pub site_name: String,
    pub site_url: String,
    pub requesting_user_id: String,
    pub requesting_user_name: String,
    pub requesting_user_email: String,
    pub current_owner_id: String,
    pub current_owner_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub subject: String,
    pub message: String,
    pub sender_id: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub recipient_id: String,
    pub recipient_email: String,
    pub is_read: bool,
    pub priority: Priority,
    pub status: MessageStatus,
    pub category: MessageCategory,
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Parsed transfer context, for transfer request messages only
    pub fn transfer_context(&self) -> Option<TransferContext> {
        if self.category != MessageCategory::SiteTransferRequest {
            return None;
        }
        self.context
            .as_ref()
            .and_then(|c| serde_json::from_value(c.clone()).ok())
    }
}

/// Insert payload for `messages`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub subject: String,
    pub message: String,
    pub sender_id: Option<String>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub recipient_id: String,
    pub recipient_email: String,
    pub priority: Priority,
    pub category: MessageCategory,
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationType {
    Info,
    Warning,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub recipient_email: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_email: String,
    pub subject: String,
    pub message: String,
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub site_id: Option<String>,
    pub site_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonTransferAction {
    #[default]
    Disconnect,
    Uninstall,
}

#[derive(Debug, Deserialize)]
pub struct HandleTransferRequest {
    pub message_id: String,
    pub action: TransferAction,
    #[serde(default)]
    pub transfer_plugins: Vec<String>,
    #[serde(default)]
    pub non_transfer_action: NonTransferAction,
}
