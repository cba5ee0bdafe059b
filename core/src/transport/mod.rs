/// Transport: the REST API contract and the push-event channel
pub mod push;
pub mod rest;

use crate::error::Result;
use crate::messenger_types::{ConversationSummary, DeliveryStatus, Message, MetaUpdate, Seller};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use push::{PushClient, PushHandle, PushUpdate};
pub use rest::RestClient;

/// One conversation's messages plus the watermarks reported alongside them.
///
/// A watermark of `None` means the response did not carry the field;
/// `Some(None)` means it carried an explicit null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub read_at: Option<Option<DateTime<Utc>>>,
    pub customer_read_at: Option<Option<DateTime<Utc>>>,
}

/// Response of `POST /conversations/:id/mark-unread`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadState {
    pub unread_count: u32,
    pub is_unread: bool,
    pub read_at: Option<Option<DateTime<Utc>>>,
}

/// Body of `PATCH /conversations/:id/meta`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaPatch {
    /// Assign to a seller, or unassign with `None`
    Assign(Option<String>),
    Status(DeliveryStatus),
}

impl MetaPatch {
    pub fn to_body(&self) -> serde_json::Value {
        match self {
            MetaPatch::Assign(seller_id) => serde_json::json!({ "sellerId": seller_id }),
            MetaPatch::Status(status) => serde_json::json!({ "deliveryStatus": status.as_str() }),
        }
    }
}

/// Body of `POST /manual-reply`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub conversation_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    /// Idempotency key the server echoes on the stored message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// One attachment of a media reply; the core treats the bytes as opaque
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// The inbox REST API as the sync core consumes it
#[async_trait]
pub trait InboxApi: Send + Sync {
    /// `GET /conversations`
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// `GET /messages/:id`, with `?markRead=1` when `mark_read` is set
    async fn fetch_messages(&self, conversation_id: &str, mark_read: bool) -> Result<MessagePage>;

    /// `PATCH /conversations/:id/meta`
    async fn update_meta(&self, conversation_id: &str, patch: &MetaPatch) -> Result<MetaUpdate>;

    /// `POST /conversations/:id/mark-unread`
    async fn mark_unread(&self, conversation_id: &str) -> Result<UnreadState>;

    /// `POST /manual-reply`
    async fn send_reply(&self, request: &ReplyRequest) -> Result<()>;

    /// `POST /manual-media-reply` (multipart)
    async fn send_media(&self, conversation_id: &str, files: &[MediaFile]) -> Result<()>;

    /// `POST /forward-message`
    async fn forward_message(&self, target_conversation_id: &str, message: &str) -> Result<()>;

    /// `GET /sellers` (admin only)
    async fn list_sellers(&self) -> Result<Vec<Seller>>;
}
