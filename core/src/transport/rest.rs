/// REST client for the inbox API
use super::{InboxApi, MediaFile, MessagePage, MetaPatch, ReplyRequest, UnreadState};
use crate::auth::{AuthContext, AuthHeader, Role};
use crate::config::Config;
use crate::error::{InboxError, Result};
use crate::messenger_types::{
    decode_list, reported_instant, ConversationSummary, Message, MetaUpdate, Seller,
    WireConversation, WireMessage, WireSeller,
};
use async_trait::async_trait;
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use tracing::{debug, warn};

/// Conversation endpoints live under this prefix of the API base
const BOT_PREFIX: &str = "/social-ai-bot";

pub struct RestClient {
    client: Client,
    base: String,
    header: AuthHeader,
    role: Role,
}

impl RestClient {
    pub fn new(config: &Config, auth: &AuthContext) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base: config.api_base.trim_end_matches('/').to_string(),
            header: auth.header.clone(),
            role: auth.actor.role,
        })
    }

    fn bot_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base, BOT_PREFIX, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(self.header.name(), self.header.value())
    }

    /// Send and turn non-2xx into an error carrying the server's message
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("Request failed with {}: {}", status, body);
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(InboxError::Unauthorized {
                status: status.as_u16(),
                login_path: self.role.login_path().to_string(),
            });
        }
        Err(InboxError::Status {
            status: status.as_u16(),
            body: error_text(&body),
        })
    }

    /// Parse a JSON body; an empty or malformed body reads as `null`
    async fn json_body(response: Response) -> serde_json::Value {
        match response.text().await {
            Ok(text) if !text.trim().is_empty() => {
                serde_json::from_str(&text).unwrap_or_else(|e| {
                    warn!("Ignoring malformed response body: {}", e);
                    serde_json::Value::Null
                })
            }
            _ => serde_json::Value::Null,
        }
    }
}

/// `{"message": "..."}` bodies surface the message; anything else verbatim
fn error_text(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Decode a `GET /messages/:id` body into a page for `conversation_id`
pub fn decode_message_page(conversation_id: &str, body: &serde_json::Value) -> MessagePage {
    let messages = decode_list::<WireMessage>(body)
        .into_iter()
        .map(|wire| Message::from_wire_in(wire, conversation_id.to_string()))
        .collect();
    MessagePage {
        messages,
        read_at: reported_instant(body, "readAt"),
        customer_read_at: reported_instant(body, "customerReadAt"),
    }
}

/// Decode a `POST .../mark-unread` body
pub fn decode_unread_state(body: &serde_json::Value) -> UnreadState {
    let unread_count = body
        .get("unreadCount")
        .and_then(|v| v.as_f64())
        .map(|n| n.max(0.0) as u32)
        .unwrap_or(0);
    let is_unread = match body.get("isUnread") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => false,
    };
    UnreadState {
        unread_count,
        is_unread,
        read_at: reported_instant(body, "readAt"),
    }
}

#[async_trait]
impl InboxApi for RestClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let url = self.bot_url("/conversations");
        let response = self.send(self.request(Method::GET, &url)).await?;
        let body = Self::json_body(response).await;
        Ok(decode_list::<WireConversation>(&body)
            .into_iter()
            .filter_map(ConversationSummary::from_wire)
            .collect())
    }

    async fn fetch_messages(&self, conversation_id: &str, mark_read: bool) -> Result<MessagePage> {
        let mut url = self.bot_url(&format!("/messages/{}", urlencoding::encode(conversation_id)));
        if mark_read {
            url.push_str("?markRead=1");
        }
        let response = self.send(self.request(Method::GET, &url)).await?;
        let body = Self::json_body(response).await;
        Ok(decode_message_page(conversation_id, &body))
    }

    async fn update_meta(&self, conversation_id: &str, patch: &MetaPatch) -> Result<MetaUpdate> {
        let url = self.bot_url(&format!(
            "/conversations/{}/meta",
            urlencoding::encode(conversation_id)
        ));
        let response = self
            .send(self.request(Method::PATCH, &url).json(&patch.to_body()))
            .await?;
        let body = Self::json_body(response).await;
        let mut meta: MetaUpdate = serde_json::from_value(body)
            .map_err(|e| InboxError::Protocol(format!("Bad meta response: {}", e)))?;
        meta.conversation_id = Some(conversation_id.to_string());
        Ok(meta)
    }

    async fn mark_unread(&self, conversation_id: &str) -> Result<UnreadState> {
        let url = self.bot_url(&format!(
            "/conversations/{}/mark-unread",
            urlencoding::encode(conversation_id)
        ));
        let response = self.send(self.request(Method::POST, &url)).await?;
        let body = Self::json_body(response).await;
        Ok(decode_unread_state(&body))
    }

    async fn send_reply(&self, request: &ReplyRequest) -> Result<()> {
        let url = self.bot_url("/manual-reply");
        self.send(self.request(Method::POST, &url).json(request)).await?;
        Ok(())
    }

    async fn send_media(&self, conversation_id: &str, files: &[MediaFile]) -> Result<()> {
        if files.is_empty() {
            return Err(InboxError::InvalidInput("No files to send".to_string()));
        }
        let mut form = multipart::Form::new().text("conversationId", conversation_id.to_string());
        for file in files {
            let part = multipart::Part::bytes(file.data.to_vec())
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)?;
            form = form.part("files", part);
        }
        let url = self.bot_url("/manual-media-reply");
        self.send(self.request(Method::POST, &url).multipart(form)).await?;
        Ok(())
    }

    async fn forward_message(&self, target_conversation_id: &str, message: &str) -> Result<()> {
        let url = self.bot_url("/forward-message");
        let body = serde_json::json!({
            "targetConversationId": target_conversation_id,
            "message": message,
        });
        self.send(self.request(Method::POST, &url).json(&body)).await?;
        Ok(())
    }

    async fn list_sellers(&self) -> Result<Vec<Seller>> {
        let url = format!("{}/sellers", self.base);
        let response = self.send(self.request(Method::GET, &url)).await?;
        let body = Self::json_body(response).await;
        Ok(decode_list::<WireSeller>(&body)
            .into_iter()
            .filter_map(Seller::from_wire)
            .collect())
    }
}
