/// Shared types for the inbox: wire shapes, domain records, push and UI events
use crate::auth::Role;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Enums ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Order fulfilment state a seller tracks per conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Confirmed,
    Hold,
    Delivered,
    Cancel,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Confirmed => "confirmed",
            DeliveryStatus::Hold => "hold",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancel => "cancel",
        }
    }

    /// Unknown or missing values degrade to `Confirmed`
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Ok(DeliveryStatus::Confirmed),
            "hold" => Ok(DeliveryStatus::Hold),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "cancel" => Ok(DeliveryStatus::Cancel),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Admin,
    Seller,
    Ai,
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Customer,
    /// Outbound message; the role is absent on legacy rows
    Agent(Option<AgentRole>),
}

impl Origin {
    pub fn is_customer(&self) -> bool {
        matches!(self, Origin::Customer)
    }

    /// Flat `sender` / `senderRole` pair used on the wire
    fn to_wire(self) -> (&'static str, Option<&'static str>) {
        match self {
            Origin::Customer => ("customer", Some("customer")),
            Origin::Agent(None) => ("bot", None),
            Origin::Agent(Some(AgentRole::Admin)) => ("bot", Some("admin")),
            Origin::Agent(Some(AgentRole::Seller)) => ("bot", Some("seller")),
            Origin::Agent(Some(AgentRole::Ai)) => ("bot", Some("ai")),
        }
    }

    fn from_wire(sender: Option<&str>, role: Option<&str>) -> Self {
        let role = role.map(|r| r.trim().to_ascii_lowercase());
        let sender = sender.map(|s| s.trim().to_ascii_lowercase());
        if sender.as_deref() == Some("customer") || role.as_deref() == Some("customer") {
            return Origin::Customer;
        }
        let agent = match role.as_deref() {
            Some("admin") => Some(AgentRole::Admin),
            Some("seller") => Some(AgentRole::Seller),
            Some("ai") => Some(AgentRole::Ai),
            _ => None,
        };
        Origin::Agent(agent)
    }
}

// ─── Lenient decoding helpers ────────────────────────────────────────────────

/// Parse an instant from an RFC3339 string or epoch milliseconds
pub fn parse_instant(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn de_opt_instant<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_instant))
}

/// Strings or numbers become strings; empty strings and null become `None`
fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn de_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|f| f.max(0.0) as u32).unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    })
}

/// Decode a list that may arrive bare (`[...]`) or wrapped (`{"data": [...]}`).
///
/// Rows that fail to decode are skipped; any other shape yields an empty list.
pub fn decode_list<T: DeserializeOwned>(value: &serde_json::Value) -> Vec<T> {
    let rows = match value {
        serde_json::Value::Array(rows) => rows,
        serde_json::Value::Object(map) => match map.get("data") {
            Some(serde_json::Value::Array(rows)) => rows,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    rows.iter()
        .filter_map(|row| serde_json::from_value(row.clone()).ok())
        .collect()
}

/// Read an optional watermark field from a wrapped response.
///
/// `None` means the field was absent (leave local state alone);
/// `Some(None)` means the server explicitly reported no marker.
pub fn reported_instant(value: &serde_json::Value, key: &str) -> Option<Option<DateTime<Utc>>> {
    let map = value.as_object()?;
    map.get(key).map(parse_instant)
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Message as the REST API and push channel carry it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, alias = "_id", deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub customer_profile_pic: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub sender: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Confirmation state of a message this client sent but the server has not echoed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendState {
    Sending,
    Sent,
}

/// Client-only bookkeeping attached to an optimistic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSend {
    pub local_id: String,
    pub state: SendState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<String>,
    pub conversation_id: String,
    pub origin: Origin,
    pub sender_name: Option<String>,
    pub customer_name: Option<String>,
    pub customer_profile_pic: Option<String>,
    pub text: String,
    pub platform: Platform,
    pub page_id: String,
    /// Sole ordering key within a conversation
    pub timestamp: DateTime<Utc>,
    pub reply_to_message_id: Option<String>,
    /// Idempotency key the server echoes back for sends made by this client
    pub client_message_id: Option<String>,
    /// Set only while the message is an unconfirmed optimistic send
    pub local: Option<LocalSend>,
}

impl Message {
    /// Convert a wire row; rows without a conversation id are rejected
    pub fn from_wire(wire: WireMessage) -> Option<Self> {
        let conversation_id = wire.conversation_id.clone()?;
        Some(Self::from_wire_in(wire, conversation_id))
    }

    /// Convert a wire row belonging to a known conversation
    pub fn from_wire_in(wire: WireMessage, conversation_id: String) -> Self {
        let timestamp = wire
            .timestamp
            .as_ref()
            .and_then(parse_instant)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            id: wire.id,
            conversation_id,
            origin: Origin::from_wire(wire.sender.as_deref(), wire.sender_role.as_deref()),
            sender_name: wire.sender_name,
            customer_name: wire.customer_name,
            customer_profile_pic: wire.customer_profile_pic,
            text: wire.message.unwrap_or_default(),
            platform: wire.platform.unwrap_or_default(),
            page_id: wire.page_id.unwrap_or_default(),
            timestamp,
            reply_to_message_id: wire.reply_to_message_id,
            client_message_id: wire.client_message_id,
            local: None,
        }
    }

    pub fn to_wire(&self) -> WireMessage {
        let (sender, role) = self.origin.to_wire();
        WireMessage {
            id: self.id.clone(),
            conversation_id: Some(self.conversation_id.clone()),
            customer_name: self.customer_name.clone(),
            customer_profile_pic: self.customer_profile_pic.clone(),
            sender: Some(sender.to_string()),
            sender_role: role.map(str::to_string),
            sender_name: self.sender_name.clone(),
            message: Some(self.text.clone()),
            platform: Some(self.platform),
            page_id: Some(self.page_id.clone()),
            timestamp: Some(serde_json::Value::String(self.timestamp.to_rfc3339())),
            reply_to_message_id: self.reply_to_message_id.clone(),
            client_message_id: self.client_message_id.clone(),
        }
    }

    pub fn is_customer(&self) -> bool {
        self.origin.is_customer()
    }

    pub fn is_optimistic(&self) -> bool {
        self.local.is_some()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local.as_ref().map(|l| l.local_id.as_str())
    }

    /// Name shown above the bubble. Unlabelled agent rows fall back to the
    /// viewing panel's own role.
    pub fn sender_label(&self, thread_title: &str, viewer: Role) -> String {
        let explicit = self
            .sender_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match self.origin {
            Origin::Customer => explicit
                .or_else(|| self.customer_name.as_deref().map(str::trim).filter(|s| !s.is_empty()))
                .or(Some(thread_title.trim()).filter(|s| !s.is_empty()))
                .unwrap_or("Customer")
                .to_string(),
            Origin::Agent(role) => match (explicit, role) {
                (Some(name), _) => name.to_string(),
                (None, Some(AgentRole::Admin)) => "Admin".to_string(),
                (None, Some(AgentRole::Seller)) => "Seller".to_string(),
                (None, Some(AgentRole::Ai)) => "AI Bot".to_string(),
                (None, None) if viewer.is_admin() => "Admin".to_string(),
                (None, None) => "Seller".to_string(),
            },
        }
    }
}

// ─── Conversations ───────────────────────────────────────────────────────────

/// Conversation summary row as `GET /conversations` returns it
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConversation {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub customer_profile_pic: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub page_id: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, deserialize_with = "de_opt_instant")]
    pub last_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub assigned_seller_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub delivery_status: Option<String>,
    #[serde(default, deserialize_with = "de_opt_instant")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_count")]
    pub unread_count: u32,
    #[serde(default, deserialize_with = "de_flag")]
    pub is_unread: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub customer_name: String,
    pub customer_profile_pic: String,
    pub platform: Platform,
    pub page_id: String,
    /// Preview of the newest message
    pub last_message: String,
    pub last_time: Option<DateTime<Utc>>,
    pub assigned_seller_id: Option<String>,
    pub delivery_status: DeliveryStatus,
    pub assigned_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    /// Server-provided flag, kept in step with `unread_count`
    pub is_unread: bool,
}

impl ConversationSummary {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            customer_name: String::new(),
            customer_profile_pic: String::new(),
            platform: Platform::Unknown,
            page_id: String::new(),
            last_message: String::new(),
            last_time: None,
            assigned_seller_id: None,
            delivery_status: DeliveryStatus::Confirmed,
            assigned_at: None,
            unread_count: 0,
            is_unread: false,
        }
    }

    pub fn from_wire(wire: WireConversation) -> Option<Self> {
        let conversation_id = wire.conversation_id?;
        Some(Self {
            conversation_id,
            customer_name: wire.customer_name.unwrap_or_default(),
            customer_profile_pic: wire.customer_profile_pic.unwrap_or_default(),
            platform: wire.platform.unwrap_or_default(),
            page_id: wire.page_id.unwrap_or_default(),
            last_message: wire.last_message.unwrap_or_default(),
            last_time: wire.last_time,
            assigned_seller_id: wire.assigned_seller_id,
            delivery_status: DeliveryStatus::parse_lenient(wire.delivery_status.as_deref()),
            assigned_at: wire.assigned_at,
            unread_count: wire.unread_count,
            is_unread: wire.is_unread || wire.unread_count > 0,
        })
    }

    pub fn has_unread(&self) -> bool {
        self.unread_count > 0 || self.is_unread
    }

    pub fn set_unread(&mut self, count: u32, flag: bool) {
        self.unread_count = count;
        self.is_unread = flag || count > 0;
    }

    pub fn clear_unread(&mut self) {
        self.set_unread(0, false);
    }

    /// Display name, falling back to a generic label
    pub fn display_name(&self) -> &str {
        if self.customer_name.trim().is_empty() {
            "Customer"
        } else {
            &self.customer_name
        }
    }

    pub fn apply_meta(&mut self, meta: &MetaUpdate) {
        self.assigned_seller_id = meta.assigned_seller_id.clone();
        self.delivery_status = meta.delivery_status;
        self.assigned_at = meta.assigned_at;
    }
}

/// Assignment / status change, from `PATCH .../meta` or a `conversation_meta` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaUpdate {
    #[serde(default, deserialize_with = "de_opt_string", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub assigned_seller_id: Option<String>,
    #[serde(default, deserialize_with = "de_delivery_status")]
    pub delivery_status: DeliveryStatus,
    #[serde(default, deserialize_with = "de_opt_instant")]
    pub assigned_at: Option<DateTime<Utc>>,
}

fn de_delivery_status<'de, D>(deserializer: D) -> Result<DeliveryStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = de_opt_string(deserializer)?;
    Ok(DeliveryStatus::parse_lenient(value.as_deref()))
}

// ─── Sellers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSeller {
    #[serde(default, rename = "_id", deserialize_with = "de_opt_string")]
    pub mongo_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Seller {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Seller {
    /// Rows without any id are dropped so assignment never targets nobody
    pub fn from_wire(wire: WireSeller) -> Option<Self> {
        let id = wire.mongo_id.or(wire.id)?;
        Some(Self {
            id,
            first_name: wire.first_name,
            last_name: wire.last_name,
            name: wire.name,
            email: wire.email,
        })
    }

    /// firstName + lastName, then name, then email, then "Seller"
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return full;
        }
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Seller")
            .to_string()
    }
}

/// Label for the seller a conversation is assigned to
pub fn assigned_seller_label(sellers: &[Seller], seller_id: Option<&str>) -> String {
    let Some(id) = seller_id else {
        return "Unassigned".to_string();
    };
    sellers
        .iter()
        .find(|s| s.id == id)
        .map(Seller::display_name)
        .unwrap_or_else(|| "Seller".to_string())
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Events delivered over the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    NewMessage(WireMessage),
    ConversationMeta(MetaUpdate),
}

/// Changes the session reports to whatever renders it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxEvent {
    /// The summary list changed
    ConversationsUpdated,
    /// A thread's message list changed
    ThreadUpdated { conversation_id: String },
    /// The active conversation changed (or was cleared)
    SelectionChanged { conversation_id: Option<String> },
    /// An explicit user action failed
    ActionFailed { action: String, message: String },
    /// The API rejected the session; the user must log in again
    LoginRequired { login_path: String },
    PushConnected,
    PushDisconnected { reason: String },
}
