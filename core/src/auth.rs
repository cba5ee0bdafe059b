/// Actor identity: role, persisted credentials and the auth material they yield
use crate::error::{InboxError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which panel the session acts as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Seller,
}

impl Role {
    /// Login surface to send the user to when the API rejects the session
    pub fn login_path(&self) -> &'static str {
        match self {
            Role::Admin => "/admin/login",
            Role::Seller => "/seller/login",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Seller => write!(f, "seller"),
        }
    }
}

impl FromStr for Role {
    type Err = InboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "seller" => Ok(Role::Seller),
            other => Err(InboxError::Config(format!(
                "Role must be 'admin' or 'seller', got '{}'",
                other
            ))),
        }
    }
}

/// Locally persisted credentials, keyed the same way the panels store them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "admin_token_v1", default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    #[serde(rename = "social_ai_admin_key_v1", default, skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,
    #[serde(rename = "seller_token_v1", default, skip_serializing_if = "Option::is_none")]
    pub seller_token: Option<String>,
}

impl Credentials {
    fn non_empty(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// JSON file backing [`Credentials`]
pub struct CredentialStore;

impl CredentialStore {
    /// Load credentials; a missing file yields empty credentials
    pub fn load(path: &Path) -> Result<Credentials> {
        if !path.exists() {
            return Ok(Credentials::default());
        }
        let raw = std::fs::read(path)?;
        let creds = serde_json::from_slice(&raw)?;
        Ok(creds)
    }

    pub fn save(path: &Path, creds: &Credentials) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_vec_pretty(creds)?)?;
        Ok(())
    }

    /// Drop the credentials of one role (logout)
    pub fn clear_role(path: &Path, role: Role) -> Result<Credentials> {
        let mut creds = Self::load(path)?;
        match role {
            Role::Admin => {
                creds.admin_token = None;
                creds.admin_key = None;
            }
            Role::Seller => creds.seller_token = None,
        }
        Self::save(path, &creds)?;
        Ok(creds)
    }
}

/// Header used to authenticate REST calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHeader {
    Bearer(String),
    AdminKey(String),
}

impl AuthHeader {
    pub fn name(&self) -> &'static str {
        match self {
            AuthHeader::Bearer(_) => "Authorization",
            AuthHeader::AdminKey(_) => "x-admin-key",
        }
    }

    pub fn value(&self) -> String {
        match self {
            AuthHeader::Bearer(token) => format!("Bearer {}", token),
            AuthHeader::AdminKey(key) => key.clone(),
        }
    }
}

/// Auth payload sent when the push channel connects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Who is acting: the role plus, for sellers, their own id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    pub seller_id: Option<String>,
}

impl Actor {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            seller_id: None,
        }
    }

    pub fn seller(id: impl Into<String>) -> Self {
        Self {
            role: Role::Seller,
            seller_id: Some(id.into()),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Resolved identity for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub actor: Actor,
    pub header: AuthHeader,
    pub socket: SocketAuth,
}

impl AuthContext {
    /// Resolve the identity for `role` from stored credentials.
    ///
    /// Admin prefers the admin JWT and falls back to the admin API key. Seller
    /// only ever uses the seller token, even if admin credentials exist.
    pub fn resolve(role: Role, creds: &Credentials) -> Result<Self> {
        let unauthorized = || InboxError::Unauthorized {
            status: 401,
            login_path: role.login_path().to_string(),
        };

        match role {
            Role::Admin => {
                if let Some(token) = Credentials::non_empty(&creds.admin_token) {
                    return Ok(Self {
                        actor: Actor::admin(),
                        header: AuthHeader::Bearer(token.to_string()),
                        socket: SocketAuth {
                            token: Some(token.to_string()),
                            admin_key: None,
                            role: Some(Role::Admin),
                        },
                    });
                }
                let key = Credentials::non_empty(&creds.admin_key).ok_or_else(unauthorized)?;
                Ok(Self {
                    actor: Actor::admin(),
                    header: AuthHeader::AdminKey(key.to_string()),
                    socket: SocketAuth {
                        token: None,
                        admin_key: Some(key.to_string()),
                        role: None,
                    },
                })
            }
            Role::Seller => {
                let token = Credentials::non_empty(&creds.seller_token).ok_or_else(unauthorized)?;
                let seller_id = seller_id_from_token(token);
                if seller_id.is_none() {
                    tracing::warn!("Seller token carries no seller id; assigned threads will be hidden");
                }
                Ok(Self {
                    actor: Actor {
                        role: Role::Seller,
                        seller_id,
                    },
                    header: AuthHeader::Bearer(token.to_string()),
                    socket: SocketAuth {
                        token: Some(token.to_string()),
                        admin_key: None,
                        role: None,
                    },
                })
            }
        }
    }
}

/// Read the payload segment of a JWT without verifying it
pub fn decode_jwt_payload(token: &str) -> Option<serde_json::Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload = parts[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Seller id carried in a seller JWT (`sellerId`, falling back to `id`)
pub fn seller_id_from_token(token: &str) -> Option<String> {
    let payload = decode_jwt_payload(token)?;
    ["sellerId", "id"].iter().find_map(|key| match payload.get(*key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
