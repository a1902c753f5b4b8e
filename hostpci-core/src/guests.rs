//! Guest inventory from the Proxmox VE API.
//!
//! Read-only: used to show the operator which guests exist and whether they
//! are running. Nothing here takes part in assignment.

use crate::config::{ApiConfig, Config};
use crate::error::{HostpciError, Result};
use crate::guest_config::GuestId;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Guest run state as reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GuestStatus {
    Running,
    Stopped,
    Paused,
    Unknown(String),
}

impl From<String> for GuestStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "paused" => Self::Paused,
            _ => Self::Unknown(s),
        }
    }
}

impl From<GuestStatus> for String {
    fn from(status: GuestStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for GuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// A guest known to the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    #[serde(rename = "vmid")]
    pub id: GuestId,
    #[serde(default)]
    pub name: String,
    pub status: GuestStatus,
}

/// Source of the guest list.
#[async_trait]
pub trait GuestInventory: Send + Sync {
    /// All guests on the node, ordered by id.
    async fn list_guests(&self) -> Result<Vec<Guest>>;
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct Ticket {
    ticket: String,
}

/// Parse a `GET /nodes/<node>/qemu` response body.
pub fn parse_guest_list(body: &str) -> Result<Vec<Guest>> {
    let response: ApiResponse<Vec<Guest>> = serde_json::from_str(body)
        .map_err(|e| HostpciError::ApiError { message: format!("Invalid guest list: {}", e) })?;
    let mut guests = response.data;
    guests.sort_by_key(|g| g.id);
    Ok(guests)
}

/// How requests are authenticated.
enum Auth {
    Token(String),
    Password { user: String, password: String },
    None,
}

/// Proxmox VE HTTP API client.
pub struct ProxmoxApi {
    client: Client,
    base_url: String,
    node: String,
    auth: Auth,
}

impl ProxmoxApi {
    pub fn new(api: &ApiConfig, password: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!api.verify_tls)
            .build()
            .map_err(|e| HostpciError::InvalidConfig {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        let host = if api.host.is_empty() { "localhost" } else { api.host.as_str() };
        let auth = match (&api.token, password) {
            (Some(token), _) => Auth::Token(token.clone()),
            (None, Some(password)) => Auth::Password { user: api.user.clone(), password },
            (None, None) => Auth::None,
        };

        Ok(Self {
            client,
            base_url: format!("https://{}:{}/api2/json", host, api.port),
            node: api.node.clone(),
            auth,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api, Config::api_password())
    }

    async fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        match &self.auth {
            Auth::Token(token) => {
                headers.insert(AUTHORIZATION, header_value(&format!("PVEAPIToken={}", token))?);
            }
            Auth::Password { user, password } => {
                let ticket = self.ticket(user, password).await?;
                headers.insert(COOKIE, header_value(&format!("PVEAuthCookie={}", ticket))?);
            }
            Auth::None => {
                return Err(HostpciError::InvalidConfig {
                    reason: format!(
                        "No API credentials: set api.token in the config or {}",
                        crate::config::PASSWORD_ENV
                    ),
                });
            }
        }
        Ok(headers)
    }

    async fn ticket(&self, user: &str, password: &str) -> Result<String> {
        let url = format!("{}/access/ticket", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[("username", user), ("password", password)])
            .send()
            .await
            .map_err(api_error)?;

        if !response.status().is_success() {
            return Err(HostpciError::ApiError {
                message: format!("Authentication as {} failed: HTTP {}", user, response.status()),
            });
        }

        let body: ApiResponse<Ticket> = response.json().await.map_err(api_error)?;
        Ok(body.data.ticket)
    }
}

#[async_trait]
impl GuestInventory for ProxmoxApi {
    #[instrument(skip(self), fields(node = %self.node))]
    async fn list_guests(&self) -> Result<Vec<Guest>> {
        let url = format!("{}/nodes/{}/qemu", self.base_url, self.node);
        let headers = self.auth_headers().await?;

        let response = self.client.get(&url).headers(headers).send().await.map_err(api_error)?;
        if !response.status().is_success() {
            return Err(HostpciError::ApiError {
                message: format!("GET {} returned HTTP {}", url, response.status()),
            });
        }

        let body = response.text().await.map_err(api_error)?;
        let guests = parse_guest_list(&body)?;
        debug!(count = guests.len(), "Listed guests");
        Ok(guests)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| HostpciError::InvalidConfig {
        reason: format!("Credential is not a valid header value: {}", e),
    })
}

fn api_error(e: reqwest::Error) -> HostpciError {
    HostpciError::ApiError { message: e.to_string() }
}
