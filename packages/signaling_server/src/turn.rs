//! ICE server configuration from the managed TURN provider.
//!
//! Credentials are minted per request and never cached. Any failure is
//! reported in-band as an empty server list plus [`TurnDebug`] details, so
//! clients can always fall back to their built-in STUN servers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Lifetime requested for minted credentials.
pub const TURN_CREDENTIAL_TTL: Duration = Duration::from_secs(86_400);

pub const DEFAULT_TURN_API_BASE_URL: &str = "https://rtc.live.cloudflare.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of `GET /turn-config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnConfig {
    pub ice_servers: Vec<IceServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<TurnDebug>,
}

impl TurnConfig {
    fn failed(debug: TurnDebug) -> Self {
        Self {
            ice_servers: vec![],
            debug: Some(debug),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Provider fields passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

/// Why no ICE servers were returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnDebug {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_key_id: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_api_token: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
enum TurnError {
    #[error("TURN provider responded with {status}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderResponse {
    ice_servers: ProviderIceServers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderIceServers {
    Many(Vec<IceServer>),
    One(IceServer),
}

impl From<ProviderIceServers> for Vec<IceServer> {
    fn from(value: ProviderIceServers) -> Self {
        match value {
            ProviderIceServers::Many(servers) => servers,
            ProviderIceServers::One(server) => vec![server],
        }
    }
}

/// Account credentials for the TURN provider.
#[derive(Debug, Clone)]
pub struct TurnCredentials {
    client: reqwest::Client,
    key_id: Option<String>,
    api_token: Option<String>,
    base_url: String,
}

impl TurnCredentials {
    /// Empty values count as missing.
    #[must_use]
    pub fn new(key_id: Option<String>, api_token: Option<String>, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            key_id: key_id.filter(|x| !x.is_empty()),
            api_token: api_token.filter(|x| !x.is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn generate_url(&self, key_id: &str) -> String {
        format!(
            "{}/v1/turn/keys/{key_id}/credentials/generate-ice-servers",
            self.base_url
        )
    }

    /// Mint a fresh set of ICE servers.
    ///
    /// Never fails: problems are described in [`TurnConfig::debug`].
    pub async fn fetch(&self) -> TurnConfig {
        let (Some(key_id), Some(api_token)) = (&self.key_id, &self.api_token) else {
            log::warn!("TURN credentials are not configured");
            return TurnConfig::failed(TurnDebug {
                has_key_id: Some(self.key_id.is_some()),
                has_api_token: Some(self.api_token.is_some()),
                message: Some("TURN credentials not configured, using STUN only".to_string()),
                ..TurnDebug::default()
            });
        };

        let url = self.generate_url(key_id);
        let key_prefix = key_id.chars().take(8).collect::<String>();

        log::debug!("Requesting ICE servers for TURN key {key_prefix}...");

        match self.request(&url, api_token).await {
            Ok(ice_servers) => {
                log::debug!("Received {} ICE server(s)", ice_servers.len());
                TurnConfig {
                    ice_servers,
                    debug: None,
                }
            }
            Err(TurnError::Status { status, body }) => {
                log::error!("TURN provider rejected key {key_prefix}...: {status} {body}");
                TurnConfig::failed(TurnDebug {
                    message: Some("Failed to fetch TURN credentials".to_string()),
                    status: Some(status.as_u16()),
                    status_text: Some(
                        status
                            .canonical_reason()
                            .unwrap_or_default()
                            .to_string(),
                    ),
                    error_details: Some(body),
                    attempted_url: Some(url.replace(key_id.as_str(), &format!("{key_prefix}..."))),
                    ..TurnDebug::default()
                })
            }
            Err(TurnError::Reqwest(e)) => {
                log::error!("TURN request failed: {e:?}");
                TurnConfig::failed(TurnDebug {
                    message: Some(
                        "Error occurred while trying to fetch TURN credentials".to_string(),
                    ),
                    error: Some(e.to_string()),
                    ..TurnDebug::default()
                })
            }
        }
    }

    async fn request(&self, url: &str, api_token: &str) -> Result<Vec<IceServer>, TurnError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_token)
            .json(&json!({ "ttl": TURN_CREDENTIAL_TTL.as_secs() }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TurnError::Status {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json::<ProviderResponse>().await?.ice_servers.into())
    }
}
