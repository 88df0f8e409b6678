//! HTTP client for the A10 AXAPI v3 BGP neighbor endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::types::{
    AuthRequest, AuthResponse, CreateNeighborRequest, Credentials, Ipv4Neighbor, Ipv4NeighborList,
};
use super::NeighborRegistry;
use crate::error::{Error, Result};

/// Attempts per device call before giving up
pub const MAX_REQUEST_ATTEMPTS: u32 = 3;

/// Default bound on a single device request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const AUTH_ENDPOINT: &str = "/axapi/v3/auth";

/// Bounded retry applied to every device call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each one after
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1).min(5)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_REQUEST_ATTEMPTS, Duration::from_millis(500))
    }
}

/// Connection settings for the device
#[derive(Clone)]
pub struct DeviceConfig {
    /// Base URL, e.g. `https://a10.example.net`
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// AS of the BGP router instance on the device
    pub local_as: u32,
    /// Remote AS assigned to, and used to filter, managed neighbors
    pub remote_as: u32,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("local_as", &self.local_as)
            .field("remote_as", &self.remote_as)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Client for the device's BGP neighbor configuration
///
/// Holds the session signature and the mirrored neighbor set. The mirror is
/// locked for the whole of an add or remove, so the membership check, the
/// device call and the mirror update are atomic with respect to other callers.
/// Lock order is `neighbors` then `signature`.
pub struct A10Client {
    http_client: Client,
    config: DeviceConfig,
    signature: RwLock<Option<String>>,
    neighbors: Mutex<Vec<String>>,
}

impl A10Client {
    /// Build a client for the configured device
    ///
    /// Certificate verification is disabled: these appliances ship with
    /// self-signed management certificates and the operator is trusted to point
    /// `base_url` at the right host. The credentials still travel over TLS.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.request_timeout)
            .user_agent(concat!("bgp-neighbor-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            http_client,
            config,
            signature: RwLock::new(None),
            neighbors: Mutex::new(Vec::new()),
        })
    }

    /// Log in and store the returned signature; the latest success wins
    #[instrument(skip(self), fields(device = %self.config.base_url))]
    pub async fn authenticate(&self) -> Result<String> {
        debug!("Logging in to device");

        let url = self.url(AUTH_ENDPOINT);
        let body = serde_json::to_value(AuthRequest {
            credentials: Credentials {
                username: &self.config.username,
                password: &self.config.password,
            },
        })?;

        let bytes = self
            .send(Method::POST, &url, Some(&body), None)
            .await
            .map_err(|e| Error::AuthError(e.to_string()))?;
        let response: AuthResponse = serde_json::from_slice(&bytes)
            .map_err(|e| Error::AuthError(format!("unparseable auth response: {e}")))?;

        let signature = response.auth_response.signature;
        *self.signature.write().await = Some(signature.clone());
        debug!("Logged in to device");
        Ok(signature)
    }

    /// Replace the mirror with the device's neighbors whose remote AS matches
    ///
    /// Intended to run once, at startup, before any reconciliation.
    #[instrument(skip(self), fields(local_as = self.config.local_as, remote_as = self.config.remote_as))]
    pub async fn fetch_neighbors(&self) -> Result<Vec<String>> {
        info!("Fetching neighbors from device");

        let mut neighbors = self.neighbors.lock().await;
        self.authenticate().await?;

        let bytes = self
            .send_authenticated(Method::GET, &self.neighbors_url(), None)
            .await?;
        let list: Ipv4NeighborList = serde_json::from_slice(&bytes)?;
        debug!(total = list.neighbors.len(), "Device returned neighbors");

        *neighbors = filter_by_remote_as(list.neighbors, self.config.remote_as);
        info!(neighbors = ?neighbors.as_slice(), "Mirrored neighbors with matching remote AS");
        Ok(neighbors.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn neighbors_url(&self) -> String {
        self.url(&format!(
            "/axapi/v3/router/bgp/{}/neighbor/ipv4-neighbor",
            self.config.local_as
        ))
    }

    async fn session(&self) -> Result<String> {
        if let Some(signature) = self.signature.read().await.clone() {
            return Ok(signature);
        }
        self.authenticate().await
    }

    /// Issue a privileged call, logging in again once if the session was rejected
    async fn send_authenticated(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Vec<u8>> {
        let signature = self.session().await?;
        match self.send(method.clone(), url, body, Some(&signature)).await {
            Err(e) if e.is_unauthorized() => {
                info!("Device rejected session, logging in again");
                *self.signature.write().await = None;
                let signature = self.authenticate().await?;
                self.send(method, url, body, Some(&signature)).await
            }
            other => other,
        }
    }

    /// Send a request under the retry policy, returning the body of a 2xx response
    ///
    /// A 401/403 on a signed request is returned at once as `Unauthorized`.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        signature: Option<&str>,
    ) -> Result<Vec<u8>> {
        let max_attempts = self.config.retry.max_attempts;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let mut request = self
                .http_client
                .request(method.clone(), url)
                .header(ACCEPT, "application/json")
                .header(CONTENT_TYPE, "application/json");
            if let Some(signature) = signature {
                request = request.header(AUTHORIZATION, format!("A10 {signature}"));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.bytes().await?.to_vec());
                }
                Ok(response)
                    if signature.is_some()
                        && matches!(
                            response.status(),
                            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                        ) =>
                {
                    return Err(Error::Unauthorized {
                        url: url.to_string(),
                    });
                }
                Ok(response) => {
                    warn!(
                        %method,
                        url,
                        status = %response.status(),
                        attempt,
                        max_attempts,
                        "Device request failed"
                    );
                    last_error = Some(Error::StatusError {
                        status: response.status().as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    warn!(%method, url, error = %e, attempt, max_attempts, "Device request failed");
                    last_error = Some(Error::HttpError(e));
                }
            }

            if attempt < max_attempts {
                let delay = self.config.retry.delay_after(attempt);
                if !delay.is_zero() {
                    debug!("Retrying after {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: max_attempts,
            source: Box::new(last_error.unwrap_or_else(|| {
                Error::ConfigError("retry policy allows no attempts".to_string())
            })),
        })
    }
}

#[async_trait]
impl NeighborRegistry for A10Client {
    #[instrument(skip(self))]
    async fn add_neighbor(&self, address: &str) -> Result<()> {
        let mut neighbors = self.neighbors.lock().await;
        if neighbors.iter().any(|n| n == address) {
            info!("Neighbor already exists on device");
            return Ok(());
        }

        info!("Adding neighbor to device");
        let body = serde_json::to_value(CreateNeighborRequest {
            neighbor: Ipv4Neighbor {
                neighbor_ipv4: address.to_string(),
                remote_as: self.config.remote_as,
            },
        })?;
        self.send_authenticated(Method::POST, &self.neighbors_url(), Some(&body))
            .await
            .map_err(|e| Error::device("add neighbor", address, e))?;

        neighbors.push(address.to_string());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_neighbor(&self, address: &str) -> Result<()> {
        let mut neighbors = self.neighbors.lock().await;
        let Some(index) = neighbors.iter().position(|n| n == address) else {
            info!("Neighbor does not exist on device");
            return Ok(());
        };

        info!("Removing neighbor from device");
        let url = format!("{}/{}", self.neighbors_url(), address);
        self.send_authenticated(Method::DELETE, &url, None)
            .await
            .map_err(|e| Error::device("remove neighbor", address, e))?;

        neighbors.remove(index);
        debug!(neighbors = ?neighbors.as_slice(), "Neighbors after removal");
        Ok(())
    }

    async fn contains_neighbor(&self, address: &str) -> bool {
        self.neighbors.lock().await.iter().any(|n| n == address)
    }

    async fn neighbors(&self) -> Vec<String> {
        self.neighbors.lock().await.clone()
    }
}

fn filter_by_remote_as(neighbors: Vec<Ipv4Neighbor>, remote_as: u32) -> Vec<String> {
    let mut addresses: Vec<String> = Vec::with_capacity(neighbors.len());
    for neighbor in neighbors {
        if neighbor.remote_as == remote_as && !addresses.contains(&neighbor.neighbor_ipv4) {
            addresses.push(neighbor.neighbor_ipv4);
        }
    }
    addresses
}
