use super::{format_seconds, CoordinationStore, LockHolder, SessionInfo};
use crate::config::CoordinationConfig;
use crate::error::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const API_VERSION: &str = "v1";

/// Thin client for the Consul HTTP API.
#[derive(Clone, Debug)]
pub struct ConsulClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value", default)]
    value: Option<String>,
    #[serde(rename = "Session", default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct SessionEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "TTL", default)]
    ttl: Option<String>,
    #[serde(rename = "Node", default)]
    node: Option<String>,
}

impl ConsulClient {
    pub fn new(config: &CoordinationConfig) -> Result<Self> {
        let address = if config.address == "0.0.0.0" {
            "127.0.0.1"
        } else {
            config.address.as_str()
        };
        let root = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{address}:{}", config.port)
        };
        Self::with_base_url(&root, config.request_timeout)
    }

    /// `root` is the agent address without the API version suffix.
    pub fn with_base_url(root: &str, request_timeout: Duration) -> Result<Self> {
        url::Url::parse(root)?;
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/{API_VERSION}", root.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, api: &str) -> String {
        format!("{}/{}", self.base_url, api.trim_start_matches('/'))
    }

    fn kv_api(key: &str) -> String {
        format!("kv/{}", key.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, api: &str) -> Option<String> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(api, error = %err, "coordination request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(api, status = status.as_u16(), "coordination request rejected");
            return None;
        }

        match response.text().await {
            Ok(body) => Some(body),
            Err(err) => {
                tracing::debug!(api, error = %err, "coordination response unreadable");
                None
            }
        }
    }

    async fn get_text(&self, api: &str) -> Option<String> {
        self.send(self.client.get(self.url(api)), api).await
    }

    async fn put_text(&self, api: &str, request: impl FnOnce(RequestBuilder) -> RequestBuilder) -> Option<String> {
        self.send(request(self.client.put(self.url(api))), api).await
    }

    async fn first_kv_entry(&self, key: &str) -> Option<KvEntry> {
        let body = self.get_text(&Self::kv_api(key)).await?;
        let entries: Vec<KvEntry> = serde_json::from_str(&body).ok()?;
        entries.into_iter().next()
    }
}

fn is_true(body: Option<String>) -> bool {
    matches!(body.as_deref().map(str::trim), Some("true"))
}

fn decode_value(value: Option<&str>) -> Option<Vec<u8>> {
    match value {
        Some(encoded) => BASE64_ENGINE.decode(encoded).ok(),
        None => Some(Vec::new()),
    }
}

fn strip_port(peer: &str) -> String {
    let host = match peer.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => peer,
    };
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}

#[async_trait]
impl CoordinationStore for ConsulClient {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.first_kv_entry(key).await?;
        let value = entry.value?;
        BASE64_ENGINE.decode(value).ok()
    }

    async fn put(&self, key: &str, value: &[u8]) -> bool {
        let body = value.to_vec();
        is_true(
            self.put_text(&Self::kv_api(key), |request| request.body(body))
                .await,
        )
    }

    async fn delete(&self, key: &str) -> bool {
        let api = Self::kv_api(key);
        is_true(self.send(self.client.delete(self.url(&api)), &api).await)
    }

    async fn create_session(
        &self,
        name: &str,
        lock_delay: Duration,
        ttl: Duration,
    ) -> Option<String> {
        let payload = json!({
            "Name": name,
            "LockDelay": format_seconds(lock_delay),
            "TTL": format_seconds(ttl),
        });
        let body = self
            .put_text("session/create", |request| request.json(&payload))
            .await?;
        serde_json::from_str::<SessionCreated>(&body)
            .ok()
            .map(|created| created.id)
    }

    async fn destroy_session(&self, id: &str) -> bool {
        let api = format!("session/destroy/{}", id.trim_start_matches('/'));
        is_true(self.put_text(&api, |request| request).await)
    }

    async fn renew_session(&self, id: &str) -> bool {
        let api = format!("session/renew/{}", id.trim_start_matches('/'));
        let Some(body) = self.put_text(&api, |request| request).await else {
            return false;
        };
        serde_json::from_str::<Vec<SessionEntry>>(&body)
            .ok()
            .and_then(|entries| entries.into_iter().next())
            .map(|entry| entry.id == id)
            .unwrap_or(false)
    }

    async fn session_info(&self, id: &str) -> Option<SessionInfo> {
        let api = format!("session/info/{}", id.trim_start_matches('/'));
        let body = self.get_text(&api).await?;
        let entry = serde_json::from_str::<Vec<SessionEntry>>(&body)
            .ok()?
            .into_iter()
            .next()?;
        Some(SessionInfo {
            id: entry.id,
            name: entry.name,
            ttl: entry.ttl,
            node: entry.node,
        })
    }

    async fn acquire(&self, key: &str, session: &str, value: &[u8]) -> bool {
        let body = value.to_vec();
        is_true(
            self.put_text(&Self::kv_api(key), |request| {
                request.query(&[("acquire", session)]).body(body)
            })
            .await,
        )
    }

    async fn release(&self, key: &str, session: &str) -> bool {
        is_true(
            self.put_text(&Self::kv_api(key), |request| {
                request.query(&[("release", session)])
            })
            .await,
        )
    }

    async fn lock_holder(&self, key: &str) -> Option<LockHolder> {
        let entry = self.first_kv_entry(key).await?;
        let session = entry.session.filter(|session| !session.is_empty())?;
        let value = decode_value(entry.value.as_deref())?;
        Some(LockHolder { value, session })
    }

    async fn list_peers(&self) -> Vec<String> {
        let Some(body) = self.get_text("status/peers").await else {
            return Vec::new();
        };
        serde_json::from_str::<Vec<String>>(&body)
            .map(|peers| peers.iter().map(|peer| strip_port(peer)).collect())
            .unwrap_or_default()
    }
}
