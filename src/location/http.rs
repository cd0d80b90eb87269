//! JSON-over-HTTP transport shared by the HTTP-backed collaborators.
//!
//! Requests go through a blocking `ureq` agent on tokio's blocking pool so
//! callers stay async.

use super::types::LocationError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Locus/0.3 (location-engine)";

/// Fetch a URL and decode the body as JSON.
#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, LocationError>;
}

#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(user_agent: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().user_agent(user_agent).build(),
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

#[async_trait]
impl JsonTransport for UreqTransport {
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, LocationError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || {
            let response = agent
                .get(&url)
                .timeout(timeout)
                .call()
                .map_err(|e| LocationError::Network(e.to_string()))?;
            response
                .into_json::<Value>()
                .map_err(|e| LocationError::InvalidResponse(e.to_string()))
        })
        .await
        .map_err(|e| LocationError::Network(format!("request task failed: {}", e)))?
    }
}

/// Percent-encode a query parameter value.
pub fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            _ if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') => c.to_string(),
            _ => {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf)
                    .bytes()
                    .map(|b| format!("%{:02X}", b))
                    .collect()
            }
        })
        .collect()
}
