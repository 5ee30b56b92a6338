use super::util::{JSON_USER_AGENT, ensure_success, http_client};
use crate::core::RemoteSnapshot;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, instrument};

const LABEL: &str = "REMOTE_RATES_URL";

/// Loads a complete snapshot from a configured URL to serve as a cycle's base.
pub struct RemoteSnapshotSource {
    url: String,
    client: reqwest::Client,
}

impl RemoteSnapshotSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: http_client(JSON_USER_AGENT, timeout)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches and validates the snapshot. Any deviation from the schema is an error.
    #[instrument(name = "RemoteSnapshotFetch", skip(self), fields(url = %self.url))]
    pub async fn load(&self) -> Result<RemoteSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("{LABEL}: request failed"))?;
        let response = ensure_success(response, LABEL)?;

        let text = response
            .text()
            .await
            .with_context(|| format!("{LABEL}: failed to read body"))?;
        let snapshot: RemoteSnapshot = serde_json::from_str(&text)
            .with_context(|| format!("{LABEL}: invalid snapshot schema"))?;

        debug!(rates = snapshot.rates.len(), "Loaded remote snapshot");
        Ok(snapshot)
    }
}
