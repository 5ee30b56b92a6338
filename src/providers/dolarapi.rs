use super::util::{JSON_USER_AGENT, ensure_success, http_client};
use crate::core::{RateSource, SourceId};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://ve.dolarapi.com";
const PARALELO_PATH: &str = "/v1/dolares/paralelo";
const LABEL: &str = "DolarApi";

/// Informal-market average published by DolarApi.
pub struct DolarApiProvider {
    url: String,
    client: reqwest::Client,
}

impl DolarApiProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), PARALELO_PATH),
            client: http_client(JSON_USER_AGENT, timeout)?,
        })
    }
}

#[async_trait]
impl RateSource for DolarApiProvider {
    fn id(&self) -> SourceId {
        SourceId::Paralelo
    }

    #[instrument(name = "DolarApiFetch", skip(self))]
    async fn fetch_rate(&self) -> Result<f64> {
        debug!("Requesting parallel rate from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("{LABEL}: request failed"))?;
        let response = ensure_success(response, LABEL)?;

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("{LABEL}: failed to parse JSON response"))?;

        body.get("promedio")
            .and_then(serde_json::Value::as_f64)
            .filter(|v| v.is_finite())
            .ok_or_else(|| anyhow!("{LABEL}: missing or non-numeric 'promedio'"))
    }
}
