//! Official rate scraped from the central bank's homepage.

use super::transport::{HtmlTransport, PowerShellTransport, ReqwestTransport};
use crate::core::{RateSource, SourceId, parse_loose};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.bcv.org.ve";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

// Older markup: "USD 273,58610000"
static INLINE_USD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bUSD\s+([0-9][0-9.,]+)\b").expect("invalid regex pattern"));

// Current markup: "<span> USD</span> ... <strong> 276,57690000 </strong>"
static SPAN_STRONG_USD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bUSD\s*</span>.{0,600}?<strong>\s*([0-9][0-9.,]+)\s*</strong>")
        .expect("invalid regex pattern")
});

/// Extracts the USD quote from the bank's homepage HTML.
pub fn extract_usd_rate(html: &str) -> Result<f64> {
    let raw = INLINE_USD
        .captures(html)
        .or_else(|| SPAN_STRONG_USD.captures(html))
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| anyhow!("BCV: USD not found in HTML"))?
        .as_str();

    let value = parse_loose(raw);
    if !value.is_finite() {
        return Err(anyhow!("BCV: invalid number '{}'", raw));
    }
    Ok(value)
}

pub struct BcvProvider {
    url: String,
    primary: Arc<dyn HtmlTransport>,
    fallback: Option<Arc<dyn HtmlTransport>>,
}

impl BcvProvider {
    /// Uses reqwest, falling back to PowerShell (Windows only) on an untrusted chain.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let primary = ReqwestTransport::new(BROWSER_USER_AGENT, timeout)?;
        Ok(Self::with_transports(
            base_url,
            Arc::new(primary),
            Some(Arc::new(PowerShellTransport::default())),
        ))
    }

    pub fn with_transports(
        base_url: &str,
        primary: Arc<dyn HtmlTransport>,
        fallback: Option<Arc<dyn HtmlTransport>>,
    ) -> Self {
        Self {
            url: format!("{}/", base_url.trim_end_matches('/')),
            primary,
            fallback,
        }
    }

    async fn fetch_html(&self) -> Result<String> {
        match self.primary.get_html(&self.url).await {
            Ok(html) => Ok(html),
            Err(err) if err.is_untrusted_certificate() => {
                let fallback = self.fallback.as_ref().ok_or_else(|| anyhow!("BCV: {}", err))?;
                warn!(error = %err, "BCV certificate chain rejected, trying fallback transport");
                fallback
                    .get_html(&self.url)
                    .await
                    .map_err(|e| anyhow!("BCV: fallback transport failed: {}", e))
            }
            Err(err) => Err(anyhow!("BCV {}", err)),
        }
    }
}

#[async_trait]
impl RateSource for BcvProvider {
    fn id(&self) -> SourceId {
        SourceId::Bcv
    }

    #[instrument(name = "BcvFetch", skip(self), fields(url = %self.url))]
    async fn fetch_rate(&self) -> Result<f64> {
        let html = self.fetch_html().await?;
        debug!(bytes = html.len(), "Received BCV homepage");
        extract_usd_rate(&html)
    }
}
