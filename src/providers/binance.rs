use super::util::{JSON_USER_AGENT, ensure_success, http_client, median_offer_price};
use crate::core::{NumberFormat, RateSource, SourceId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://p2p.binance.com";
const SEARCH_PATH: &str = "/bapi/c2c/v2/friendly/c2c/adv/search";
const LABEL: &str = "Binance P2P";

/// Median USDT/VES price over the first page of buy-side P2P offers.
pub struct BinanceP2pProvider {
    url: String,
    client: reqwest::Client,
    rows: u32,
}

impl BinanceP2pProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), SEARCH_PATH),
            client: http_client(JSON_USER_AGENT, timeout)?,
            rows: 10,
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    page: u32,
    rows: u32,
    pay_types: Vec<String>,
    asset: &'a str,
    fiat: &'a str,
    trade_type: &'a str,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    data: Option<Vec<SearchRow>>,
}

#[derive(Deserialize, Debug)]
struct SearchRow {
    adv: Option<Advertisement>,
}

#[derive(Deserialize, Debug)]
struct Advertisement {
    // Anything but a string is skipped.
    price: Option<serde_json::Value>,
}

#[async_trait]
impl RateSource for BinanceP2pProvider {
    fn id(&self) -> SourceId {
        SourceId::Binance
    }

    #[instrument(name = "BinanceP2pFetch", skip(self))]
    async fn fetch_rate(&self) -> Result<f64> {
        let body = SearchRequest {
            page: 1,
            rows: self.rows,
            pay_types: Vec::new(),
            asset: "USDT",
            fiat: "VES",
            trade_type: "BUY",
        };
        debug!("Requesting P2P offers from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{LABEL}: request failed"))?;
        let response = ensure_success(response, LABEL)?;

        let data: SearchResponse = response
            .json()
            .await
            .with_context(|| format!("{LABEL}: failed to parse JSON response"))?;

        let rows = data.data.unwrap_or_default();
        let prices = rows
            .iter()
            .filter_map(|row| row.adv.as_ref()?.price.as_ref()?.as_str());
        median_offer_price(prices, NumberFormat::Plain, LABEL)
    }
}
