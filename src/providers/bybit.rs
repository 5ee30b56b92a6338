use super::util::{JSON_USER_AGENT, ensure_success, http_client, median_offer_price};
use crate::core::{NumberFormat, RateSource, SourceId};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const DEFAULT_BASE_URL: &str = "https://api2.bybit.com";
const RECOMMEND_PATH: &str = "/fiat/otc/item/recommend/online";
const LABEL: &str = "Bybit P2P";
const SUCCESS_CODE: i64 = 0;

/// Side of the offers requested, serialized as the string enum the endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    #[serde(rename = "1")]
    Buy,
}

/// Median USDT/VES price over Bybit's recommended P2P offers.
///
/// Bybit quotes VES with three decimals (`438.150`), so prices go through
/// [`NumberFormat::Fixed3`].
pub struct BybitP2pProvider {
    url: String,
    client: reqwest::Client,
    side: Side,
    size: u32,
}

impl BybitP2pProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), RECOMMEND_PATH),
            client: http_client(JSON_USER_AGENT, timeout)?,
            side: Side::Buy,
            size: 10,
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RecommendRequest<'a> {
    token_id: &'a str,
    currency_id: &'a str,
    side: Side,
    page: u32,
    size: u32,
}

#[derive(Deserialize, Debug)]
struct RecommendResponse {
    ret_code: Option<i64>,
    ret_msg: Option<String>,
    result: Option<RecommendResult>,
}

#[derive(Deserialize, Debug)]
struct RecommendResult {
    items: Option<Vec<Offer>>,
}

#[derive(Deserialize, Debug)]
struct Offer {
    price: Option<serde_json::Value>,
}

#[async_trait]
impl RateSource for BybitP2pProvider {
    fn id(&self) -> SourceId {
        SourceId::Bybit
    }

    #[instrument(name = "BybitP2pFetch", skip(self))]
    async fn fetch_rate(&self) -> Result<f64> {
        let body = RecommendRequest {
            token_id: "USDT",
            currency_id: "VES",
            side: self.side,
            page: 1,
            size: self.size,
        };
        let guid = Uuid::new_v4().to_string();
        debug!(%guid, "Requesting recommended offers from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("platform", "PC")
            .header("guid", guid)
            .header(reqwest::header::ORIGIN, "https://www.bybit.com")
            .header(reqwest::header::REFERER, "https://www.bybit.com/fiat/trade/otc")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{LABEL}: request failed"))?;
        let response = ensure_success(response, LABEL)?;

        let data: RecommendResponse = response
            .json()
            .await
            .with_context(|| format!("{LABEL}: failed to parse JSON response"))?;

        if data.ret_code != Some(SUCCESS_CODE) {
            let code = data
                .ret_code
                .map_or_else(|| "missing".to_string(), |c| c.to_string());
            let message = format!(
                "{LABEL}: ret_code={} {}",
                code,
                data.ret_msg.unwrap_or_default()
            );
            return Err(anyhow!(message.trim().to_string()));
        }

        let items = data.result.and_then(|r| r.items).unwrap_or_default();
        let prices = items
            .iter()
            .filter_map(|offer| offer.price.as_ref()?.as_str());
        median_offer_price(prices, NumberFormat::Fixed3, LABEL)
    }
}
