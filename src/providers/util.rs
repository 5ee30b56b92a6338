use crate::core::NumberFormat;
use anyhow::{Result, anyhow};
use std::time::Duration;

/// User agent sent to JSON upstreams.
pub const JSON_USER_AGENT: &str = "tasas-dolar-vzla/1.0";

/// Builds an HTTP client whose requests give up after `timeout`.
pub fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?)
}

/// Fails with `<label> HTTP <status>` unless the response is a 2xx.
pub fn ensure_success(response: reqwest::Response, label: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("{} HTTP {}", label, status.as_u16()));
    }
    Ok(response)
}

/// Upper median of the finite prices: sorted ascending, element at `len / 2`.
pub fn median(prices: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    Some(sorted[sorted.len() / 2])
}

/// Parses raw offer prices with `format` and returns their median.
pub fn median_offer_price<'a>(
    raw_prices: impl IntoIterator<Item = &'a str>,
    format: NumberFormat,
    label: &str,
) -> Result<f64> {
    let prices: Vec<f64> = raw_prices.into_iter().map(|p| format.parse(p)).collect();
    median(&prices).ok_or_else(|| anyhow!("{}: no usable prices", label))
}
