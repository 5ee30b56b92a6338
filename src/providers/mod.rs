pub mod bcv;
pub mod binance;
pub mod bybit;
pub mod dolarapi;
pub mod remote;
pub mod transport;
pub mod util;

use crate::core::RateSource;
use crate::core::config::AppConfig;
use anyhow::Result;
use std::sync::Arc;

/// Builds the adapters for every enabled source that has one.
pub fn build_sources(config: &AppConfig) -> Result<Vec<Arc<dyn RateSource>>> {
    let timeout = config.request_timeout();
    let providers = &config.providers;
    let mut sources: Vec<Arc<dyn RateSource>> = Vec::new();

    if config.is_enabled("bcv") {
        let base_url = providers
            .bcv
            .as_ref()
            .map_or(bcv::DEFAULT_BASE_URL, |p| p.base_url.as_str());
        sources.push(Arc::new(bcv::BcvProvider::new(base_url, timeout)?));
    }
    if config.is_enabled("paralelo") {
        let base_url = providers
            .dolarapi
            .as_ref()
            .map_or(dolarapi::DEFAULT_BASE_URL, |p| p.base_url.as_str());
        sources.push(Arc::new(dolarapi::DolarApiProvider::new(base_url, timeout)?));
    }
    if config.is_enabled("binance") {
        let base_url = providers
            .binance
            .as_ref()
            .map_or(binance::DEFAULT_BASE_URL, |p| p.base_url.as_str());
        sources.push(Arc::new(binance::BinanceP2pProvider::new(base_url, timeout)?));
    }
    if config.is_enabled("bybit") {
        let base_url = providers
            .bybit
            .as_ref()
            .map_or(bybit::DEFAULT_BASE_URL, |p| p.base_url.as_str());
        sources.push(Arc::new(bybit::BybitP2pProvider::new(base_url, timeout)?));
    }

    Ok(sources)
}
