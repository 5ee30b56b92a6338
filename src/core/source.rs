//! Rate source abstractions

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Display;
use std::str::FromStr;

/// Sources with a built-in adapter, in publication priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum SourceId {
    Bcv,
    Paralelo,
    Binance,
    Bybit,
}

impl SourceId {
    pub const ALL: [SourceId; 4] = [
        SourceId::Bcv,
        SourceId::Paralelo,
        SourceId::Binance,
        SourceId::Bybit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Bcv => "bcv",
            SourceId::Paralelo => "paralelo",
            SourceId::Binance => "binance",
            SourceId::Bybit => "bybit",
        }
    }

    /// Label shown next to the rate when the adapter inserts it.
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceId::Bcv => "Dólar BCV",
            SourceId::Paralelo => "Dólar Paralelo",
            SourceId::Binance => "Binance / Kontigo",
            SourceId::Bybit => "Bybit",
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bcv" => Ok(SourceId::Bcv),
            "paralelo" => Ok(SourceId::Paralelo),
            "binance" => Ok(SourceId::Binance),
            "bybit" => Ok(SourceId::Bybit),
            _ => Err(anyhow::anyhow!("Unknown rate source: {}", s)),
        }
    }
}

/// Sort key for a rate id: known sources by priority, anything else last.
pub fn priority(id: &str) -> usize {
    SourceId::ALL
        .iter()
        .position(|s| s.as_str() == id)
        .unwrap_or(usize::MAX)
}

/// A fetch+parse routine producing one VES/USD quote from one upstream.
///
/// Implementations hold no state shared with other sources and never retry;
/// the next refresh cycle is the retry.
#[async_trait]
pub trait RateSource: Send + Sync {
    fn id(&self) -> SourceId;

    async fn fetch_rate(&self) -> Result<f64>;
}
