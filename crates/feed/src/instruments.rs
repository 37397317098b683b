//! Instrument-master collaborator: strike lists and expiries per
//! underlying, fetched wholesale and cached by the session.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use optdesk_core::ladder::StrikeLadder;
use optdesk_core::types::{ExchangeSegment, Instrument, OptionKind};

/// One strike row as the instrument master reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeRow {
    pub strike_price: Decimal,
    pub expiry_date: NaiveDate,
    #[serde(default)]
    pub security_id: Option<String>,
    #[serde(default)]
    pub trading_symbol: Option<String>,
}

impl StrikeRow {
    fn into_instrument(self, kind: OptionKind) -> Instrument {
        Instrument {
            security_id: self.security_id,
            trading_symbol: self.trading_symbol,
            strike: Some(self.strike_price),
            kind,
            expiry: Some(self.expiry_date),
        }
    }
}

/// Wholesale instrument-master response for one underlying: all expiry
/// dates plus the full call and put strike lists across expiries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolData {
    #[serde(default)]
    pub expiry_dates: Vec<NaiveDate>,
    #[serde(default)]
    pub call_strikes: Vec<StrikeRow>,
    #[serde(default)]
    pub put_strikes: Vec<StrikeRow>,
}

impl SymbolData {
    /// Default expiry: the `offset`-th date in ascending order, clamped
    /// to the last available one.
    #[must_use]
    pub fn expiry_at_offset(&self, offset: usize) -> Option<NaiveDate> {
        let mut dates = self.expiry_dates.clone();
        dates.sort();
        if dates.is_empty() {
            return None;
        }
        let index = offset.min(dates.len() - 1);
        dates.get(index).copied()
    }

    /// Build the ladder for one expiry from the cached strike lists.
    #[must_use]
    pub fn ladder_for(&self, underlying: &str, expiry: NaiveDate) -> StrikeLadder {
        let calls: Vec<Instrument> = self
            .call_strikes
            .iter()
            .cloned()
            .map(|r| r.into_instrument(OptionKind::Call))
            .collect();
        let puts: Vec<Instrument> = self
            .put_strikes
            .iter()
            .cloned()
            .map(|r| r.into_instrument(OptionKind::Put))
            .collect();
        StrikeLadder::build(underlying, expiry, &calls, &puts)
    }
}

/// Read-only source of strike ladders and expiries.
#[async_trait]
pub trait InstrumentMaster: Send + Sync {
    /// Fetch the full strike/expiry set for one underlying on one
    /// derivatives segment.
    async fn fetch(&self, segment: ExchangeSegment, underlying: &str) -> Result<SymbolData>;
}

/// HTTP client for the symbols endpoint.
pub struct HttpInstrumentMaster {
    base_url: String,
    client: reqwest::Client,
}

impl HttpInstrumentMaster {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InstrumentMaster for HttpInstrumentMaster {
    async fn fetch(&self, segment: ExchangeSegment, underlying: &str) -> Result<SymbolData> {
        let url = format!(
            "{}/symbols?exchangeSymbol={segment}&masterSymbol={underlying}",
            self.base_url
        );
        tracing::debug!(%url, "Fetching instrument master data");

        let data = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("symbols request failed for {underlying}"))?
            .error_for_status()
            .with_context(|| format!("symbols request rejected for {underlying}"))?
            .json::<SymbolData>()
            .await
            .with_context(|| format!("malformed symbols payload for {underlying}"))?;

        tracing::debug!(
            underlying,
            expiries = data.expiry_dates.len(),
            calls = data.call_strikes.len(),
            puts = data.put_strikes.len(),
            "Instrument master data fetched"
        );
        Ok(data)
    }
}
