//! Broker profiles — capability tables replacing per-broker conditionals.
//!
//! Adding a broker means adding an enum variant and a profile, not new
//! branches at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::ExchangeSegment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Broker {
    Flattrade,
    Shoonya,
}

impl Broker {
    #[must_use]
    pub fn profile(self) -> &'static BrokerProfile {
        match self {
            Self::Flattrade => &FLATTRADE,
            Self::Shoonya => &SHOONYA,
        }
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flattrade => write!(f, "Flattrade"),
            Self::Shoonya => write!(f, "Shoonya"),
        }
    }
}

/// Cash exchange an underlying is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nse,
    Bse,
}

impl Exchange {
    /// Cash segment the exchange's indices tick on.
    #[must_use]
    pub fn cash_segment(self) -> ExchangeSegment {
        match self {
            Self::Nse => ExchangeSegment::Nse,
            Self::Bse => ExchangeSegment::Bse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductType {
    Intraday,
    Margin,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("exchange {exchange:?} is not supported by {broker}")]
    UnsupportedExchange { broker: Broker, exchange: Exchange },
}

/// Static capability set for one broker.
#[derive(Debug, Clone)]
pub struct BrokerProfile {
    pub broker: Broker,
    pub product_types: &'static [ProductType],
    /// Order type codes in the broker's own vocabulary.
    pub order_types: &'static [&'static str],
}

static FLATTRADE: BrokerProfile = BrokerProfile {
    broker: Broker::Flattrade,
    product_types: &[ProductType::Intraday, ProductType::Margin],
    order_types: &["MKT", "LMT", "LMT_LTP"],
};

static SHOONYA: BrokerProfile = BrokerProfile {
    broker: Broker::Shoonya,
    product_types: &[ProductType::Intraday, ProductType::Margin],
    order_types: &["MKT", "LMT", "LMT_LTP"],
};

impl BrokerProfile {
    /// Broker wire code for a transaction side.
    #[must_use]
    pub fn transaction_code(&self, side: TransactionSide) -> &'static str {
        match side {
            TransactionSide::Buy => "B",
            TransactionSide::Sell => "S",
        }
    }

    /// Broker wire code for a product type.
    #[must_use]
    pub fn product_code(&self, product: ProductType) -> &'static str {
        match product {
            ProductType::Intraday => "I",
            ProductType::Margin => "M",
        }
    }

    /// Derivatives segment serving options on an exchange.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::UnsupportedExchange` for pairings this
    /// broker cannot trade; callers report it once and abort the
    /// operation.
    pub fn derivatives_segment(&self, exchange: Exchange) -> Result<ExchangeSegment, ProfileError> {
        match (self.broker, exchange) {
            (Broker::Flattrade | Broker::Shoonya, Exchange::Nse) => Ok(ExchangeSegment::Nfo),
            (Broker::Flattrade | Broker::Shoonya, Exchange::Bse) => Ok(ExchangeSegment::Bfo),
        }
    }
}
