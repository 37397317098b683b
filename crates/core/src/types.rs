use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange segment an instrument trades on. Indices tick on the cash
/// segments, their options on the derivatives segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeSegment {
    /// NSE cash.
    #[serde(rename = "NSE")]
    Nse,
    /// BSE cash.
    #[serde(rename = "BSE")]
    Bse,
    /// NSE futures & options.
    #[serde(rename = "NFO")]
    Nfo,
    /// BSE futures & options.
    #[serde(rename = "BFO")]
    Bfo,
}

impl fmt::Display for ExchangeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nse => write!(f, "NSE"),
            Self::Bse => write!(f, "BSE"),
            Self::Nfo => write!(f, "NFO"),
            Self::Bfo => write!(f, "BFO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionKind {
    Call,
    Put,
    /// The underlying index itself (master symbol feed).
    Underlying,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
            Self::Underlying => write!(f, "UNDERLYING"),
        }
    }
}

/// Exchange-scoped security identifier. Rendered on the wire as
/// `"<segment>|<security_id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentId {
    pub segment: ExchangeSegment,
    pub security_id: String,
}

impl InstrumentId {
    #[must_use]
    pub fn new(segment: ExchangeSegment, security_id: impl Into<String>) -> Self {
        Self {
            segment,
            security_id: security_id.into(),
        }
    }

    /// Wire form used by subscribe/unsubscribe control frames.
    #[must_use]
    pub fn wire_symbol(&self) -> String {
        format!("{}|{}", self.segment, self.security_id)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.segment, self.security_id)
    }
}

/// A tradable (or placeholder) contract from the instrument master.
///
/// `security_id` is absent for synthesized ladder gaps — a strike price
/// that exists on one side of the book but not the other. Such entries
/// are displayable but not tradable or subscribable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub security_id: Option<String>,
    pub trading_symbol: Option<String>,
    pub strike: Option<Decimal>,
    pub kind: OptionKind,
    pub expiry: Option<NaiveDate>,
}

/// One open position as reported by the portfolio collaborator.
///
/// Keyed by trading symbol rather than security id because that is how
/// the position book identifies entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub trading_symbol: String,
    pub security_id: Option<InstrumentId>,
    pub net_qty: Decimal,
    pub avg_price: Decimal,
    /// Last price carried by the position book itself; used until a live
    /// tick for this instrument has arrived.
    pub last_price: Option<Decimal>,
    /// Price multiplier (contract factor); 1 for most instruments.
    pub multiplier: Decimal,
    pub day_buy_value: Decimal,
    pub day_sell_value: Decimal,
    pub realized_pnl: Decimal,
}

/// Account funds snapshot from the portfolio collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FundLimits {
    pub cash: Decimal,
    pub payin: Decimal,
    pub margin_used: Decimal,
}

impl FundLimits {
    /// Cash plus payin minus margin already committed.
    #[must_use]
    pub fn available_balance(&self) -> Decimal {
        self.cash + self.payin - self.margin_used
    }

    /// Capital base for percentage risk thresholds: available balance
    /// plus margin in use.
    #[must_use]
    pub fn total_capital(&self) -> Decimal {
        self.available_balance() + self.margin_used
    }
}
