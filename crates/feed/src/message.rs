//! Wire messages: outbound control frames and sparse inbound ticks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedAction {
    Subscribe,
    Unsubscribe,
}

impl FeedAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// One batched subscribe/unsubscribe frame:
/// `{"action":"subscribe","symbols":["NFO|57130", ...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: FeedAction,
    pub symbols: Vec<String>,
}

impl ControlMessage {
    #[must_use]
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self {
            action: FeedAction::Subscribe,
            symbols,
        }
    }

    #[must_use]
    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self {
            action: FeedAction::Unsubscribe,
            symbols,
        }
    }

    /// Wire text for this frame.
    #[must_use]
    pub fn to_wire(&self) -> String {
        serde_json::json!({
            "action": self.action.as_str(),
            "symbols": self.symbols,
        })
        .to_string()
    }
}

/// Sparse inbound quote. Only `tk` is mandatory; every other field is
/// present only when the feed has an update for it, and absent fields
/// must not clobber stored state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TickMessage {
    /// Exchange security id.
    pub tk: String,
    /// Last traded price.
    #[serde(default)]
    pub lp: Option<Decimal>,
    #[serde(default)]
    pub o: Option<Decimal>,
    #[serde(default)]
    pub h: Option<Decimal>,
    #[serde(default)]
    pub l: Option<Decimal>,
    #[serde(default)]
    pub c: Option<Decimal>,
    /// Best bid price / quantity.
    #[serde(default)]
    pub bp1: Option<Decimal>,
    #[serde(default)]
    pub bq1: Option<Decimal>,
    /// Best ask price / quantity.
    #[serde(default)]
    pub sp1: Option<Decimal>,
    #[serde(default)]
    pub sq1: Option<Decimal>,
}

impl TickMessage {
    /// Decode one inbound frame. Returns `None` for frames that are not
    /// well-formed ticks; the dispatch loop drops those per message.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let tick: Self = serde_json::from_str(text).ok()?;
        if tick.tk.is_empty() {
            return None;
        }
        Some(tick)
    }

    /// True when the frame carries depth fields.
    #[must_use]
    pub fn has_depth(&self) -> bool {
        self.bp1.is_some() || self.bq1.is_some() || self.sp1.is_some() || self.sq1.is_some()
    }
}
