//! Latest tick-derived state per tracked instrument.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::message::TickMessage;

/// Last-known quote for one instrument. Every field is independently
/// optional: the feed sends fragments, and a fragment must never blank
/// out fields it does not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Quote {
    pub last: Option<Decimal>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_bid_qty: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_ask_qty: Option<Decimal>,
}

impl Quote {
    fn merge(&mut self, tick: &TickMessage) {
        if tick.lp.is_some() {
            self.last = tick.lp;
        }
        if tick.o.is_some() {
            self.open = tick.o;
        }
        if tick.h.is_some() {
            self.high = tick.h;
        }
        if tick.l.is_some() {
            self.low = tick.l;
        }
        if tick.c.is_some() {
            self.close = tick.c;
        }
        if tick.bp1.is_some() {
            self.best_bid = tick.bp1;
        }
        if tick.bq1.is_some() {
            self.best_bid_qty = tick.bq1;
        }
        if tick.sp1.is_some() {
            self.best_ask = tick.sp1;
        }
        if tick.sq1.is_some() {
            self.best_ask_qty = tick.sq1;
        }
    }

    /// Depth is usable only once both sides are present.
    #[must_use]
    pub fn has_depth(&self) -> bool {
        self.best_bid.is_some()
            && self.best_bid_qty.is_some()
            && self.best_ask.is_some()
            && self.best_ask_qty.is_some()
    }
}

/// Session-scoped price state. Written only by the dispatch path; read
/// by strike selection and risk evaluation.
#[derive(Debug, Default)]
pub struct PriceStore {
    quotes: HashMap<String, Quote>,
    /// Last traded price per open-position trading symbol. Keyed by
    /// trading symbol because that is how the position book reports.
    position_ltps: HashMap<String, Decimal>,
}

impl PriceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one tick into the stored quote for its instrument.
    pub fn apply(&mut self, tick: &TickMessage) {
        self.quotes.entry(tick.tk.clone()).or_default().merge(tick);
    }

    #[must_use]
    pub fn quote(&self, security_id: &str) -> Option<&Quote> {
        self.quotes.get(security_id)
    }

    #[must_use]
    pub fn last(&self, security_id: &str) -> Option<Decimal> {
        self.quotes.get(security_id).and_then(|q| q.last)
    }

    /// Forget a quote, e.g. when a leg moves to a new instrument and the
    /// old premium must not show against it.
    pub fn clear(&mut self, security_id: &str) {
        self.quotes.remove(security_id);
    }

    pub fn set_position_ltp(&mut self, trading_symbol: &str, price: Decimal) {
        self.position_ltps.insert(trading_symbol.to_string(), price);
    }

    /// Drop cached prices for positions no longer in the book. A symbol
    /// that is closed and later re-opened must start from the price the
    /// book reports, not a tick cached for the old position.
    pub fn retain_position_ltps(&mut self, keep: impl Fn(&str) -> bool) {
        self.position_ltps.retain(|symbol, _| keep(symbol));
    }

    #[must_use]
    pub fn position_ltp(&self, trading_symbol: &str) -> Option<Decimal> {
        self.position_ltps.get(trading_symbol).copied()
    }

    #[must_use]
    pub fn position_ltps(&self) -> &HashMap<String, Decimal> {
        &self.position_ltps
    }
}
