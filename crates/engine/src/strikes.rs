//! Strike selection: keep the call/put pair aligned to the underlying.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use optdesk_core::config::StrikeConfig;
use optdesk_core::ladder::{LadderEntry, StrikeLadder};
use optdesk_core::types::{ExchangeSegment, InstrumentId};

/// The currently selected legs. A leg may be a placeholder rung
/// (strike without instrument): displayable but not subscribable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrikeSelection {
    pub call: Option<LadderEntry>,
    pub put: Option<LadderEntry>,
    /// Expiry the selection was derived from; a ladder for a different
    /// expiry invalidates it.
    pub expiry: Option<NaiveDate>,
}

impl StrikeSelection {
    #[must_use]
    pub fn call_id(&self, segment: ExchangeSegment) -> Option<InstrumentId> {
        self.call.as_ref().and_then(|e| e.instrument_id(segment))
    }

    #[must_use]
    pub fn put_id(&self, segment: ExchangeSegment) -> Option<InstrumentId> {
        self.put.as_ref().and_then(|e| e.instrument_id(segment))
    }
}

/// Derives the desired call/put pair from the underlying price,
/// configured offsets, and the ladder in effect.
#[derive(Debug, Default)]
pub struct StrikeSynchronizer {
    config: StrikeConfig,
    selection: StrikeSelection,
}

impl StrikeSynchronizer {
    #[must_use]
    pub fn new(config: StrikeConfig) -> Self {
        Self {
            config,
            selection: StrikeSelection::default(),
        }
    }

    #[must_use]
    pub fn selection(&self) -> &StrikeSelection {
        &self.selection
    }

    #[must_use]
    pub fn config(&self) -> &StrikeConfig {
        &self.config
    }

    pub fn set_offsets(&mut self, call_offset: i32, put_offset: i32) {
        self.config.call_offset = call_offset;
        self.config.put_offset = put_offset;
    }

    pub fn set_lock_legs(&mut self, lock: bool) {
        self.config.lock_legs = lock;
    }

    /// Re-derive the selection from the at-the-money index.
    ///
    /// Without `force`, an existing selection for this ladder's expiry is
    /// kept: underlying ticks fill a missing selection but do not chase
    /// the spot once both legs are chosen. Expiry and offset changes pass
    /// `force` to bypass that shortcut.
    ///
    /// Returns true when the selection changed.
    pub fn sync(&mut self, price: Decimal, ladder: &StrikeLadder, force: bool) -> bool {
        let stale = self.selection.expiry != Some(ladder.expiry);
        let unselected = self.selection.call.as_ref().map_or(true, |e| e.security_id.is_none())
            || self.selection.put.as_ref().map_or(true, |e| e.security_id.is_none());
        if !(force || stale || unselected) {
            return false;
        }

        let previous = self.selection.clone();
        let (call, put) = match ladder.atm_index(price) {
            Some(atm) => {
                let atm = atm as i64;
                (
                    ladder.call_at(atm - i64::from(self.config.call_offset)).cloned(),
                    ladder.put_at(atm + i64::from(self.config.put_offset)).cloned(),
                )
            }
            None => (None, None),
        };
        self.selection = StrikeSelection {
            call,
            put,
            expiry: Some(ladder.expiry),
        };

        if self.selection != previous {
            tracing::debug!(
                price = %price,
                call = ?self.selection.call.as_ref().map(|e| e.strike),
                put = ?self.selection.put.as_ref().map(|e| e.strike),
                "Strike selection updated"
            );
            true
        } else {
            false
        }
    }

    /// Explicit user pick of the call leg. In lock mode the put leg is
    /// re-derived at the same strike price; a strike with no contract on
    /// the put side clears that leg rather than falling back.
    pub fn pick_call(&mut self, strike: Decimal, ladder: &StrikeLadder) -> bool {
        let previous = self.selection.clone();
        self.selection.call = ladder.call_by_strike(strike).cloned();
        self.selection.expiry = Some(ladder.expiry);
        if self.config.lock_legs {
            self.selection.put = ladder.put_by_strike(strike).cloned();
        }
        self.selection != previous
    }

    /// Bring the legs onto one shared strike when lock mode is on. The
    /// call leg anchors the pair; the put anchors only when no call is
    /// selected. Returns true when a leg moved.
    pub fn align_locked_legs(&mut self, ladder: &StrikeLadder) -> bool {
        if !self.config.lock_legs {
            return false;
        }
        if let Some(entry) = self.selection.call.clone() {
            self.pick_call(entry.strike, ladder)
        } else if let Some(entry) = self.selection.put.clone() {
            self.pick_put(entry.strike, ladder)
        } else {
            false
        }
    }

    /// Explicit user pick of the put leg; mirror of [`Self::pick_call`].
    pub fn pick_put(&mut self, strike: Decimal, ladder: &StrikeLadder) -> bool {
        let previous = self.selection.clone();
        self.selection.put = ladder.put_by_strike(strike).cloned();
        self.selection.expiry = Some(ladder.expiry);
        if self.config.lock_legs {
            self.selection.call = ladder.call_by_strike(strike).cloned();
        }
        self.selection != previous
    }

    /// Drop the selection entirely, e.g. on master-symbol change before
    /// the new ladder arrives.
    pub fn clear(&mut self) {
        self.selection = StrikeSelection::default();
    }
}
