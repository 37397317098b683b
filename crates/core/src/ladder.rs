//! Strike ladders — sorted call/put strike lists for one underlying+expiry.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{ExchangeSegment, Instrument, InstrumentId};

/// One rung of a ladder. `security_id` is `None` for synthesized gaps:
/// the strike price exists on the opposite side but has no contract here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderEntry {
    pub strike: Decimal,
    pub security_id: Option<String>,
    pub trading_symbol: Option<String>,
}

impl LadderEntry {
    #[must_use]
    pub fn is_tradable(&self) -> bool {
        self.security_id.is_some()
    }

    /// Full instrument id for subscription, if this rung is tradable.
    #[must_use]
    pub fn instrument_id(&self, segment: ExchangeSegment) -> Option<InstrumentId> {
        self.security_id
            .as_ref()
            .map(|id| InstrumentId::new(segment, id.clone()))
    }
}

/// Call and put strike ladders for one (underlying, expiry).
///
/// Both sides share one ascending, duplicate-free strike axis: the union
/// of strike prices present on either side, with placeholder entries
/// synthesized where a side has no contract. Index `i` therefore refers
/// to the same strike price on both sides.
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeLadder {
    pub underlying: String,
    pub expiry: NaiveDate,
    calls: Vec<LadderEntry>,
    puts: Vec<LadderEntry>,
}

impl StrikeLadder {
    /// Build the ladder from raw instrument-master rows, keeping only the
    /// given expiry.
    #[must_use]
    pub fn build(
        underlying: impl Into<String>,
        expiry: NaiveDate,
        call_side: &[Instrument],
        put_side: &[Instrument],
    ) -> Self {
        let for_expiry = |rows: &[Instrument]| -> Vec<Instrument> {
            rows.iter()
                .filter(|i| i.expiry == Some(expiry) && i.strike.is_some())
                .cloned()
                .collect()
        };
        let calls_raw = for_expiry(call_side);
        let puts_raw = for_expiry(put_side);

        let mut strikes: Vec<Decimal> = calls_raw
            .iter()
            .chain(puts_raw.iter())
            .filter_map(|i| i.strike)
            .collect();
        strikes.sort();
        strikes.dedup();

        let entry_for = |rows: &[Instrument], strike: Decimal| -> LadderEntry {
            rows.iter()
                .find(|i| i.strike == Some(strike))
                .map_or(
                    LadderEntry {
                        strike,
                        security_id: None,
                        trading_symbol: None,
                    },
                    |i| LadderEntry {
                        strike,
                        security_id: i.security_id.clone(),
                        trading_symbol: i.trading_symbol.clone(),
                    },
                )
        };

        let calls = strikes.iter().map(|&s| entry_for(&calls_raw, s)).collect();
        let puts = strikes.iter().map(|&s| entry_for(&puts_raw, s)).collect();

        Self {
            underlying: underlying.into(),
            expiry,
            calls,
            puts,
        }
    }

    #[must_use]
    pub fn calls(&self) -> &[LadderEntry] {
        &self.calls
    }

    #[must_use]
    pub fn puts(&self) -> &[LadderEntry] {
        &self.puts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Index of the strike nearest to `price`. Ties go to the lower
    /// strike: the ascending scan only replaces the candidate on a
    /// strictly smaller distance.
    #[must_use]
    pub fn atm_index(&self, price: Decimal) -> Option<usize> {
        let mut best: Option<(usize, Decimal)> = None;
        for (i, entry) in self.calls.iter().enumerate() {
            let dist = (entry.strike - price).abs();
            match best {
                Some((_, d)) if dist >= d => {}
                _ => best = Some((i, dist)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Call rung at a signed index; out of range yields `None`, never a
    /// wrap-around.
    #[must_use]
    pub fn call_at(&self, index: i64) -> Option<&LadderEntry> {
        usize::try_from(index).ok().and_then(|i| self.calls.get(i))
    }

    /// Put rung at a signed index.
    #[must_use]
    pub fn put_at(&self, index: i64) -> Option<&LadderEntry> {
        usize::try_from(index).ok().and_then(|i| self.puts.get(i))
    }

    /// Call rung at exactly this strike price.
    #[must_use]
    pub fn call_by_strike(&self, strike: Decimal) -> Option<&LadderEntry> {
        self.calls.iter().find(|e| e.strike == strike)
    }

    /// Put rung at exactly this strike price.
    #[must_use]
    pub fn put_by_strike(&self, strike: Decimal) -> Option<&LadderEntry> {
        self.puts.iter().find(|e| e.strike == strike)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptionKind;
    use rust_decimal_macros::dec;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 30).unwrap()
    }

    fn contract(strike: Decimal, id: &str, kind: OptionKind) -> Instrument {
        Instrument {
            security_id: Some(id.to_string()),
            trading_symbol: Some(format!(
                "NIFTY30SEP25{}{}",
                if kind == OptionKind::Call { "C" } else { "P" },
                strike
            )),
            strike: Some(strike),
            kind,
            expiry: Some(expiry()),
        }
    }

    fn sample_ladder() -> StrikeLadder {
        let calls: Vec<Instrument> = [dec!(100), dec!(105), dec!(110), dec!(115), dec!(120)]
            .iter()
            .enumerate()
            .map(|(i, &s)| contract(s, &format!("c{i}"), OptionKind::Call))
            .collect();
        let puts: Vec<Instrument> = [dec!(100), dec!(105), dec!(110), dec!(115), dec!(120)]
            .iter()
            .enumerate()
            .map(|(i, &s)| contract(s, &format!("p{i}"), OptionKind::Put))
            .collect();
        StrikeLadder::build("NIFTY", expiry(), &calls, &puts)
    }

    #[test]
    fn atm_picks_nearest_strike() {
        let ladder = sample_ladder();
        // 111 is nearest to 110
        let atm = ladder.atm_index(dec!(111)).unwrap();
        assert_eq!(ladder.calls()[atm].strike, dec!(110));
    }

    #[test]
    fn atm_tie_prefers_lower_strike() {
        let ladder = sample_ladder();
        // 107.5 is equidistant from 105 and 110
        let atm = ladder.atm_index(dec!(107.5)).unwrap();
        assert_eq!(ladder.calls()[atm].strike, dec!(105));
    }

    #[test]
    fn signed_index_clamps_to_none() {
        let ladder = sample_ladder();
        assert!(ladder.call_at(-1).is_none());
        assert!(ladder.call_at(5).is_none());
        assert_eq!(ladder.call_at(0).unwrap().strike, dec!(100));
    }

    #[test]
    fn missing_side_gets_placeholder_rung() {
        // Put side is missing the 110 strike entirely.
        let calls: Vec<Instrument> = [dec!(105), dec!(110), dec!(115)]
            .iter()
            .enumerate()
            .map(|(i, &s)| contract(s, &format!("c{i}"), OptionKind::Call))
            .collect();
        let puts = vec![
            contract(dec!(105), "p0", OptionKind::Put),
            contract(dec!(115), "p1", OptionKind::Put),
        ];
        let ladder = StrikeLadder::build("NIFTY", expiry(), &calls, &puts);

        assert_eq!(ladder.len(), 3);
        let gap = ladder.put_by_strike(dec!(110)).unwrap();
        assert_eq!(gap.strike, dec!(110));
        assert!(!gap.is_tradable());
        // Call side at the same strike is intact.
        assert!(ladder.call_by_strike(dec!(110)).unwrap().is_tradable());
    }

    #[test]
    fn other_expiries_are_filtered_out() {
        let mut far = contract(dec!(110), "far", OptionKind::Call);
        far.expiry = NaiveDate::from_ymd_opt(2025, 10, 28);
        let calls = vec![contract(dec!(105), "c0", OptionKind::Call), far];
        let ladder = StrikeLadder::build("NIFTY", expiry(), &calls, &[]);
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder.calls()[0].strike, dec!(105));
    }

    #[test]
    fn empty_ladder_has_no_atm() {
        let ladder = StrikeLadder::build("NIFTY", expiry(), &[], &[]);
        assert!(ladder.is_empty());
        assert!(ladder.atm_index(dec!(100)).is_none());
    }
}
