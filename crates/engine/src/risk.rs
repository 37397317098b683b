//! Account-level risk monitoring: P&L thresholds and the overtrade guard.

use std::collections::HashMap;

use rust_decimal::Decimal;

use optdesk_core::config::{ProtectiveKind, RiskConfig, RiskMode};
use optdesk_core::types::{FundLimits, Position};

/// Why a protective action fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Risk,
    Target,
    Overtrade,
}

/// A protective decision the session hands to its action collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveAction {
    pub kind: ProtectiveKind,
    pub reason: TriggerReason,
}

/// Mark-to-market P&L across the position book.
///
/// Each position is valued at its live last-traded price when one has
/// arrived, falling back to the price carried by the position book
/// itself. A position with neither contributes only its realized P&L.
#[must_use]
pub fn total_profit(positions: &[Position], ltps: &HashMap<String, Decimal>) -> Decimal {
    positions
        .iter()
        .map(|p| {
            let unrealized = ltps
                .get(&p.trading_symbol)
                .copied()
                .or(p.last_price)
                .map_or(Decimal::ZERO, |ltp| {
                    p.net_qty * (ltp - p.avg_price) * p.multiplier
                });
            unrealized + p.realized_pnl
        })
        .sum()
}

/// True when the day's traded value exceeds the usable capital base.
///
/// Buy and sell legs are compared separately so that a round trip is not
/// double counted.
#[must_use]
pub fn overtrade_breached(positions: &[Position], funds: &FundLimits) -> bool {
    let buy: Decimal = positions.iter().map(|p| p.day_buy_value).sum();
    let sell: Decimal = positions.iter().map(|p| p.day_sell_value).sum();
    buy.max(sell) > funds.total_capital()
}

/// Edge-triggered watcher over the P&L thresholds and the overtrade
/// guard. Each breach fires its protective action exactly once; the
/// latch releases when the level recovers to the safe side, so a later
/// re-crossing fires again.
#[derive(Debug, Default)]
pub struct RiskMonitor {
    in_risk: bool,
    in_target: bool,
    in_overtrade: bool,
}

impl RiskMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One evaluation pass against the current book, prices, and funds.
    ///
    /// Disabled config resets the latches and decides nothing, so
    /// re-enabling behaves like a fresh start. A threshold of zero (or
    /// below) leaves that side inactive. When both sides breach at once
    /// the loss side wins.
    pub fn evaluate(
        &mut self,
        positions: &[Position],
        ltps: &HashMap<String, Decimal>,
        funds: &FundLimits,
        config: &RiskConfig,
    ) -> Option<ProtectiveAction> {
        if !config.enabled {
            self.in_risk = false;
            self.in_target = false;
            return None;
        }

        let profit = total_profit(positions, ltps);
        let measured = match config.mode {
            RiskMode::Amount => Some(profit),
            RiskMode::Percent => {
                let capital = funds.total_capital();
                if capital > Decimal::ZERO {
                    Some(profit / capital * Decimal::ONE_HUNDRED)
                } else {
                    None
                }
            }
        };
        let Some(measured) = measured else {
            return None;
        };

        let risk_hit =
            config.risk_threshold > Decimal::ZERO && measured <= -config.risk_threshold;
        let target_hit =
            config.target_threshold > Decimal::ZERO && measured >= config.target_threshold;

        let fired = if risk_hit && !self.in_risk {
            tracing::warn!(
                profit = %profit,
                measured = %measured,
                threshold = %config.risk_threshold,
                "Risk threshold breached"
            );
            Some(ProtectiveAction {
                kind: config.on_risk,
                reason: TriggerReason::Risk,
            })
        } else if target_hit && !risk_hit && !self.in_target {
            tracing::info!(
                profit = %profit,
                measured = %measured,
                threshold = %config.target_threshold,
                "Profit target reached"
            );
            Some(ProtectiveAction {
                kind: config.on_target,
                reason: TriggerReason::Target,
            })
        } else {
            None
        };

        self.in_risk = risk_hit;
        self.in_target = target_hit;
        fired
    }

    /// Overtrade pass, run when the position book or funds change rather
    /// than on every tick. Always forces the kill switch.
    pub fn check_overtrade(
        &mut self,
        positions: &[Position],
        funds: &FundLimits,
        config: &RiskConfig,
    ) -> Option<ProtectiveAction> {
        if !config.overtrade_guard {
            self.in_overtrade = false;
            return None;
        }

        let breached = overtrade_breached(positions, funds);
        let fired = if breached && !self.in_overtrade {
            tracing::warn!(capital = %funds.total_capital(), "Overtrade limit breached");
            Some(ProtectiveAction {
                kind: ProtectiveKind::KillSwitch,
                reason: TriggerReason::Overtrade,
            })
        } else {
            None
        };
        self.in_overtrade = breached;
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(tsym: &str, net_qty: Decimal, avg: Decimal) -> Position {
        Position {
            trading_symbol: tsym.to_string(),
            security_id: None,
            net_qty,
            avg_price: avg,
            last_price: None,
            multiplier: Decimal::ONE,
            day_buy_value: Decimal::ZERO,
            day_sell_value: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    fn amount_config(risk: Decimal, target: Decimal) -> RiskConfig {
        RiskConfig {
            enabled: true,
            mode: RiskMode::Amount,
            risk_threshold: risk,
            target_threshold: target,
            ..RiskConfig::default()
        }
    }

    #[test]
    fn profit_uses_live_price_with_book_fallback() {
        let mut long = position("SYM_A", dec!(50), dec!(100));
        long.last_price = Some(dec!(102));
        long.realized_pnl = dec!(75);
        let short = position("SYM_B", dec!(-25), dec!(40));

        let mut ltps = HashMap::new();
        ltps.insert("SYM_B".to_string(), dec!(38));

        // A from book price: 50*(102-100)+75; B from live tick: -25*(38-40).
        assert_eq!(total_profit(&[long, short], &ltps), dec!(225));
    }

    #[test]
    fn position_without_any_price_contributes_realized_only() {
        let mut p = position("SYM_A", dec!(50), dec!(100));
        p.realized_pnl = dec!(-30);
        assert_eq!(total_profit(&[p], &HashMap::new()), dec!(-30));
    }

    #[test]
    fn risk_fires_once_per_crossing() {
        let mut monitor = RiskMonitor::new();
        let config = amount_config(dec!(1000), dec!(0));
        let funds = FundLimits::default();
        let mut ltps = HashMap::new();

        let mut p = position("SYM_A", dec!(100), dec!(100));
        p.last_price = Some(dec!(95));
        let book = vec![p];

        // -500: below the limit, nothing fires.
        assert!(monitor.evaluate(&book, &ltps, &funds, &config).is_none());

        // -1200: crossing fires exactly once.
        ltps.insert("SYM_A".to_string(), dec!(88));
        let action = monitor.evaluate(&book, &ltps, &funds, &config).unwrap();
        assert_eq!(action.reason, TriggerReason::Risk);
        assert_eq!(action.kind, ProtectiveKind::CloseAll);

        // Still underwater: latched, no re-fire.
        ltps.insert("SYM_A".to_string(), dec!(85));
        assert!(monitor.evaluate(&book, &ltps, &funds, &config).is_none());

        // Recovery then a second crossing fires again.
        ltps.insert("SYM_A".to_string(), dec!(99));
        assert!(monitor.evaluate(&book, &ltps, &funds, &config).is_none());
        ltps.insert("SYM_A".to_string(), dec!(80));
        assert!(monitor.evaluate(&book, &ltps, &funds, &config).is_some());
    }

    #[test]
    fn percentage_mode_measures_against_capital() {
        let mut monitor = RiskMonitor::new();
        let config = RiskConfig {
            mode: RiskMode::Percent,
            risk_threshold: dec!(2),
            ..amount_config(dec!(2), dec!(0))
        };
        let funds = FundLimits {
            cash: dec!(100000),
            ..FundLimits::default()
        };
        let mut ltps = HashMap::new();

        let book = vec![position("SYM_A", dec!(500), dec!(100))];

        // -1000 is 1% of capital: safe.
        ltps.insert("SYM_A".to_string(), dec!(98));
        assert!(monitor.evaluate(&book, &ltps, &funds, &config).is_none());

        // -2500 is 2.5%: fires once.
        ltps.insert("SYM_A".to_string(), dec!(95));
        assert!(monitor.evaluate(&book, &ltps, &funds, &config).is_some());
        assert!(monitor.evaluate(&book, &ltps, &funds, &config).is_none());
    }

    #[test]
    fn percentage_mode_with_no_capital_decides_nothing() {
        let mut monitor = RiskMonitor::new();
        let config = RiskConfig {
            mode: RiskMode::Percent,
            ..amount_config(dec!(2), dec!(2))
        };
        let mut p = position("SYM_A", dec!(100), dec!(100));
        p.last_price = Some(dec!(50));
        let outcome = monitor.evaluate(&[p], &HashMap::new(), &FundLimits::default(), &config);
        assert!(outcome.is_none());
    }

    #[test]
    fn target_respects_configured_action_and_loss_priority() {
        let mut monitor = RiskMonitor::new();
        let mut config = amount_config(dec!(1000), dec!(500));
        config.on_target = ProtectiveKind::KillSwitch;
        let funds = FundLimits::default();

        let mut p = position("SYM_A", dec!(10), dec!(100));
        p.last_price = Some(dec!(160));
        let action = monitor
            .evaluate(&[p], &HashMap::new(), &funds, &config)
            .unwrap();
        assert_eq!(action.reason, TriggerReason::Target);
        assert_eq!(action.kind, ProtectiveKind::KillSwitch);
    }

    #[test]
    fn zero_threshold_side_is_inactive() {
        let mut monitor = RiskMonitor::new();
        let config = amount_config(dec!(0), dec!(0));
        let mut p = position("SYM_A", dec!(100), dec!(100));
        p.last_price = Some(dec!(10));
        let outcome = monitor.evaluate(&[p], &HashMap::new(), &FundLimits::default(), &config);
        assert!(outcome.is_none());
    }

    #[test]
    fn disabling_resets_latches() {
        let mut monitor = RiskMonitor::new();
        let mut config = amount_config(dec!(100), dec!(0));
        let funds = FundLimits::default();
        let mut p = position("SYM_A", dec!(100), dec!(100));
        p.last_price = Some(dec!(90));
        let book = vec![p];

        assert!(monitor
            .evaluate(&book, &HashMap::new(), &funds, &config)
            .is_some());

        // Toggle off and back on while still in breach: fires anew.
        config.enabled = false;
        assert!(monitor
            .evaluate(&book, &HashMap::new(), &funds, &config)
            .is_none());
        config.enabled = true;
        assert!(monitor
            .evaluate(&book, &HashMap::new(), &funds, &config)
            .is_some());
    }

    #[test]
    fn overtrade_compares_larger_side_to_capital() {
        let funds = FundLimits {
            cash: dec!(50000),
            ..FundLimits::default()
        };
        let mut p = position("SYM_A", dec!(0), dec!(100));
        p.day_buy_value = dec!(30000);
        p.day_sell_value = dec!(60000);

        assert!(overtrade_breached(&[p.clone()], &funds));
        p.day_sell_value = dec!(45000);
        assert!(!overtrade_breached(&[p], &funds));
    }

    #[test]
    fn overtrade_guard_latches_like_thresholds() {
        let mut monitor = RiskMonitor::new();
        let config = RiskConfig {
            overtrade_guard: true,
            ..RiskConfig::default()
        };
        let funds = FundLimits {
            cash: dec!(10000),
            ..FundLimits::default()
        };
        let mut p = position("SYM_A", dec!(0), dec!(100));
        p.day_buy_value = dec!(15000);
        let book = vec![p];

        let action = monitor.check_overtrade(&book, &funds, &config).unwrap();
        assert_eq!(action.kind, ProtectiveKind::KillSwitch);
        assert_eq!(action.reason, TriggerReason::Overtrade);
        assert!(monitor.check_overtrade(&book, &funds, &config).is_none());
    }
}
