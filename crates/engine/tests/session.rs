//! End-to-end session behavior over a scripted transport: subscribe
//! ordering, debounce coalescing, reconnect recovery, and protective
//! actions.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio::time::sleep;

use optdesk_core::broker::{Broker, Exchange};
use optdesk_core::config::{AppConfig, RiskConfig, RiskMode, UnderlyingSpec};
use optdesk_core::types::{ExchangeSegment, FundLimits, InstrumentId, Position};
use optdesk_engine::{ProtectiveActions, Session, SessionCommand, SessionHandle};
use optdesk_feed::instruments::{InstrumentMaster, StrikeRow, SymbolData};
use optdesk_feed::transport::Transport;

/// Feed event script: `Some(text)` is an inbound frame, `None` drops the
/// connection once.
type FeedEvent = Option<String>;

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<FeedEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    connects: Arc<AtomicU32>,
    failing_connects: Arc<AtomicU32>,
    failing_sends: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<()> {
        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("broken pipe"));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_text(&mut self) -> Result<Option<String>> {
        match self.inbound.recv().await {
            Some(Some(text)) => Ok(Some(text)),
            Some(None) | None => Ok(None),
        }
    }

    async fn close(&mut self) {}
}

struct MockMaster {
    data: SymbolData,
}

#[async_trait]
impl InstrumentMaster for MockMaster {
    async fn fetch(&self, _segment: ExchangeSegment, _underlying: &str) -> Result<SymbolData> {
        Ok(self.data.clone())
    }
}

#[derive(Default)]
struct RecordingActions {
    closes: AtomicU32,
    kills: AtomicU32,
}

#[async_trait]
impl ProtectiveActions for RecordingActions {
    async fn close_all_positions(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn engage_kill_switch(&self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    handle: SessionHandle,
    feed: mpsc::UnboundedSender<FeedEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    connects: Arc<AtomicU32>,
    failing_connects: Arc<AtomicU32>,
    failing_sends: Arc<AtomicBool>,
    actions: Arc<RecordingActions>,
}

impl Harness {
    fn spawn(config: AppConfig) -> Self {
        let (feed, inbound) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connects = Arc::new(AtomicU32::new(0));
        let failing_connects = Arc::new(AtomicU32::new(0));
        let failing_sends = Arc::new(AtomicBool::new(false));
        let actions = Arc::new(RecordingActions::default());

        let transport = MockTransport {
            inbound,
            sent: sent.clone(),
            connects: connects.clone(),
            failing_connects: failing_connects.clone(),
            failing_sends: failing_sends.clone(),
        };
        let master = MockMaster {
            data: symbol_data(),
        };
        let (session, handle) = Session::new(
            &config,
            Broker::Flattrade,
            transport,
            master,
            actions.clone(),
        );
        tokio::spawn(session.run());

        Self {
            handle,
            feed,
            sent,
            connects,
            failing_connects,
            failing_sends,
            actions,
        }
    }

    fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn tick(&self, tk: &str, lp: &str) {
        self.feed
            .send(Some(format!(r#"{{"tk":"{tk}","lp":"{lp}"}}"#)))
            .unwrap();
    }

    fn drop_connection(&self) {
        self.feed.send(None).unwrap();
    }
}

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 30).unwrap()
}

fn symbol_data() -> SymbolData {
    let row = |strike: i64, side: char| StrikeRow {
        strike_price: Decimal::from(strike),
        expiry_date: expiry(),
        security_id: Some(format!("{side}{strike}")),
        trading_symbol: Some(format!("NIFTY30SEP25{side}{strike}")),
    };
    SymbolData {
        expiry_dates: vec![expiry()],
        call_strikes: vec![row(23400, 'c'), row(23500, 'c'), row(23600, 'c')],
        put_strikes: vec![row(23400, 'p'), row(23500, 'p'), row(23600, 'p')],
    }
}

fn nifty() -> UnderlyingSpec {
    UnderlyingSpec {
        symbol: "NIFTY".to_string(),
        exchange: Exchange::Nse,
        security_id: "26000".to_string(),
    }
}

async fn connect_and_select(harness: &Harness) {
    harness.handle.send(SessionCommand::Connect).await.unwrap();
    harness
        .handle
        .send(SessionCommand::SetMasterSymbol(nifty()))
        .await
        .unwrap();
    // Past the debounce window: master subscription goes out.
    sleep(Duration::from_millis(350)).await;
    // First master tick derives the legs; second debounce subscribes them.
    harness.tick("26000", "23520");
    sleep(Duration::from_millis(350)).await;
}

#[tokio::test(start_paused = true)]
async fn master_selection_subscribes_index_then_legs() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    let frames = harness.sent_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[0],
        r#"{"action":"subscribe","symbols":["NSE|26000"]}"#
    );
    // ATM at 23500 with zero offsets.
    assert_eq!(
        frames[1],
        r#"{"action":"subscribe","symbols":["NFO|c23500","NFO|p23500"]}"#
    );
}

#[tokio::test(start_paused = true)]
async fn leg_change_unsubscribes_before_subscribing() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    harness
        .handle
        .send(SessionCommand::SetOffsets { call: 1, put: 1 })
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;

    let frames = harness.sent_frames();
    assert_eq!(frames.len(), 4);
    assert_eq!(
        frames[2],
        r#"{"action":"unsubscribe","symbols":["NFO|c23500","NFO|p23500"]}"#
    );
    assert_eq!(
        frames[3],
        r#"{"action":"subscribe","symbols":["NFO|c23400","NFO|p23600"]}"#
    );
}

#[tokio::test(start_paused = true)]
async fn debounce_coalesces_a_burst_of_changes() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;
    let before = harness.sent_frames().len();

    // Offsets then expiry back-to-back: one reconcile pass, not two.
    harness
        .handle
        .send(SessionCommand::SetOffsets { call: 1, put: 1 })
        .await
        .unwrap();
    harness
        .handle
        .send(SessionCommand::SetExpiry(expiry()))
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;

    let frames = harness.sent_frames();
    assert_eq!(frames.len() - before, 2);
    assert!(frames[before].contains("unsubscribe"));
    assert!(frames[before + 1].contains(r#""action":"subscribe""#));
}

#[tokio::test(start_paused = true)]
async fn spot_drift_does_not_chase_the_selection() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;
    let before = harness.sent_frames().len();

    // A large move, but both legs are already selected.
    harness.tick("26000", "23610");
    sleep(Duration::from_millis(350)).await;

    assert_eq!(harness.sent_frames().len(), before);
}

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_the_full_set() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;
    assert_eq!(harness.connects.load(Ordering::SeqCst), 1);

    harness.drop_connection();
    // First backoff delay is one second.
    sleep(Duration::from_millis(1100)).await;

    assert!(harness.connects.load(Ordering::SeqCst) >= 2);
    let frames = harness.sent_frames();
    let last = frames.last().unwrap();
    assert!(last.contains("subscribe"));
    assert!(last.contains("NSE|26000"));
    assert!(last.contains("NFO|c23500"));
    assert!(last.contains("NFO|p23500"));
}

#[tokio::test(start_paused = true)]
async fn failed_send_schedules_reconnect_with_backoff() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;
    assert_eq!(harness.connects.load(Ordering::SeqCst), 1);

    // The socket breaks for writes only: the next reconcile's send fails
    // without the stream ever delivering a close.
    harness.failing_sends.store(true, Ordering::SeqCst);
    harness
        .handle
        .send(SessionCommand::SetOffsets { call: 1, put: 1 })
        .await
        .unwrap();
    sleep(Duration::from_millis(400)).await;
    assert_eq!(harness.connects.load(Ordering::SeqCst), 1);

    // The failure must have scheduled the backoff timer (one second for
    // the first attempt), after which the full set is resubscribed.
    harness.failing_sends.store(false, Ordering::SeqCst);
    sleep(Duration::from_millis(1100)).await;

    assert_eq!(harness.connects.load(Ordering::SeqCst), 2);
    let frames = harness.sent_frames();
    let last = frames.last().unwrap();
    assert!(last.contains(r#""action":"subscribe""#));
    assert!(last.contains("NSE|26000"));
    assert!(last.contains("NFO|c23400"));
    assert!(last.contains("NFO|p23600"));
}

#[tokio::test(start_paused = true)]
async fn manual_connect_recovers_after_exhausted_backoff() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    harness.failing_connects.store(u32::MAX, Ordering::SeqCst);
    harness.drop_connection();
    // 1 + 2 + 4 + 8 + 16 seconds of backoff, then the budget is spent.
    sleep(Duration::from_secs(40)).await;
    let exhausted_connects = harness.connects.load(Ordering::SeqCst);
    assert_eq!(exhausted_connects, 6);

    // No timer left: more waiting changes nothing.
    sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.connects.load(Ordering::SeqCst), exhausted_connects);

    // An explicit connect resets the budget and resubscribes.
    harness.failing_connects.store(0, Ordering::SeqCst);
    harness.handle.send(SessionCommand::Connect).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.connects.load(Ordering::SeqCst), exhausted_connects + 1);
    let frames = harness.sent_frames();
    assert!(frames.last().unwrap().contains("NSE|26000"));
}

#[tokio::test(start_paused = true)]
async fn enabling_leg_lock_realigns_and_resubscribes() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    // Push the put one strike out, then lock the legs together.
    harness
        .handle
        .send(SessionCommand::SetOffsets { call: 0, put: 1 })
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;

    harness
        .handle
        .send(SessionCommand::SetLockLegs(true))
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;

    let frames = harness.sent_frames();
    assert_eq!(
        frames[frames.len() - 2],
        r#"{"action":"unsubscribe","symbols":["NFO|p23600"]}"#
    );
    assert_eq!(
        frames[frames.len() - 1],
        r#"{"action":"subscribe","symbols":["NFO|p23500"]}"#
    );
}

fn open_position(tsym: &str, security_id: &str, net_qty: Decimal, avg: Decimal) -> Position {
    Position {
        trading_symbol: tsym.to_string(),
        security_id: Some(InstrumentId::new(ExchangeSegment::Nfo, security_id)),
        net_qty,
        avg_price: avg,
        last_price: None,
        multiplier: Decimal::ONE,
        day_buy_value: Decimal::ZERO,
        day_sell_value: Decimal::ZERO,
        realized_pnl: Decimal::ZERO,
    }
}

#[tokio::test(start_paused = true)]
async fn risk_breach_closes_positions_exactly_once() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    harness
        .handle
        .send(SessionCommand::SetRiskConfig(RiskConfig {
            enabled: true,
            mode: RiskMode::Amount,
            risk_threshold: dec!(1000),
            ..RiskConfig::default()
        }))
        .await
        .unwrap();
    harness
        .handle
        .send(SessionCommand::PositionsUpdate(vec![open_position(
            "NIFTY30SEP25C23500",
            "c23500",
            dec!(100),
            dec!(100),
        )]))
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;

    // -500: within limits.
    harness.tick("c23500", "95");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.actions.closes.load(Ordering::SeqCst), 0);

    // -1500 then -2000: one crossing, one action.
    harness.tick("c23500", "85");
    harness.tick("c23500", "80");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.actions.closes.load(Ordering::SeqCst), 1);
    assert_eq!(harness.actions.kills.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn book_update_alone_can_cross_a_threshold() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    harness
        .handle
        .send(SessionCommand::SetRiskConfig(RiskConfig {
            enabled: true,
            mode: RiskMode::Amount,
            risk_threshold: dec!(1000),
            ..RiskConfig::default()
        }))
        .await
        .unwrap();

    // Realized loss lands with the position book; no tick in between.
    let mut flat = open_position("NIFTY30SEP25C23500", "c23500", dec!(0), dec!(100));
    flat.realized_pnl = dec!(-1500);
    harness
        .handle
        .send(SessionCommand::PositionsUpdate(vec![flat]))
        .await
        .unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.actions.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn overtrade_guard_engages_kill_switch() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    harness
        .handle
        .send(SessionCommand::SetRiskConfig(RiskConfig {
            overtrade_guard: true,
            ..RiskConfig::default()
        }))
        .await
        .unwrap();
    harness
        .handle
        .send(SessionCommand::FundsUpdate(FundLimits {
            cash: dec!(50000),
            ..FundLimits::default()
        }))
        .await
        .unwrap();

    let mut overtraded = open_position("NIFTY30SEP25C23500", "c23500", dec!(0), dec!(100));
    overtraded.day_buy_value = dec!(80000);
    harness
        .handle
        .send(SessionCommand::PositionsUpdate(vec![overtraded.clone()]))
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;
    assert_eq!(harness.actions.kills.load(Ordering::SeqCst), 1);

    // Still breached on the next update: latched, no second toggle.
    harness
        .handle
        .send(SessionCommand::PositionsUpdate(vec![overtraded]))
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;
    assert_eq!(harness.actions.kills.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn position_instruments_are_subscribed() {
    let harness = Harness::spawn(AppConfig::default());
    connect_and_select(&harness).await;

    // A position on an instrument outside the selected legs.
    harness
        .handle
        .send(SessionCommand::PositionsUpdate(vec![open_position(
            "NIFTY30SEP25P23400",
            "p23400",
            dec!(-50),
            dec!(120),
        )]))
        .await
        .unwrap();
    sleep(Duration::from_millis(350)).await;

    let frames = harness.sent_frames();
    assert_eq!(
        frames.last().unwrap(),
        r#"{"action":"subscribe","symbols":["NFO|p23400"]}"#
    );
}
