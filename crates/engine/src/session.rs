//! The session actor: one task owning connection, prices, selection,
//! subscriptions, and risk for a single broker.
//!
//! Commands arrive over an mpsc channel; inbound feed frames, the
//! reconnect timer, and the reconcile debounce timer are further
//! branches of the same select loop, so every piece of session state is
//! mutated from exactly one place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::Instant;

use optdesk_core::broker::Broker;
use optdesk_core::config::{AppConfig, ProtectiveKind, RiskConfig, UnderlyingSpec};
use optdesk_core::ladder::StrikeLadder;
use optdesk_core::types::{ExchangeSegment, FundLimits, InstrumentId, OptionKind, Position};
use optdesk_feed::connection::ConnectionManager;
use optdesk_feed::instruments::{InstrumentMaster, SymbolData};
use optdesk_feed::message::{ControlMessage, TickMessage};
use optdesk_feed::prices::PriceStore;
use optdesk_feed::transport::Transport;

use crate::risk::{ProtectiveAction, RiskMonitor};
use crate::strikes::StrikeSynchronizer;
use crate::subscriptions::{reconcile, DesiredSubscriptions, SubscriptionState};

/// Collaborator that executes protective decisions. Implemented against
/// the broker's order API; tests record invocations.
#[async_trait]
pub trait ProtectiveActions: Send + Sync {
    /// Flatten every open position at market.
    async fn close_all_positions(&self) -> Result<()>;

    /// Engage the account kill switch, blocking further entries.
    async fn engage_kill_switch(&self) -> Result<()>;
}

/// External inputs to the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Explicit connect request. Also recovers from an exhausted
    /// reconnect budget.
    Connect,
    SetMasterSymbol(UnderlyingSpec),
    SetExpiry(NaiveDate),
    SetOffsets { call: i32, put: i32 },
    SetLockLegs(bool),
    PickStrike { kind: OptionKind, strike: Decimal },
    PositionsUpdate(Vec<Position>),
    FundsUpdate(FundLimits),
    SetRiskConfig(RiskConfig),
    Shutdown,
}

/// Cloneable sender half for driving a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// # Errors
    ///
    /// Returns an error when the session task has stopped.
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("session task stopped"))
    }

    /// # Errors
    ///
    /// Returns an error when the session task has already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
            .await
            .context("shutdown request not delivered")
    }
}

enum Step {
    Command(SessionCommand),
    Frame(String),
    Dropped,
    Reconnect,
    Reconcile,
    Shutdown,
}

pub struct Session<T: Transport, M: InstrumentMaster> {
    commands: mpsc::Receiver<SessionCommand>,
    conn: ConnectionManager<T>,
    instrument_master: M,
    actions: Arc<dyn ProtectiveActions>,

    broker: Broker,
    underlying: Option<UnderlyingSpec>,
    derivatives_segment: Option<ExchangeSegment>,
    symbol_data: Option<SymbolData>,
    expiry: Option<NaiveDate>,
    ladder: Option<StrikeLadder>,

    prices: PriceStore,
    strikes: StrikeSynchronizer,
    subscriptions: SubscriptionState,
    positions: Vec<Position>,
    funds: FundLimits,
    risk_config: RiskConfig,
    monitor: RiskMonitor,

    debounce: Duration,
    debounce_at: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl<T: Transport, M: InstrumentMaster> Session<T, M> {
    pub fn new(
        config: &AppConfig,
        broker: Broker,
        transport: T,
        instrument_master: M,
        actions: Arc<dyn ProtectiveActions>,
    ) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::channel(32);
        let conn = ConnectionManager::new(
            transport,
            Duration::from_millis(config.feed.initial_reconnect_delay_ms),
            config.feed.max_reconnect_attempts,
            config.feed.pending_queue_cap,
        );
        let session = Self {
            commands,
            conn,
            instrument_master,
            actions,
            broker,
            underlying: None,
            derivatives_segment: None,
            symbol_data: None,
            expiry: None,
            ladder: None,
            prices: PriceStore::new(),
            strikes: StrikeSynchronizer::new(config.strikes.clone()),
            subscriptions: SubscriptionState::default(),
            positions: Vec::new(),
            funds: FundLimits::default(),
            risk_config: config.risk.clone(),
            monitor: RiskMonitor::new(),
            debounce: Duration::from_millis(config.feed.debounce_ms),
            debounce_at: None,
            reconnect_at: None,
        };
        (session, SessionHandle { tx })
    }

    /// Event loop. Runs until `Shutdown` or until every handle is
    /// dropped.
    pub async fn run(mut self) {
        tracing::info!(broker = %self.broker, "Session started");
        loop {
            let connected = self.conn.is_connected();
            let reconnect_at = self.reconnect_at;
            let debounce_at = self.debounce_at;
            let now = Instant::now;

            // Disjoint field borrows: the select arms may not touch
            // `self` as a whole.
            let Self { commands, conn, .. } = &mut self;
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Shutdown,
                },
                frame = conn.recv(), if connected => match frame {
                    Some(text) => Step::Frame(text),
                    None => Step::Dropped,
                },
                () = tokio::time::sleep_until(reconnect_at.unwrap_or_else(now)),
                    if reconnect_at.is_some() => Step::Reconnect,
                () = tokio::time::sleep_until(debounce_at.unwrap_or_else(now)),
                    if debounce_at.is_some() => Step::Reconcile,
            };

            match step {
                Step::Command(SessionCommand::Shutdown) | Step::Shutdown => break,
                Step::Command(command) => self.on_command(command).await,
                Step::Frame(text) => self.on_frame(&text),
                Step::Dropped => self.schedule_reconnect(),
                Step::Reconnect => {
                    self.reconnect_at = None;
                    self.try_connect().await;
                }
                Step::Reconcile => {
                    self.debounce_at = None;
                    self.reconcile_now().await;
                }
            }
        }
        self.conn.close().await;
        tracing::info!(broker = %self.broker, "Session stopped");
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => {
                self.reconnect_at = None;
                self.conn.reset_backoff();
                self.try_connect().await;
            }
            SessionCommand::SetMasterSymbol(spec) => self.set_master_symbol(spec).await,
            SessionCommand::SetExpiry(expiry) => {
                self.expiry = Some(expiry);
                self.rebuild_ladder();
                self.sync_strikes(true);
                self.schedule_reconcile();
            }
            SessionCommand::SetOffsets { call, put } => {
                self.strikes.set_offsets(call, put);
                self.sync_strikes(true);
                self.schedule_reconcile();
            }
            SessionCommand::SetLockLegs(lock) => {
                self.strikes.set_lock_legs(lock);
                let realigned = match &self.ladder {
                    Some(ladder) => self.strikes.align_locked_legs(ladder),
                    None => false,
                };
                if realigned {
                    self.schedule_reconcile();
                }
            }
            SessionCommand::PickStrike { kind, strike } => {
                let changed = match (&self.ladder, kind) {
                    (Some(ladder), OptionKind::Call) => self.strikes.pick_call(strike, ladder),
                    (Some(ladder), OptionKind::Put) => self.strikes.pick_put(strike, ladder),
                    (Some(_), OptionKind::Underlying) | (None, _) => {
                        tracing::warn!(%strike, ?kind, "Strike pick ignored");
                        false
                    }
                };
                if changed {
                    self.schedule_reconcile();
                }
            }
            SessionCommand::PositionsUpdate(positions) => {
                self.positions = positions;
                self.prices.retain_position_ltps(|symbol| {
                    self.positions.iter().any(|p| p.trading_symbol == symbol)
                });
                self.schedule_reconcile();
                self.run_overtrade_guard();
                self.run_risk_pass();
            }
            SessionCommand::FundsUpdate(funds) => {
                self.funds = funds;
                self.run_overtrade_guard();
                self.run_risk_pass();
            }
            SessionCommand::SetRiskConfig(config) => self.risk_config = config,
            SessionCommand::Shutdown => {}
        }
    }

    async fn set_master_symbol(&mut self, spec: UnderlyingSpec) {
        let segment = match self.broker.profile().derivatives_segment(spec.exchange) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::error!(error = %e, symbol = %spec.symbol, "Master symbol rejected");
                return;
            }
        };

        let data = match self
            .instrument_master
            .fetch(segment, &spec.symbol)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, symbol = %spec.symbol, "Instrument master fetch failed");
                return;
            }
        };

        self.strikes.clear();
        self.derivatives_segment = Some(segment);
        self.expiry = data.expiry_at_offset(self.strikes.config().expiry_offset);
        self.underlying = Some(spec);
        self.symbol_data = Some(data);
        self.rebuild_ladder();
        self.sync_strikes(true);
        self.schedule_reconcile();
    }

    fn rebuild_ladder(&mut self) {
        self.ladder = match (&self.symbol_data, &self.underlying, self.expiry) {
            (Some(data), Some(spec), Some(expiry)) => {
                Some(data.ladder_for(&spec.symbol, expiry))
            }
            _ => None,
        };
    }

    /// Re-derive the legs from the current master price; schedules a
    /// reconcile when the selection moved.
    fn sync_strikes(&mut self, force: bool) {
        let Some(price) = self
            .underlying
            .as_ref()
            .and_then(|spec| self.prices.last(&spec.security_id))
        else {
            return;
        };
        let changed = match &self.ladder {
            Some(ladder) => self.strikes.sync(price, ladder, force),
            None => false,
        };
        if changed {
            self.schedule_reconcile();
        }
    }

    fn on_frame(&mut self, text: &str) {
        let Some(tick) = TickMessage::parse(text) else {
            tracing::debug!(frame = text, "Dropping non-tick frame");
            return;
        };
        self.prices.apply(&tick);

        if let Some(price) = tick.lp {
            for position in &self.positions {
                let held = position
                    .security_id
                    .as_ref()
                    .is_some_and(|id| id.security_id == tick.tk);
                if held {
                    self.prices.set_position_ltp(&position.trading_symbol, price);
                }
            }
        }

        let is_master = self
            .underlying
            .as_ref()
            .is_some_and(|spec| spec.security_id == tick.tk);
        if is_master && tick.lp.is_some() {
            self.sync_strikes(false);
        }

        self.run_risk_pass();
    }

    /// P&L threshold pass. Run on every stored tick and whenever the
    /// book or funds change, since realized P&L alone can cross a
    /// threshold without any tick arriving.
    fn run_risk_pass(&mut self) {
        if let Some(action) = self.monitor.evaluate(
            &self.positions,
            self.prices.position_ltps(),
            &self.funds,
            &self.risk_config,
        ) {
            self.dispatch(action);
        }
    }

    fn run_overtrade_guard(&mut self) {
        if let Some(action) =
            self.monitor
                .check_overtrade(&self.positions, &self.funds, &self.risk_config)
        {
            self.dispatch(action);
        }
    }

    /// Hand a protective decision to the collaborator without blocking
    /// the event loop. Failures are logged; the latch in the monitor
    /// already prevents a retry storm.
    fn dispatch(&self, action: ProtectiveAction) {
        let actions = Arc::clone(&self.actions);
        tokio::spawn(async move {
            let outcome = match action.kind {
                ProtectiveKind::CloseAll => actions.close_all_positions().await,
                ProtectiveKind::KillSwitch => actions.engage_kill_switch().await,
            };
            if let Err(e) = outcome {
                tracing::error!(error = %e, reason = ?action.reason, "Protective action failed");
            }
        });
    }

    fn schedule_reconcile(&mut self) {
        self.debounce_at = Some(Instant::now() + self.debounce);
    }

    fn desired_subscriptions(&self) -> DesiredSubscriptions {
        let master = self.underlying.as_ref().map(|spec| {
            InstrumentId::new(spec.exchange.cash_segment(), spec.security_id.clone())
        });
        let (call, put) = match self.derivatives_segment {
            Some(segment) => (
                self.strikes.selection().call_id(segment),
                self.strikes.selection().put_id(segment),
            ),
            None => (None, None),
        };
        let positions: BTreeMap<String, InstrumentId> = self
            .positions
            .iter()
            .filter_map(|p| {
                p.security_id
                    .clone()
                    .map(|id| (p.trading_symbol.clone(), id))
            })
            .collect();
        DesiredSubscriptions {
            master,
            call,
            put,
            positions,
        }
    }

    /// One reconcile pass: unsubscribe first, then subscribe, then commit
    /// the desired set as current. Queued sends still commit; the next
    /// successful connect rebuilds the subscription set from scratch.
    async fn reconcile_now(&mut self) {
        let desired = self.desired_subscriptions();
        let delta = reconcile(&self.subscriptions, &desired);
        if delta.is_empty() {
            return;
        }
        tracing::info!(
            unsubscribe = delta.unsubscribe.len(),
            subscribe = delta.subscribe.len(),
            "Reconciling subscriptions"
        );

        let was_connected = self.conn.is_connected();
        if !delta.unsubscribe.is_empty() {
            for symbol in &delta.unsubscribe {
                if let Some((_, security_id)) = symbol.split_once('|') {
                    self.prices.clear(security_id);
                }
            }
            self.conn
                .send(ControlMessage::unsubscribe(delta.unsubscribe))
                .await;
        }
        if !delta.subscribe.is_empty() {
            self.conn
                .send(ControlMessage::subscribe(delta.subscribe))
                .await;
        }
        self.subscriptions.apply(&desired);

        // A failed send drops the connection into an error state without
        // the receive loop noticing; recover on the same backoff path as
        // a closed stream.
        if was_connected && !self.conn.is_connected() {
            self.schedule_reconnect();
        }
    }

    async fn try_connect(&mut self) {
        match self.conn.connect().await {
            Ok(()) => {
                tracing::info!("Feed connected");
                // A fresh socket has no server-side subscriptions left.
                self.subscriptions = SubscriptionState::default();
                self.debounce_at = None;
                self.reconcile_now().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Feed connect failed");
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.conn.next_backoff() {
            Ok(delay) => {
                tracing::warn!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.conn.reconnect_attempts(),
                    "Scheduling reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconnect budget exhausted, awaiting manual connect");
                self.reconnect_at = None;
            }
        }
    }
}
