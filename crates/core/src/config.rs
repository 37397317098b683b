use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub strikes: StrikeConfig,
    pub risk: RiskConfig,
    pub instruments: InstrumentsConfig,
}

/// Transport tuning for one broker session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub endpoint: String,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Quiet window before a burst of subscription changes is reconciled.
    pub debounce_ms: u64,
    /// Cap on control frames queued while disconnected.
    pub pending_queue_cap: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8765".to_string(),
            initial_reconnect_delay_ms: 1000,
            max_reconnect_attempts: 5,
            debounce_ms: 300,
            pending_queue_cap: 64,
        }
    }
}

/// Leg selection relative to the at-the-money strike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrikeConfig {
    /// Strikes below ATM for the call leg (`atm_index - call_offset`).
    pub call_offset: i32,
    /// Strikes above ATM for the put leg (`atm_index + put_offset`).
    pub put_offset: i32,
    /// Which expiry in the ascending expiry list to select by default.
    pub expiry_offset: usize,
    /// Keep both legs pinned to one shared strike price.
    pub lock_legs: bool,
}

impl Default for StrikeConfig {
    fn default() -> Self {
        Self {
            call_offset: 0,
            put_offset: 0,
            expiry_offset: 0,
            lock_legs: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskMode {
    #[serde(rename = "amount")]
    Amount,
    #[serde(rename = "percentage")]
    Percent,
}

/// Protective action to take on a threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectiveKind {
    #[serde(rename = "close")]
    CloseAll,
    #[serde(rename = "killSwitch")]
    KillSwitch,
}

/// User-editable risk limits. Read-only to the engine; the session
/// receives replacements whole via command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub enabled: bool,
    pub mode: RiskMode,
    /// Loss limit: an absolute amount or a percentage of capital,
    /// depending on `mode`. Always positive.
    pub risk_threshold: Decimal,
    /// Profit target, same unit as `risk_threshold`.
    pub target_threshold: Decimal,
    pub on_risk: ProtectiveKind,
    pub on_target: ProtectiveKind,
    /// Kill switch when traded value exceeds usable capital.
    pub overtrade_guard: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: RiskMode::Amount,
            risk_threshold: Decimal::ZERO,
            target_threshold: Decimal::ZERO,
            on_risk: ProtectiveKind::CloseAll,
            on_target: ProtectiveKind::CloseAll,
            overtrade_guard: false,
        }
    }
}

/// Instrument-master collaborator endpoint plus the tradable underlyings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentsConfig {
    pub base_url: String,
    pub underlyings: Vec<UnderlyingSpec>,
}

/// One master symbol the dashboard can track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingSpec {
    pub symbol: String,
    pub exchange: crate::broker::Exchange,
    /// Security id of the index itself on the cash segment.
    pub security_id: String,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        use crate::broker::Exchange;
        let spec = |symbol: &str, exchange, security_id: &str| UnderlyingSpec {
            symbol: symbol.to_string(),
            exchange,
            security_id: security_id.to_string(),
        };
        Self {
            base_url: "http://localhost:3000".to_string(),
            underlyings: vec![
                spec("NIFTY", Exchange::Nse, "26000"),
                spec("BANKNIFTY", Exchange::Nse, "26009"),
                spec("FINNIFTY", Exchange::Nse, "26037"),
                spec("MIDCPNIFTY", Exchange::Nse, "26074"),
                spec("SENSEX", Exchange::Bse, "1"),
                spec("BANKEX", Exchange::Bse, "12"),
            ],
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging defaults, TOML, and environment
    /// variables (`OPTDESK_` prefix, `__` as section separator).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml")
    }

    /// Loads configuration from a specific TOML path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("OPTDESK_").split("__"))
            .extract()?;

        Ok(config)
    }
}
