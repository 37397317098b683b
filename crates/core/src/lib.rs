//! Core types, strike ladders, and configuration for the optdesk engine.

pub mod broker;
pub mod config;
pub mod ladder;
pub mod types;

pub use broker::{Broker, BrokerProfile, Exchange, ProfileError};
pub use config::{
    AppConfig, ConfigLoader, FeedConfig, ProtectiveKind, RiskConfig, RiskMode, StrikeConfig,
    UnderlyingSpec,
};
pub use ladder::{LadderEntry, StrikeLadder};
pub use types::{ExchangeSegment, FundLimits, Instrument, InstrumentId, OptionKind, Position};
