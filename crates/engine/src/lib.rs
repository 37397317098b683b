//! Real-time synchronization and risk control for one broker session.
//!
//! The session task reconciles five independently-changing inputs —
//! underlying ticks, strike/expiry selection, broker switches, position
//! updates, and connection state — into one consistent subscription set
//! and one consistent risk decision. All mutation happens on a single
//! event-processing timeline; timers (reconnect backoff, reconcile
//! debounce) are branches of the same loop.

pub mod risk;
pub mod session;
pub mod strikes;
pub mod subscriptions;

pub use risk::{ProtectiveAction, RiskMonitor, TriggerReason};
pub use session::{ProtectiveActions, Session, SessionCommand, SessionHandle};
pub use strikes::{StrikeSelection, StrikeSynchronizer};
pub use subscriptions::{reconcile, DesiredSubscriptions, SubscriptionDelta, SubscriptionState};
