//! Subscription reconciliation: current vs desired instrument sets.

use std::collections::BTreeMap;

use optdesk_core::types::InstrumentId;

/// What is actually subscribed right now. Owned by the session, written
/// only after a reconcile pass hands its delta to the connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionState {
    pub master: Option<InstrumentId>,
    pub call: Option<InstrumentId>,
    pub put: Option<InstrumentId>,
    /// Tracked open-position instruments, keyed by trading symbol.
    pub positions: BTreeMap<String, InstrumentId>,
}

impl SubscriptionState {
    /// Commit the desired set as current. Called after the delta is
    /// handed to the transport — also on a soft-failure queue, since a
    /// later reconnect reconciles against an empty state and re-issues
    /// the full desired set (eventual consistency over blocking).
    pub fn apply(&mut self, desired: &DesiredSubscriptions) {
        self.master = desired.master.clone();
        self.call = desired.call.clone();
        self.put = desired.put.clone();
        self.positions = desired.positions.clone();
    }
}

/// What should be subscribed, derived from the user selection and the
/// open position book.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredSubscriptions {
    pub master: Option<InstrumentId>,
    pub call: Option<InstrumentId>,
    pub put: Option<InstrumentId>,
    pub positions: BTreeMap<String, InstrumentId>,
}

/// One reconcile pass: everything to drop and everything to add, each
/// batched into a single control frame. Unsubscribes are sent first to
/// avoid transient double subscriptions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionDelta {
    pub unsubscribe: Vec<String>,
    pub subscribe: Vec<String>,
}

impl SubscriptionDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.unsubscribe.is_empty() && self.subscribe.is_empty()
    }
}

/// Compute the set difference between current and desired subscriptions.
///
/// Master, call leg, put leg, and each position entry are compared
/// independently: a change in one never recycles the others. An
/// instrument that merely moves between roles (e.g. a leg that becomes a
/// tracked position) is neither dropped nor re-added.
#[must_use]
pub fn reconcile(
    current: &SubscriptionState,
    desired: &DesiredSubscriptions,
) -> SubscriptionDelta {
    let current_set: Vec<&InstrumentId> = current
        .master
        .iter()
        .chain(current.call.iter())
        .chain(current.put.iter())
        .chain(current.positions.values())
        .collect();
    let desired_set: Vec<&InstrumentId> = desired
        .master
        .iter()
        .chain(desired.call.iter())
        .chain(desired.put.iter())
        .chain(desired.positions.values())
        .collect();

    let mut delta = SubscriptionDelta::default();
    for id in &current_set {
        if !desired_set.contains(id) {
            let symbol = id.wire_symbol();
            if !delta.unsubscribe.contains(&symbol) {
                delta.unsubscribe.push(symbol);
            }
        }
    }
    for id in &desired_set {
        if !current_set.contains(id) {
            let symbol = id.wire_symbol();
            if !delta.subscribe.contains(&symbol) {
                delta.subscribe.push(symbol);
            }
        }
    }
    delta
}
