use thiserror::Error;

/// Transport-layer failures surfaced to the session.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transport is not connected")]
    NotConnected,

    /// The reconnect budget is spent. Terminal until an external
    /// `connect` request arrives.
    #[error("unable to connect after {attempts} attempts; manual reconnect required")]
    Exhausted { attempts: u32 },
}
