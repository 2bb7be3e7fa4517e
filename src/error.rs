//! Error taxonomy for the follower engine.
//!
//! Mirrors the distinction chain33's parachain client makes implicitly
//! (most errors bubble back into the main loop and are retried on the next
//! tick; a depth-exhausted reorg search is the one condition worth killing
//! the process over) and makes it explicit the way
//! `alpen-ee/ol_tracker::error::OLTrackerError` does: every variant knows
//! whether it is recoverable.

use thiserror::Error;

/// Errors surfaced by the local-db bus adapter (`bus` module).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus request failed: {0}")]
    Transport(String),

    /// The bus returned a different number of replies than requests were
    /// sent. `paracreate.go`'s `getLocalDb`/`setLocalDb` treat this as
    /// `types.ErrInvalidParam`.
    #[error("reply count {got} does not match request count {expected}")]
    CountMismatch { expected: usize, got: usize },

    #[error("key not found")]
    NotFound,
}

impl BusError {
    pub fn kind(&self) -> &'static str {
        match self {
            BusError::Transport(_) => "transport",
            BusError::CountMismatch { .. } => "count_mismatch",
            BusError::NotFound => "not_found",
        }
    }
}

/// Errors surfaced by the main-chain RPC adapter (`adapter` module).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc returned an error response: {0}")]
    Rpc(String),

    /// A batched fetch returned a different number of deltas than the
    /// requested `[start, end)` range implied.
    #[error("batch fetch returned {got} deltas, expected {expected}")]
    InvalidParam { expected: usize, got: usize },

    #[error("requested seq {0} has no corresponding main block yet")]
    WaitingNewSeq(u64),

    #[error("no main block found for seq {0}")]
    NotFound(u64),
}

impl AdapterError {
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::Transport(_) => "transport",
            AdapterError::Rpc(_) => "rpc",
            AdapterError::InvalidParam { .. } => "invalid_param",
            AdapterError::WaitingNewSeq(_) => "waiting_new_seq",
            AdapterError::NotFound(_) => "not_found",
        }
    }
}

/// Top-level error produced by the follower loop and the hash matcher.
///
/// Every variant answers `is_fatal()`. Only [`FollowerError::DepthExhausted`]
/// is fatal: the hash matcher searched back `max_search_depth` blocks
/// without finding a common ancestor, which `paracreate.go` treats as an
/// unrecoverable invariant violation (`panic("search HashMatchedBlock
/// overflow...")`) rather than something to retry.
#[derive(Debug, Error)]
pub enum FollowerError {
    #[error("waiting for new main-chain seq {0}")]
    WaitingNewSeq(u64),

    #[error("local tip hash does not match main chain at height {height}")]
    HashNotMatch { height: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("bus failure: {0}")]
    Bus(#[from] BusError),

    #[error("adapter failure: {0}")]
    Adapter(#[from] AdapterError),

    #[error(
        "reorg search exhausted {searched} blocks (max_search_depth={max}) \
         without finding a common ancestor"
    )]
    DepthExhausted { searched: u64, max: u64 },

    #[error(transparent)]
    Other(#[from] eyre::Error),
}

impl FollowerError {
    /// Whether this error should be treated as an unrecoverable invariant
    /// violation rather than something the follower loop retries past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FollowerError::DepthExhausted { .. })
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Message to panic with, for callers that want to turn a fatal error
    /// into a process exit at the point it is discovered.
    pub fn panic_message(&self) -> String {
        format!("fatal follower error: {self}")
    }
}
