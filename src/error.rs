//! Bridge-wide error kinds.
//!
//! Errors never escape past the dispatcher (see `dispatcher::CommandResult`);
//! this enum exists for logging and for carrying enough context to build
//! user-visible failure shapes at the call site.

use thiserror::Error;

use crate::zone::PlayerId;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration payload: {0}")]
    ConfigInvalid(String),

    #[error("zone {0} not found")]
    ZoneNotFound(PlayerId),

    #[error("zone {0} not configured: {1}")]
    ZoneNotConfigured(PlayerId, String),

    #[error("backend for zone {0} unreachable: {1}")]
    BackendUnreachable(PlayerId, String),

    #[error("dispatch to zone {0} failed: {1}")]
    DispatchFailed(PlayerId, String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
