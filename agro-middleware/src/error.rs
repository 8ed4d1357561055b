//! Error kinds shared by controllers, pools and the facade.
//!
//! None of these ever escapes the HTTP facade as a transport fault: handlers
//! log them and answer with a `{"ok": false, "error": ...}` status value.

use crate::broker::BrokerError;
use crate::ports::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("malformed sensor payload: {0}")]
    MalformedPayload(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),
    #[error("no standby available for {0}")]
    NoStandbyAvailable(String),
    #[error("pool size must be at least 1 (got {0})")]
    InvalidPoolSize(usize),
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}
