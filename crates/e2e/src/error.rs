//! Error types for the harness

use thiserror::Error;

use crate::session::WorkerId;

/// Errors raised by a browser driver call.
///
/// Environment noise (`ClickIntercepted`, `StaleElement`) is separated from
/// everything else so the interaction layer can decide what to recover from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Click intercepted: {0}")]
    ClickIntercepted(String),

    #[error("No such element: {0}")]
    NoSuchElement(String),

    #[error("Stale element reference: {0}")]
    StaleElement(String),

    #[error("Browser session closed")]
    SessionClosed,

    #[error("Driver timeout: {0}")]
    Timeout(String),

    #[error("Driver error: {0}")]
    Other(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Harness errors.
///
/// Lifecycle-ordering bugs (`NoActiveSession`, `SessionAlreadyActive`,
/// `ReportAlreadyOpen`) are surfaced immediately and never swallowed.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("No active browser session for worker {0}")]
    NoActiveSession(WorkerId),

    #[error("Worker {0} already owns a live browser session")]
    SessionAlreadyActive(WorkerId),

    #[error("Worker {worker} already has an open report record for '{title}'")]
    ReportAlreadyOpen { worker: WorkerId, title: String },

    #[error("Browser driver: {0}")]
    Driver(#[from] DriverError),

    #[error("Timed out after {timeout_ms} ms waiting for: {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
