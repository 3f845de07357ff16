use thiserror::Error;

/// Failures surfaced by core operations.
///
/// Scan-side variants (`DataUnavailable`, `NoQualifyingContract`,
/// `ProviderRateLimited`) are recovered inside the scan loop. Command-side
/// variants (`UnknownReference`, `MalformedCommand`, `StoreWriteFailure`)
/// are answered to the caller with an explicit rejection.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("no usable data for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("no qualifying option contract for {ticker}")]
    NoQualifyingContract { ticker: String },

    #[error("{0}")]
    UnknownReference(String),

    #[error("{0}")]
    MalformedCommand(String),

    #[error("provider rate limited (cool down {cooldown_secs}s)")]
    ProviderRateLimited { cooldown_secs: u64 },

    #[error("store write failed: {0}")]
    StoreWriteFailure(String),
}

impl AgentError {
    pub fn data_unavailable(ticker: &str, reason: impl Into<String>) -> Self {
        AgentError::DataUnavailable {
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the scan loop should skip quietly rather than report.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            AgentError::DataUnavailable { .. } | AgentError::NoQualifyingContract { .. }
        )
    }
}

impl From<crate::store::StoreError> for AgentError {
    fn from(e: crate::store::StoreError) -> Self {
        AgentError::StoreWriteFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
