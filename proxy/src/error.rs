use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for talking to the Registration API.
///
/// Transport failures never surface directly; the sender fails over to
/// another aggregator and only reports `TooManyRetries` once its attempt
/// budget is spent. `InvalidRequest` is a client-side rejection and is
/// never retried at the level that issued the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no registration API found")]
    NoAggregator,
    #[error("invalid request, status {0}")]
    InvalidRequest(StatusCode),
    #[error("too many retries")]
    TooManyRetries,
}
