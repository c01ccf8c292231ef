use reqwest::StatusCode;

/// Errors surfaced by [`crate::VeoliaClient`].
///
/// Two families: authentication failures (`MissingCredentials`,
/// `InvalidCredentials`) and transport/parse failures (everything else).
/// There is no local recovery; every variant propagates to the caller.
#[derive(Debug, thiserror::Error)]
pub enum VeoliaError {
    #[error("username or password not provided")]
    MissingCredentials,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("{context} failed with status {status}")]
    UnexpectedStatus { context: &'static str, status: StatusCode },

    /// The call succeeded but the payload did not contain what the portal
    /// normally returns (missing field, empty redirect, absent code...).
    #[error("unexpected response from the portal: {0}")]
    UnexpectedPayload(String),

    #[error("invalid alert settings: {0}")]
    InvalidAlertSettings(&'static str),

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("HTTP transport error")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse portal JSON")]
    Parse(#[from] serde_json::Error),

    #[error("failed to parse redirect URL")]
    RedirectUrl(#[from] url::ParseError),
}

impl VeoliaError {
    pub(crate) fn payload(msg: impl Into<String>) -> Self {
        VeoliaError::UnexpectedPayload(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, VeoliaError>;
