use thiserror::Error;

/// Rejection reasons for an incoming metrics payload.
///
/// Every variant is raised before the registry is touched, so a rejected
/// payload never leaves a partial update behind.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload must be a JSON object")]
    Malformed,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl IngestError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid listen address `{0}`")]
    ListenAddr(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
