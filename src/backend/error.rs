use reqwest::StatusCode;

/// Errors talking to the BRMH backend or its AWS-facing proxy.
///
/// The `Display` form is meant to be shown to the user as-is.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
  #[error("Request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("Backend returned {status}: {body}")]
  Status { status: StatusCode, body: String },

  #[error("Invalid response: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Invalid URL: {0}")]
  Url(#[from] url::ParseError),

  #[error("Stream error: {0}")]
  Stream(String),

  #[error("Cannot decode attribute value: {0}")]
  Decode(String),
}

/// Body fragments the Lambda proxy uses while a function is still being
/// created or updated.
const PENDING_MARKERS: [&str; 3] = ["resourceconflictexception", "pending", "in progress"];

impl BackendError {
  /// Whether retrying after a pause can succeed: the function exists but is
  /// still being created or updated.
  pub fn is_still_creating(&self) -> bool {
    match self {
      BackendError::Status { status, body } => {
        let body = body.to_lowercase();
        *status == StatusCode::CONFLICT || PENDING_MARKERS.iter().any(|m| body.contains(m))
      }
      _ => false,
    }
  }
}
