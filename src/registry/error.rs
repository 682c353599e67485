use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid response header: {0}")]
    InvalidHeader(String),
}

impl RegistryError {
    /// Coarse HTTP status used for registry health reporting.
    pub fn status_bucket(&self) -> u16 {
        match self {
            Self::Status { status, .. } => match *status {
                401 | 403 | 404 => *status,
                _ => 500,
            },
            Self::Transport(e) if e.is_timeout() => 504,
            Self::Transport(e) if e.is_connect() => 503,
            Self::Transport(_) | Self::Decode(_) | Self::InvalidHeader(_) => 500,
        }
    }
}
