/// Failure talking to the sync gateway or touching the local snapshot.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("snapshot IO error: {0}")]
    Io(String),
}

impl ClientError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        Self::Status { status, body }
    }

    /// The gateway could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// The gateway rejected the request itself (4xx). Retrying the same
    /// request will not help.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Status { status, .. } if (400..500).contains(status) => "rejected",
            Self::Status { .. } => "server_error",
            Self::Decode(_) => "decode_error",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
