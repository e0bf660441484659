use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog has {products} products but no instructors to pair them with")]
    NoInstructors { products: usize },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server rejected credentials")]
    Unauthorized,
    #[error("unexpected status {status} for {path}")]
    Status { status: u16, path: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl ClientError {
    /// Connect failures, timeouts and 5xx answers are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(err) => err.is_timeout() || err.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
    #[error("stored user data is unreadable: {0}")]
    UserData(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
