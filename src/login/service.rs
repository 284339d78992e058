use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

/// Errors a login backend can report.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The backend rejected the credentials.
    WrongCredentials,
    /// The backend answered with an error message.
    Server(String),
    /// Something failed outside the normal request path.
    Unexpected(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::WrongCredentials => write!(f, "Wrong username password"),
            ServiceError::Server(msg) => write!(f, "{msg}"),
            ServiceError::Unexpected(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Exchanges credentials for a session token.
#[async_trait]
pub trait LoginService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<String, ServiceError>;
}

/// Accepts `admin`/`admin` after a simulated round trip.
pub struct MockLoginService {
    latency: Duration,
}

pub const MOCK_TOKEN: &str = "mock_token";

impl MockLoginService {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for MockLoginService {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl LoginService for MockLoginService {
    async fn login(&self, username: &str, password: &str) -> Result<String, ServiceError> {
        debug!("Mock login for {:?}", username);
        match (username, password) {
            ("admin", "admin") => {
                tokio::time::sleep(self.latency).await;
                Ok(MOCK_TOKEN.to_string())
            }
            ("error", "error") => Err(ServiceError::Unexpected(
                "Something unexpected came up".to_string(),
            )),
            _ => Err(ServiceError::WrongCredentials),
        }
    }
}
