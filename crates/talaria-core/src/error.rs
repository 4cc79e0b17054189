use thiserror::Error;

/// Application-wide error types for Talaria.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The platform (or the apply service on its behalf) told us to back off.
    /// Daily-limit exhaustion is reported through this variant too.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A precondition is missing and retrying cannot help
    /// (no resume, no profile, unsupported platform, missing credentials).
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Browser session could not be created or died mid-use.
    #[error("Session error: {0}")]
    SessionError(String),

    /// HTTP call to a collaborator service failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Operation timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration is missing or invalid.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Response fragments that indicate a platform-side throttle.
const RATE_LIMIT_NEEDLES: &[&str] = &[
    "429",
    "too many requests",
    "rate limit",
    "temporarily blocked",
    "try again later",
];

/// Error fragments that mean retrying is pointless.
const PERMANENT_NEEDLES: &[&str] = &[
    "requires authentication",
    "unsupported job platform",
    "resume not uploaded",
    "profile not saved",
];

/// Returns true if free-form error text looks like a platform throttle.
pub fn looks_rate_limited(text: &str) -> bool {
    let t = text.to_lowercase();
    RATE_LIMIT_NEEDLES.iter().any(|needle| t.contains(needle))
}

impl EngineError {
    /// Rate-limit signal, either typed or inferred from response text.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            EngineError::RateLimited(_) => true,
            EngineError::HttpError(msg) | EngineError::Generic(msg) => looks_rate_limited(msg),
            _ => false,
        }
    }

    /// A failure that no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        match self {
            EngineError::Permanent(_) => true,
            EngineError::ConfigError(_) => true,
            EngineError::Generic(msg) => {
                let t = msg.to_lowercase();
                PERMANENT_NEEDLES.iter().any(|needle| t.contains(needle))
            }
            _ => false,
        }
    }

    /// Rate limiting caused by a daily cap rather than a short-term throttle.
    /// The worker pauses the owning campaign instead of churning retries.
    pub fn is_daily_limit(&self) -> bool {
        matches!(self, EngineError::RateLimited(msg) if msg.to_lowercase().contains("daily limit"))
    }

    /// Returns true if this error should count against the platform's circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            EngineError::RateLimited(_) | EngineError::Timeout(_) | EngineError::SessionError(_) => {
                true
            }
            EngineError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }
}
