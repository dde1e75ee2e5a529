use serde::Serialize;
use thiserror::Error;

/// Coarse classification of limiter failures, independent of the backend that produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No usage record exists for the user
    NotFound,
    /// Daily limit outside 1..=1440 minutes
    InvalidLimit,
    /// Transient read/write failure against the account store
    Persistence,
    /// No signed-in identity
    Unauthenticated,
}

impl ErrorKind {
    /// Map a provider-specific error code to a kind.
    ///
    /// Codes follow the `service/code` or bare `code` convention used by hosted
    /// document and identity services. Anything unrecognised is treated as a
    /// transient persistence failure so callers retry instead of giving up.
    pub fn from_provider_code(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        let bare = code.rsplit('/').next().unwrap_or(code.as_str());

        match bare {
            "not-found" | "user-not-found" => ErrorKind::NotFound,
            "unauthenticated" | "permission-denied" | "user-token-expired" | "user-disabled"
            | "wrong-password" | "invalid-credential" | "requires-recent-login" => {
                ErrorKind::Unauthenticated
            }
            "network-request-failed" | "too-many-requests" => ErrorKind::Persistence,
            _ if code.starts_with("auth/") => ErrorKind::Unauthenticated,
            _ => ErrorKind::Persistence,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimiterError {
    #[error("no usage record for user {0}")]
    NotFound(String),
    #[error("daily limit must be between 1 and 1440 minutes (got {0})")]
    InvalidLimit(i64),
    #[error("account store error: {0}")]
    Persistence(String),
    #[error("no signed-in user")]
    Unauthenticated,
}

impl LimiterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LimiterError::NotFound(_) => ErrorKind::NotFound,
            LimiterError::InvalidLimit(_) => ErrorKind::InvalidLimit,
            LimiterError::Persistence(_) => ErrorKind::Persistence,
            LimiterError::Unauthenticated => ErrorKind::Unauthenticated,
        }
    }

    /// Build an error from a backend error code and message
    pub fn from_provider(code: &str, subject: &str, message: impl Into<String>) -> Self {
        match ErrorKind::from_provider_code(code) {
            ErrorKind::NotFound => LimiterError::NotFound(subject.to_string()),
            // Limit validation never happens in the backend
            ErrorKind::InvalidLimit | ErrorKind::Persistence => {
                LimiterError::Persistence(format!("{code}: {}", message.into()))
            }
            ErrorKind::Unauthenticated => LimiterError::Unauthenticated,
        }
    }

    /// Terminal errors are surfaced to the user; everything else is retried
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidLimit | ErrorKind::Unauthenticated)
    }
}

pub type Result<T> = std::result::Result<T, LimiterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_identity_codes() {
        assert_eq!(ErrorKind::from_provider_code("auth/user-not-found"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_provider_code("auth/wrong-password"), ErrorKind::Unauthenticated);
        assert_eq!(ErrorKind::from_provider_code("auth/network-request-failed"), ErrorKind::Persistence);
        assert_eq!(ErrorKind::from_provider_code("auth/invalid-email"), ErrorKind::Unauthenticated);
    }

    #[test]
    fn maps_store_codes() {
        assert_eq!(ErrorKind::from_provider_code("not-found"), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_provider_code("permission-denied"), ErrorKind::Unauthenticated);
        assert_eq!(ErrorKind::from_provider_code("unavailable"), ErrorKind::Persistence);
        assert_eq!(ErrorKind::from_provider_code("deadline-exceeded"), ErrorKind::Persistence);
        assert_eq!(ErrorKind::from_provider_code("  UNAVAILABLE "), ErrorKind::Persistence);
    }

    #[test]
    fn from_provider_builds_matching_variant() {
        let err = LimiterError::from_provider("not-found", "u1", "missing doc");
        assert_eq!(err, LimiterError::NotFound("u1".to_string()));

        let err = LimiterError::from_provider("unavailable", "u1", "backend offline");
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.to_string().contains("backend offline"));
    }

    #[test]
    fn terminal_errors() {
        assert!(LimiterError::InvalidLimit(0).is_terminal());
        assert!(LimiterError::Unauthenticated.is_terminal());
        assert!(!LimiterError::Persistence("x".into()).is_terminal());
        assert!(!LimiterError::NotFound("x".into()).is_terminal());
    }
}
