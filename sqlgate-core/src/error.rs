/// Convenience alias for results carrying an [`ApiError`].
pub type ApiResult<T> = Result<T, ApiError>;

/// Application error with an HTTP-equivalent status code per kind.
///
/// Handler errors bubble through the DAO unchanged; the batch orchestrator
/// records them per operation; the service pipeline turns whatever reaches
/// it into the response envelope. Driver failures and other unexpected
/// conditions are wrapped as [`ApiError::Internal`] and surfaced with a
/// generic message only.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Malformed input: unknown operator, invalid `__sort`, malformed or
    /// cyclic batch, unresolvable `$ref`, unknown entity.
    BadRequest(String),
    /// Claims missing where required.
    Unauthorized(String),
    /// Permission check failed: no matching role, property outside the
    /// allow-list, or an empty projection after filtering.
    Forbidden(String),
    /// Update/delete affected zero rows without a concurrency mismatch.
    NotFound(String),
    /// Concurrency-control value did not match the stored row.
    Conflict(String),
    /// Malformed API model detected at load time.
    Spec(String),
    /// Driver error or unexpected failure.
    Internal(String),
}

impl ApiError {
    /// HTTP status code equivalent for this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::Spec(_) | ApiError::Internal(_) => 500,
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Server-side kinds collapse to a generic message; details stay in the
    /// logs.
    pub fn public_message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg) => msg,
            ApiError::Spec(_) | ApiError::Internal(_) => "internal server error",
        }
    }

    /// Wrap a driver or other unexpected error.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            ApiError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ApiError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            ApiError::Spec(msg) => write!(f, "Spec error: {msg}"),
            ApiError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}
