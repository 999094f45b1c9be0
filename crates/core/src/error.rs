use thiserror::Error;

/// Every failure the bridge can surface to a client. Each variant maps to a
/// single HTTP status via [`Error::status`]; the payload is always the
/// human-readable message rendered as `{"error": "..."}`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    BadInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Cdp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn cdp(msg: impl Into<String>) -> Self {
        Self::Cdp(msg.into())
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::BadInput(_) => 400,
            Error::Unauthorized => 401,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Cdp(_) | Error::Io(_) | Error::Json(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::bad_input("x").status(), 400);
        assert_eq!(Error::Unauthorized.status(), 401);
        assert_eq!(Error::not_found("x").status(), 404);
        assert_eq!(Error::conflict("x").status(), 409);
        assert_eq!(Error::cdp("x").status(), 500);
    }

    #[test]
    fn message_is_bare_for_client_errors() {
        let e = Error::not_found("tab abc not found");
        assert_eq!(e.to_string(), "tab abc not found");
    }
}
