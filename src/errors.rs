use thiserror::Error;

/// Failure raised by a collaborator (tool, resource or prompt provider) or by
/// a method handler before a reply could be shaped.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    #[error("{message}")]
    Internal { code: &'static str, message: String },
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::NotFound { code, .. }
            | Self::Internal { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn message_is_exposed_without_prefix_for_collaborator_errors() {
        let err = AppError::not_found("resource_not_found", "unknown resource: x");
        assert_eq!(err.to_string(), "unknown resource: x");
        assert_eq!(err.message(), "unknown resource: x");
        assert_eq!(err.code(), "resource_not_found");
    }

    #[test]
    fn bad_request_display_is_prefixed() {
        let err = AppError::bad_request("invalid_arguments", "name is required");
        assert_eq!(err.to_string(), "bad request: name is required");
        assert_eq!(err.message(), "name is required");
    }
}
