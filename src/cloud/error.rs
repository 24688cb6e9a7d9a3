//! Errors returned by the cloud network collaborator.

/// Error codes that mean the target resource is gone.
const NOT_FOUND_CODES: &[&str] = &["Gateway.NotAttached", "NatGatewayNotFound"];

/// Error codes worth polling through.
const TRANSIENT_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "Throttling",
    "DependencyViolation",
    "ServiceUnavailable",
    "IncorrectState",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The service answered with an error code.
    #[error("{code}: {message}")]
    Api { code: String, message: String },

    /// The command could not run or died without an error code.
    #[error("command failed: {0}")]
    Command(String),

    #[error("unexpected response from {context}: {message}")]
    Parse { context: String, message: String },
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

impl CloudError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, id: &str) -> Self {
        CloudError::api(code, format!("the resource '{id}' does not exist"))
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            CloudError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code()
            .map(|code| code.ends_with(".NotFound") || NOT_FOUND_CODES.contains(&code))
            .unwrap_or(false)
    }

    pub fn is_transient(&self) -> bool {
        self.code()
            .map(|code| TRANSIENT_CODES.contains(&code))
            .unwrap_or(false)
    }
}

/// Treat "already gone" as success for idempotent deletes.
pub fn ignore_not_found(result: CloudResult<()>) -> CloudResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            log::debug!("already gone: {e}");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CloudError::api("InvalidSubnetID.NotFound", "x").is_not_found());
        assert!(CloudError::api("Gateway.NotAttached", "x").is_not_found());
        assert!(!CloudError::api("InvalidSubnet.Conflict", "x").is_not_found());
        assert!(CloudError::api("DependencyViolation", "x").is_transient());
        assert!(!CloudError::api("UnauthorizedOperation", "x").is_transient());
        assert!(!CloudError::Command("boom".to_string()).is_transient());
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(CloudError::not_found("InvalidVpcID.NotFound", "vpc-1"))).is_ok());
        assert!(ignore_not_found(Err(CloudError::api("DependencyViolation", "x"))).is_err());
    }
}
