//! Library error type.

use crate::cloud::{CloudError, CloudResult};
use crate::models::Ipv4;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("block {block} is not a subdivision of {parent}")]
    BlockNotInParent { block: Ipv4, parent: Ipv4 },

    #[error("address pool {parent} is exhausted: no free /{child_prefix} block left")]
    PoolExhausted { parent: Ipv4, child_prefix: u8 },

    #[error("{step}: {missing} does not exist yet")]
    DependencyMissing { step: String, missing: String },

    #[error("timed out after {}s waiting for {what}", timeout.as_secs_f64())]
    Timeout { what: String, timeout: Duration },

    #[error("{step} failed: {source}")]
    OperationFailed {
        step: String,
        #[source]
        source: CloudError,
    },

    #[error("invalid input: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn dependency_missing(step: impl Into<String>, missing: impl Into<String>) -> Self {
        Error::DependencyMissing {
            step: step.into(),
            missing: missing.into(),
        }
    }

    /// The wrapped collaborator error, if this came from a cloud call.
    pub fn cloud_error(&self) -> Option<&CloudError> {
        match self {
            Error::OperationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Attach the name of the chain step to a collaborator error.
pub trait StepContext<T> {
    fn step(self, step: impl Into<String>) -> Result<T>;
}

impl<T> StepContext<T> for CloudResult<T> {
    fn step(self, step: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::OperationFailed {
            step: step.into(),
            source,
        })
    }
}
