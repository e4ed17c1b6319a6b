use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("permission error: {0}")]
    Permission(String),

    #[error("provisioning error: {0}")]
    Provision(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EtlError {
    /// Classifies an AWS SDK failure. Transport failures are always `Network`,
    /// everything else goes to `kind` with the full error context.
    pub fn from_sdk<E, R>(err: SdkError<E, R>, kind: fn(String) -> EtlError) -> Self
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let message = DisplayErrorContext(&err).to_string();
        match err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => EtlError::Network(message),
            _ => kind(message),
        }
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> Self {
        EtlError::Network(err.to_string())
    }
}
