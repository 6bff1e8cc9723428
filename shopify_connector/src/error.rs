use thiserror::Error;

use crate::api::PlatformResponse;

#[derive(Debug, Error)]
pub enum ShopifyApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST request: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(String),
    #[error("Invalid currency amount: {0}")]
    InvalidCurrencyAmount(String),
}

/// Fatal, header-level batch failures. Anything row-level is reported, not raised.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("CSV contains unknown header fields: {0}")]
    UnknownHeaderFields(String),
    #[error("CSV missing required header fields: {0}")]
    MissingHeaderFields(String),
    #[error("Could not read CSV: {0}")]
    Io(#[from] csv::Error),
}

/// A refund scan that could not complete, with the platform response that sank it (when one exists).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ScanError {
    pub message: String,
    pub platform_response: Option<PlatformResponse>,
}

impl ScanError {
    pub fn new(message: impl Into<String>, platform_response: Option<PlatformResponse>) -> Self {
        Self { message: message.into(), platform_response }
    }
}

impl From<ShopifyApiError> for ScanError {
    fn from(e: ShopifyApiError) -> Self {
        Self::new(e.to_string(), None)
    }
}
