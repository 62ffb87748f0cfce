//! Body decoders for successful responses.
//!
//! A decoder turns the raw body of a 2xx response into `T`. It reports
//! failure through [`DecodeError`] instead of panicking, which is what lets
//! the classifier build `ParsingError` deterministically.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A successful response body could not be decoded into the requested type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self(format!("invalid JSON body: {}", err))
    }
}

/// Decode the body as JSON into `T`.
pub fn json<T: DeserializeOwned>() -> impl Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync {
    |body: &[u8]| serde_json::from_slice(body).map_err(DecodeError::from)
}

/// Decode the body as UTF-8 text.
pub fn text() -> impl Fn(&[u8]) -> Result<String, DecodeError> + Send + Sync {
    |body: &[u8]| {
        String::from_utf8(body.to_vec())
            .map_err(|e| DecodeError(format!("body is not valid UTF-8: {}", e)))
    }
}

/// Keep the body as raw bytes.
pub fn bytes() -> impl Fn(&[u8]) -> Result<Bytes, DecodeError> + Send + Sync {
    |body: &[u8]| Ok(Bytes::copy_from_slice(body))
}

/// Ignore the body. Used for downloads and `204 No Content`.
pub fn discard() -> impl Fn(&[u8]) -> Result<(), DecodeError> + Send + Sync {
    |_: &[u8]| Ok(())
}
