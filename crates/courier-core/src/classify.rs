//! Mapping from a raw transport result to exactly one [`ResponseOutcome`].
//!
//! Everything here is pure: the same input always yields the same outcome,
//! and nothing is logged, retried or invoked. Side effects such as the
//! unauthenticated hook belong to the caller.

use serde_json::Value;

use crate::decode::DecodeError;
use crate::outcome::{NetworkErrorReason, OutcomeKind, ResponseOutcome};
use crate::settings::MessageCatalog;
use crate::transport::{RawOutcome, RawResponse, TransportError};

/// Classify `raw`, decoding the body of a 2xx response with `decode`.
///
/// Rules, first match wins:
/// 1. no connectivity at dispatch -> `NoConnectivity`
/// 2. any timeout -> `NetworkError { Timeout }`
/// 3. cancellation -> `NetworkError { Cancelled }`
/// 4. any other failure without a response, a local failure, or status 0
///    -> `NetworkError { Transport }`
/// 5. 2xx -> `Success` or `ParsingError`
/// 6. 401 -> `Unauthorized`; >= 500 -> `ServerError`; else `ClientError`
pub fn classify<T, D>(raw: &RawOutcome, decode: D, catalog: &MessageCatalog) -> ResponseOutcome<T>
where
    D: Fn(&[u8]) -> Result<T, DecodeError>,
{
    let response = match raw {
        Err(err) => return from_transport_error(err),
        Ok(response) => response,
    };

    match classify_status(response.status) {
        OutcomeKind::NetworkError(reason) => ResponseOutcome::NetworkError { reason },
        OutcomeKind::Success => match decode(&response.body[..]) {
            Ok(data) => ResponseOutcome::Success {
                status: response.status,
                data,
            },
            Err(DecodeError(detail)) => ResponseOutcome::ParsingError {
                status: Some(response.status),
                detail,
            },
        },
        OutcomeKind::Unauthorized => ResponseOutcome::Unauthorized {
            status: response.status,
        },
        OutcomeKind::ServerError => ResponseOutcome::ServerError {
            status: response.status,
            messages: error_messages(response, catalog),
        },
        _ => ResponseOutcome::ClientError {
            status: response.status,
            messages: error_messages(response, catalog),
        },
    }
}

/// Outcome kind of `raw` without decoding.
///
/// A 2xx response reports `Success` here even if its body would later fail
/// to decode; that difference never matters for retry decisions.
pub fn classify_kind(raw: &RawOutcome) -> OutcomeKind {
    match raw {
        Err(err) => transport_error_kind(err),
        Ok(response) => classify_status(response.status),
    }
}

fn transport_error_kind(err: &TransportError) -> OutcomeKind {
    match err {
        TransportError::NoConnectivity => OutcomeKind::NoConnectivity,
        TransportError::Timeout(_) => OutcomeKind::NetworkError(NetworkErrorReason::Timeout),
        TransportError::Cancelled => OutcomeKind::NetworkError(NetworkErrorReason::Cancelled),
        TransportError::Connect(_) | TransportError::Other(_) | TransportError::Local(_) => {
            OutcomeKind::NetworkError(NetworkErrorReason::Transport)
        }
    }
}

fn from_transport_error<T>(err: &TransportError) -> ResponseOutcome<T> {
    match transport_error_kind(err) {
        OutcomeKind::NoConnectivity => ResponseOutcome::NoConnectivity,
        OutcomeKind::NetworkError(reason) => ResponseOutcome::NetworkError { reason },
        // transport_error_kind only yields the two kinds above
        _ => ResponseOutcome::NetworkError {
            reason: NetworkErrorReason::Transport,
        },
    }
}

fn classify_status(status: u16) -> OutcomeKind {
    match status {
        0 => OutcomeKind::NetworkError(NetworkErrorReason::Transport),
        200..=299 => OutcomeKind::Success,
        401 => OutcomeKind::Unauthorized,
        500..=u16::MAX => OutcomeKind::ServerError,
        _ => OutcomeKind::ClientError,
    }
}

/// Messages from the `message` field of a JSON error body.
///
/// The field may hold a string or an array of strings. Anything else,
/// including a body that is not JSON, yields the generic message.
fn error_messages(response: &RawResponse, catalog: &MessageCatalog) -> Vec<String> {
    let extracted = serde_json::from_slice::<Value>(&response.body)
        .ok()
        .and_then(|body| match body.get("message") {
            Some(Value::String(message)) if !message.trim().is_empty() => {
                Some(vec![message.clone()])
            }
            Some(Value::Array(items)) => {
                let messages: Vec<String> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|m| !m.trim().is_empty())
                    .map(str::to_string)
                    .collect();
                (!messages.is_empty()).then_some(messages)
            }
            _ => None,
        });

    extracted.unwrap_or_else(|| vec![catalog.generic_error_message.clone()])
}
