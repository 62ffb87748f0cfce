//! The closed outcome taxonomy returned by every request.

use serde::Serialize;
use std::fmt;

use crate::settings::MessageCatalog;

/// Why a request ended in [`ResponseOutcome::NetworkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorReason {
    /// Connect, send or receive ceiling elapsed, or connectivity never came back.
    Timeout,
    /// No response object: refused connection, DNS failure, reset, and so on.
    Transport,
    /// The caller cancelled the request.
    Cancelled,
}

impl fmt::Display for NetworkErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkErrorReason::Timeout => write!(f, "timeout"),
            NetworkErrorReason::Transport => write!(f, "transport"),
            NetworkErrorReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Discriminant of [`ResponseOutcome`], independent of the payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    ClientError,
    ServerError,
    Unauthorized,
    NetworkError(NetworkErrorReason),
    NoConnectivity,
    ParsingError,
}

impl OutcomeKind {
    /// Whether the connectivity retry scheduler may replay a request that
    /// ended in this kind. Anything backed by an HTTP response is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OutcomeKind::NetworkError(NetworkErrorReason::Timeout | NetworkErrorReason::Transport)
                | OutcomeKind::NoConnectivity
        )
    }
}

/// Result of one call to `NetworkClient::request`.
///
/// Exactly one case is populated. `status` is present for every case derived
/// from an HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseOutcome<T> {
    Success { status: u16, data: T },
    ClientError { status: u16, messages: Vec<String> },
    ServerError { status: u16, messages: Vec<String> },
    Unauthorized { status: u16 },
    NetworkError { reason: NetworkErrorReason },
    NoConnectivity,
    ParsingError { status: Option<u16>, detail: String },
}

impl<T> ResponseOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ResponseOutcome::Success { .. } => OutcomeKind::Success,
            ResponseOutcome::ClientError { .. } => OutcomeKind::ClientError,
            ResponseOutcome::ServerError { .. } => OutcomeKind::ServerError,
            ResponseOutcome::Unauthorized { .. } => OutcomeKind::Unauthorized,
            ResponseOutcome::NetworkError { reason } => OutcomeKind::NetworkError(*reason),
            ResponseOutcome::NoConnectivity => OutcomeKind::NoConnectivity,
            ResponseOutcome::ParsingError { .. } => OutcomeKind::ParsingError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseOutcome::Success { .. })
    }

    /// HTTP status, when the outcome came from an HTTP exchange.
    pub fn status(&self) -> Option<u16> {
        match self {
            ResponseOutcome::Success { status, .. }
            | ResponseOutcome::ClientError { status, .. }
            | ResponseOutcome::ServerError { status, .. }
            | ResponseOutcome::Unauthorized { status } => Some(*status),
            ResponseOutcome::ParsingError { status, .. } => *status,
            ResponseOutcome::NetworkError { .. } | ResponseOutcome::NoConnectivity => None,
        }
    }

    /// Take the decoded payload of a successful outcome.
    pub fn into_data(self) -> Option<T> {
        match self {
            ResponseOutcome::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Transform the payload of a successful outcome.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResponseOutcome<U> {
        match self {
            ResponseOutcome::Success { status, data } => ResponseOutcome::Success {
                status,
                data: f(data),
            },
            ResponseOutcome::ClientError { status, messages } => {
                ResponseOutcome::ClientError { status, messages }
            }
            ResponseOutcome::ServerError { status, messages } => {
                ResponseOutcome::ServerError { status, messages }
            }
            ResponseOutcome::Unauthorized { status } => ResponseOutcome::Unauthorized { status },
            ResponseOutcome::NetworkError { reason } => ResponseOutcome::NetworkError { reason },
            ResponseOutcome::NoConnectivity => ResponseOutcome::NoConnectivity,
            ResponseOutcome::ParsingError { status, detail } => {
                ResponseOutcome::ParsingError { status, detail }
            }
        }
    }

    /// User-facing text for a failed outcome. `None` on success.
    ///
    /// Error messages are joined with `", "` here and nowhere else.
    pub fn user_message(&self, catalog: &MessageCatalog) -> Option<String> {
        match self {
            ResponseOutcome::Success { .. } => None,
            ResponseOutcome::ClientError { messages, .. }
            | ResponseOutcome::ServerError { messages, .. } => {
                if messages.is_empty() {
                    Some(catalog.generic_error_message.clone())
                } else {
                    Some(messages.join(", "))
                }
            }
            ResponseOutcome::NetworkError {
                reason: NetworkErrorReason::Timeout,
            } => Some(catalog.timeout_message.clone()),
            ResponseOutcome::NetworkError { .. } | ResponseOutcome::NoConnectivity => {
                Some(catalog.network_issues_message.clone())
            }
            ResponseOutcome::Unauthorized { .. } | ResponseOutcome::ParsingError { .. } => {
                Some(catalog.generic_error_message.clone())
            }
        }
    }
}
