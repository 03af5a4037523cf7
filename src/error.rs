use std::fmt;

use http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;
pub use url::ParseError as UrlParseError;

/// Error types for the ClearPass client.
#[derive(Error, Debug)]
pub enum CppmError {
    /// An HTTP exchange failed. Carries the full request and response
    /// context.
    #[error(transparent)]
    Rest(Box<RestError>),

    /// No credential was available before the exchange was attempted.
    #[error("Not authorized. Make sure you log in and your account has the proper privileges")]
    NotAuthenticated,

    /// A client-side authentication precondition failed.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// A filter value could not be normalized for the target resource.
    #[error("Invalid filter value for '{field}': {reason}")]
    Normalization { field: String, reason: String },

    /// Paginated requests need a positive page size.
    #[error("Page size is too small")]
    PageTooSmall,

    /// The API path string is invalid.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    /// Error parsing URL.
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] UrlParseError),

    /// Error serializing or deserializing JSON outside of an exchange.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Local I/O failed (import file, export sink).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for ClearPass operations.
pub type CppmResult<T> = Result<T, CppmError>;

/// Broad failure classes, so callers can choose between re-authenticating,
/// retrying, and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, DNS, TLS or unexpected HTTP status.
    Transport,
    /// 401/403, missing credential, or a failed login handshake step.
    Authentication,
    /// The server answered with something of an unexpected shape.
    MalformedResponse,
    /// A caller-supplied value was rejected before any I/O.
    Validation,
    /// The client itself is misconfigured.
    Configuration,
    /// Local file handling failed.
    Io,
}

impl CppmError {
    /// Returns `true` when re-authentication (not a plain retry) is needed.
    pub fn is_not_authenticated(&self) -> bool {
        match self {
            Self::NotAuthenticated => true,
            Self::Rest(e) => e.is_not_authenticated(),
            _ => false,
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rest(e) => e.cause.kind(),
            Self::NotAuthenticated | Self::AuthenticationError(_) => ErrorKind::Authentication,
            Self::Normalization { .. } | Self::PageTooSmall | Self::InvalidEndpoint(_) => {
                ErrorKind::Validation
            }
            Self::ConfigurationError(_) | Self::UrlParseError(_) => ErrorKind::Configuration,
            Self::SerializationError(_) => ErrorKind::MalformedResponse,
            Self::IoError(_) => ErrorKind::Io,
        }
    }

    /// The structured exchange record, if this error came from one.
    pub fn rest(&self) -> Option<&RestError> {
        match self {
            Self::Rest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RestError> for CppmError {
    fn from(e: RestError) -> Self {
        CppmError::Rest(Box::new(e))
    }
}

impl From<Box<RestError>> for CppmError {
    fn from(e: Box<RestError>) -> Self {
        CppmError::Rest(e)
    }
}

/// What went wrong inside a [`RestError`].
#[derive(Error, Debug)]
pub enum RestCause {
    /// The server answered 401 or 403.
    #[error("Not authorized. Make sure you log in and your account has the proper privileges")]
    NotAuthenticated,

    /// The request never produced a complete response.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("REST request failed with status code: {0}")]
    Status(StatusCode),

    /// A step of the web login handshake did not go as expected.
    #[error("Web login failed: {0}")]
    Handshake(String),

    /// The reply lacked an expected header, marker or field.
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// The reply body was not the expected JSON.
    #[error("Invalid JSON reply: {0}")]
    Json(#[from] serde_json::Error),
}

impl RestCause {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthenticated | Self::Handshake(_) => ErrorKind::Authentication,
            Self::Transport(_) | Self::Status(_) => ErrorKind::Transport,
            Self::Malformed(_) | Self::Json(_) => ErrorKind::MalformedResponse,
        }
    }
}

/// Immutable record of a failed exchange.
///
/// Holds enough of the request to reproduce it and enough of the response
/// to diagnose it. Rendering prints one populated field per line and skips
/// the empty ones.
#[derive(Debug)]
pub struct RestError {
    pub cause: RestCause,
    pub method: Method,
    /// Request URL without its query string.
    pub url: String,
    pub query: String,
    pub request_headers: HeaderMap,
    pub body: String,
    /// `None` when no response was received.
    pub status: Option<StatusCode>,
    pub response_headers: HeaderMap,
    pub reply: String,
}

impl RestError {
    /// Returns `true` if the server rejected the credential.
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self.cause, RestCause::NotAuthenticated)
    }
}

impl fmt::Display for RestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        write!(f, "\n  Method: {}", self.method)?;
        write!(f, "\n  URL: {}", self.url)?;
        if !self.query.is_empty() {
            write!(f, "\n  Query: {}", self.query)?;
        }
        if !self.request_headers.is_empty() {
            write!(f, "\n  Header: {}", render_headers(&self.request_headers))?;
        }
        if !self.body.is_empty() {
            write!(f, "\n  Body: {}", self.body)?;
        }
        if let Some(status) = self.status {
            write!(f, "\n  StatusCode: {}", status)?;
        }
        if !self.response_headers.is_empty() {
            write!(f, "\n  ReplyHeader: {}", render_headers(&self.response_headers))?;
        }
        if !self.reply.is_empty() {
            write!(f, "\n  Reply: {}", self.reply)?;
        }
        Ok(())
    }
}

impl std::error::Error for RestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

// Credentials never end up in logs or terminal output.
fn render_headers(headers: &HeaderMap) -> String {
    let parts: Vec<String> = headers
        .iter()
        .map(|(name, value)| {
            if name == AUTHORIZATION || name == COOKIE || name == SET_COOKIE {
                format!("{}: <redacted>", name)
            } else {
                format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()))
            }
        })
        .collect();
    parts.join(", ")
}
