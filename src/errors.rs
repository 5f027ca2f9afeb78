//! Failure categorization for tracked requests.
//!
//! Every failed `/api/track` submission is filed under one category so the
//! final report and the Prometheus counters can tell rejected payloads apart
//! from an overloaded server or a broken network path.

use std::fmt;

/// Categories of failures a tracked request can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// HTTP 4xx responses (rejected token or payload)
    ClientError,

    /// HTTP 5xx responses (ingestion or broker trouble)
    ServerError,

    /// Connection refused, DNS failures, broken bodies
    NetworkError,

    /// Client-side request timeout
    TimeoutError,

    /// Certificate or handshake failures
    TlsError,

    /// Anything else, including non-HTTP status codes
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code, returning `None` for 2xx/3xx.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a transport-level reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }
        if let Some(status) = error.status() {
            return Self::from_status_code(status.as_u16()).unwrap_or(ErrorCategory::OtherError);
        }

        // reqwest folds handshake failures into connect errors, so look at the
        // message before falling back to the connect/request flags.
        let message = error.to_string().to_lowercase();
        if message.contains("certificate") || message.contains("tls") || message.contains("ssl") {
            ErrorCategory::TlsError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
        {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Prometheus label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }

    /// All categories in report order.
    pub fn all() -> [ErrorCategory; 6] {
        [
            ErrorCategory::ClientError,
            ErrorCategory::ServerError,
            ErrorCategory::NetworkError,
            ErrorCategory::TimeoutError,
            ErrorCategory::TlsError,
            ErrorCategory::OtherError,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A failed submission as seen by a simulated user.
#[derive(Debug, Clone)]
pub struct TrackFailure {
    pub category: ErrorCategory,

    /// HTTP status when the server answered at all
    pub status_code: Option<u16>,

    pub message: String,
}

impl TrackFailure {
    /// Build a failure from a non-success response status.
    pub fn from_status(status_code: u16) -> Option<Self> {
        ErrorCategory::from_status_code(status_code).map(|category| Self {
            category,
            status_code: Some(status_code),
            message: format!("server answered HTTP {}", status_code),
        })
    }

    /// Build a failure from a transport error.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(error),
            status_code: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for TrackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "[{}] HTTP {}: {}", self.category.label(), status, self.message),
            None => write!(f, "[{}] {}", self.category.label(), self.message),
        }
    }
}
