use crate::protocol::messages::ErrorResponse;
use crate::OctopusError;
use std::fmt;

/// Severity carried in the `S`/`V` fields of an ErrorResponse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the current statement; the session keeps running.
    Error,
    /// Ends the session.
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// SQLSTATE codes the gateway reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlState {
    ProtocolViolation,
    FeatureNotSupported,
    InvalidPassword,
    InvalidAuthorizationSpecification,
    TooManyConnections,
    ProgramLimitExceeded,
    SyntaxError,
    UndefinedTable,
    UndefinedObject,
    DuplicateObject,
    AmbiguousName,
    InvalidParameterValue,
    InvalidTextRepresentation,
    QueryCanceled,
    ConnectionFailure,
    SystemError,
    IoError,
    InternalError,
}

impl SqlState {
    pub fn code(&self) -> &'static str {
        match self {
            SqlState::ProtocolViolation => "08P01",
            SqlState::FeatureNotSupported => "0A000",
            SqlState::InvalidPassword => "28P01",
            SqlState::InvalidAuthorizationSpecification => "28000",
            SqlState::TooManyConnections => "53300",
            SqlState::ProgramLimitExceeded => "54000",
            SqlState::SyntaxError => "42601",
            SqlState::UndefinedTable => "42P01",
            SqlState::UndefinedObject => "42704",
            SqlState::DuplicateObject => "42710",
            SqlState::AmbiguousName => "42702",
            SqlState::InvalidParameterValue => "22023",
            SqlState::InvalidTextRepresentation => "22P02",
            SqlState::QueryCanceled => "57014",
            SqlState::ConnectionFailure => "08006",
            SqlState::SystemError => "58000",
            SqlState::IoError => "58030",
            SqlState::InternalError => "XX000",
        }
    }
}

/// An error as the client will see it: severity, SQLSTATE and message.
///
/// Every failure path in a session converges on one of these before it is
/// written to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PgError {
    pub severity: Severity,
    pub state: SqlState,
    pub message: String,
    pub detail: Option<String>,
}

impl PgError {
    pub fn new(severity: Severity, state: SqlState, message: impl Into<String>) -> Self {
        PgError {
            severity,
            state,
            message: message.into(),
            detail: None,
        }
    }

    pub fn fatal(state: SqlState, message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, state, message)
    }

    pub fn error(state: SqlState, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, state, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Convert to ErrorResponse for protocol
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            severity: self.severity.as_str().to_string(),
            code: self.state.code().to_string(),
            message: self.message.clone(),
            detail: self.detail.clone(),
            hint: None,
        }
    }
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.severity.as_str(), self.state.code(), self.message)
    }
}

impl std::error::Error for PgError {}

impl From<OctopusError> for PgError {
    /// Errors raised while handling a statement abort that statement only.
    /// Protocol violations end the session.
    fn from(err: OctopusError) -> Self {
        match err {
            OctopusError::Backend { message, cause } => {
                PgError::error(SqlState::SystemError, message).with_detail(cause)
            }
            OctopusError::Protocol(msg) => PgError::fatal(SqlState::ProtocolViolation, msg),
            other => PgError::error(other.sql_state(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_fatal() {
        let err: PgError = OctopusError::Protocol("named prepared statement is not supported".into()).into();
        assert!(err.is_fatal());
        assert_eq!(err.state.code(), "08P01");
    }

    #[test]
    fn test_backend_error_keeps_cause_as_detail() {
        let err: PgError = OctopusError::Backend {
            message: "failed to run by-pass query".into(),
            cause: "no such table: t".into(),
        }
        .into();
        assert!(!err.is_fatal());
        let response = err.to_error_response();
        assert_eq!(response.severity, "ERROR");
        assert_eq!(response.message, "failed to run by-pass query");
        assert_eq!(response.detail.as_deref(), Some("no such table: t"));
    }

    #[test]
    fn test_not_supported_is_error_during_queries() {
        let err: PgError = OctopusError::NotSupported("multiple data sources".into()).into();
        assert_eq!(err.severity, Severity::Error);
        assert_eq!(err.state, SqlState::FeatureNotSupported);
    }
}
