pub mod protocol;
pub mod error;
pub mod config;
pub mod types;
pub mod catalog;
pub mod translator;
pub mod admin;
pub mod query;
pub mod session;

use thiserror::Error;

pub use session::{Gateway, serve};

#[derive(Error, Debug)]
pub enum OctopusError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("SQL parse error: {0}")]
    SqlParse(#[from] sqlparser::parser::ParserError),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("Feature not supported: {0}")]
    NotSupported(String),

    #[error("{0}")]
    UndefinedTable(String),

    #[error("{0}")]
    UndefinedObject(String),

    #[error("{0}")]
    DuplicateObject(String),

    #[error("{0}")]
    Ambiguous(String),

    #[error("password authentication failed for user \"{0}\"")]
    InvalidPassword(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("{0}")]
    LimitExceeded(String),

    #[error("{message}: {cause}")]
    Backend { message: String, cause: String },

    #[error("canceling statement due to user request")]
    Canceled,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OctopusError>;

impl OctopusError {
    /// Wrap a driver-level failure raised while running a statement on a
    /// backend.
    pub fn backend(cause: impl std::fmt::Display) -> Self {
        OctopusError::Backend {
            message: "failed to run by-pass query".to_string(),
            cause: cause.to_string(),
        }
    }

    /// Get the SQLSTATE for this error
    pub fn sql_state(&self) -> error::SqlState {
        use error::SqlState;
        match self {
            OctopusError::Protocol(_) => SqlState::ProtocolViolation,
            OctopusError::SqlParse(_) | OctopusError::Syntax(_) => SqlState::SyntaxError,
            OctopusError::NotSupported(_) => SqlState::FeatureNotSupported,
            OctopusError::UndefinedTable(_) => SqlState::UndefinedTable,
            OctopusError::UndefinedObject(_) => SqlState::UndefinedObject,
            OctopusError::DuplicateObject(_) => SqlState::DuplicateObject,
            OctopusError::Ambiguous(_) => SqlState::AmbiguousName,
            OctopusError::InvalidPassword(_) => SqlState::InvalidPassword,
            OctopusError::InvalidParameter(_) => SqlState::InvalidParameterValue,
            OctopusError::TypeConversion(_) => SqlState::InvalidTextRepresentation,
            OctopusError::LimitExceeded(_) => SqlState::ProgramLimitExceeded,
            OctopusError::Backend { .. } | OctopusError::Sqlite(_) => SqlState::SystemError,
            OctopusError::Canceled => SqlState::QueryCanceled,
            OctopusError::Io(_) => SqlState::IoError,
            OctopusError::Internal(_) => SqlState::InternalError,
        }
    }
}

impl From<sqlparser::tokenizer::TokenizerError> for OctopusError {
    fn from(err: sqlparser::tokenizer::TokenizerError) -> Self {
        OctopusError::Syntax(err.to_string())
    }
}
