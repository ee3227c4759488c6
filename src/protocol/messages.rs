use std::collections::HashMap;

/// Protocol version 3.0 as carried in the StartupMessage version slot.
pub const PROTOCOL_VERSION_3: i32 = protocol_version(3, 0);
/// Pseudo protocol version announcing a CancelRequest.
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678;
/// Pseudo protocol version announcing an SSLRequest.
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679;
/// Pseudo protocol version announcing a GSSENCRequest.
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680;

pub const fn protocol_version(major: i32, minor: i32) -> i32 {
    (major << 16) | minor
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    SslRequest,
    GssEncRequest,
    CancelRequest {
        process_id: i32,
        secret_key: i32,
    },
    StartupMessage(StartupMessage),
    Password(String),
    Query(String),
    Parse {
        name: String,
        query: String,
        param_types: Vec<i32>,
    },
    Bind {
        portal: String,
        statement: String,
        formats: Vec<i16>,
        values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    Execute {
        portal: String,
        max_rows: i32,
    },
    Sync,
    Terminate,
    Close {
        typ: u8, // 'S' for statement, 'P' for portal
        name: String,
    },
    Describe {
        typ: u8, // 'S' for statement, 'P' for portal
        name: String,
    },
    Flush,
    CopyData,
    CopyDone,
    CopyFail,
    /// A tagged message this server does not understand. The session decides
    /// how to report it.
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartupMessage {
    pub protocol_version: i32,
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum BackendMessage {
    Authentication(AuthenticationMessage),
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery { status: TransactionStatus },
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ErrorResponse(Box<ErrorResponse>),
    ParseComplete,
    BindComplete,
    CloseComplete,
    PortalSuspended,
    NoData,
    ParameterDescription(Vec<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthenticationMessage {
    Ok,
    CleartextPassword,
}

/// Only `Idle` is ever reported; the gateway does not run transactions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransactionStatus {
    Idle,
}

impl TransactionStatus {
    pub fn as_byte(&self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_id: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16, // 0 = text, 1 = binary
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ErrorResponse {
    pub fn new(severity: String, code: String, message: String) -> Self {
        ErrorResponse {
            severity,
            code,
            message,
            detail: None,
            hint: None,
        }
    }
}
