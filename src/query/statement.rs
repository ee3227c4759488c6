use crate::admin::AdminCommand;
use sqlparser::ast::Statement;
use std::sync::Arc;

/// Kind of statement forwarded to a backend, used for the completion tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    pub fn of(stmt: &Statement) -> Option<QueryType> {
        match stmt {
            Statement::Query(_) => Some(QueryType::Select),
            Statement::Insert(_) => Some(QueryType::Insert),
            Statement::Update { .. } => Some(QueryType::Update),
            Statement::Delete(_) => Some(QueryType::Delete),
            _ => None,
        }
    }

    pub fn completion_tag(&self, rows: usize) -> String {
        match self {
            QueryType::Select => format!("SELECT {rows}"),
            QueryType::Insert => format!("INSERT 0 {rows}"),
            QueryType::Update => format!("UPDATE {rows}"),
            QueryType::Delete => format!("DELETE {rows}"),
        }
    }
}

/// Result of parsing one query string. Never modified after parsing, so it
/// can be bound any number of times.
#[derive(Debug)]
pub enum ParsedStatement {
    /// Nothing but whitespace and semicolons.
    Empty,
    Admin(Vec<AdminCommand>),
    /// A validated statement whose relations are all fully qualified.
    Query {
        statement: Statement,
        query_type: QueryType,
        param_types: Vec<i32>,
    },
}

impl ParsedStatement {
    pub fn param_types(&self) -> &[i32] {
        match self {
            ParsedStatement::Query { param_types, .. } => param_types,
            _ => &[],
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, ParsedStatement::Admin(_))
    }

    /// Columns of the last SHOW command, which is the one whose rows an
    /// administrative statement returns.
    pub fn admin_result_columns(&self) -> Option<&'static [&'static str]> {
        match self {
            ParsedStatement::Admin(commands) => commands.iter().rev().find_map(AdminCommand::result_columns),
            _ => None,
        }
    }
}

/// A parsed statement with its Bind arguments.
#[derive(Debug, Clone)]
pub struct ExecutableStatement {
    pub parsed: Arc<ParsedStatement>,
    pub param_formats: Vec<i16>,
    pub param_values: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<i16>,
}

impl ExecutableStatement {
    pub fn new(
        parsed: Arc<ParsedStatement>,
        param_formats: Vec<i16>,
        param_values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    ) -> Self {
        ExecutableStatement {
            parsed,
            param_formats,
            param_values,
            result_formats,
        }
    }
}
