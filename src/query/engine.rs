use crate::admin::parser as admin_parser;
use crate::catalog::CatalogContext;
use crate::protocol::FieldDescription;
use crate::query::bypass::{describe_columns, BackendTarget, BypassPortal};
use crate::query::cancel::CancelHandle;
use crate::query::portal::{field_description, AdminPortal, Portal};
use crate::query::statement::{ExecutableStatement, ParsedStatement, QueryType};
use crate::translator::{infer_param_types, parse_single, TableNameTranslator};
use crate::types::{FormatCode, PgType};
use crate::{OctopusError, Result};
use std::sync::Arc;
use tracing::debug;

/// What Describe of a statement reports.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementDescription {
    pub param_types: Vec<i32>,
    /// `None` when the statement returns no rows.
    pub fields: Option<Vec<FieldDescription>>,
}

/// Per-session entry point of the statement pipeline: parse, bind and
/// execute.
pub struct QueryEngine {
    context: CatalogContext,
    cancel: Arc<CancelHandle>,
}

impl QueryEngine {
    pub fn new(context: CatalogContext, cancel: Arc<CancelHandle>) -> Self {
        QueryEngine { context, cancel }
    }

    pub fn context(&self) -> &CatalogContext {
        &self.context
    }

    /// Parse one query string.
    ///
    /// Administrative text is returned as its commands, unvalidated. Anything
    /// else must be a single SELECT, VALUES, WITH, INSERT, UPDATE or DELETE;
    /// its relations are resolved against the catalog and its parameter
    /// types inferred while the schema read lock is held.
    pub fn parse(&self, text: &str, param_type_hints: &[i32]) -> Result<Arc<ParsedStatement>> {
        if text.chars().all(|c| c.is_whitespace() || c == ';') {
            return Ok(Arc::new(ParsedStatement::Empty));
        }
        if let Some(commands) = admin_parser::parse(text)? {
            return Ok(Arc::new(ParsedStatement::Admin(commands)));
        }

        let statement = parse_single(text)?;
        let query_type = QueryType::of(&statement).ok_or_else(|| {
            OctopusError::NotSupported(format!("statement cannot be run by-pass: {statement}"))
        })?;

        let (statement, param_types) = {
            let tree = self.context.catalog().read_schema();
            let statement = TableNameTranslator::to_fqn(&tree, &statement)?;
            let param_types = infer_param_types(&tree, &statement, param_type_hints)?;
            (statement, param_types)
        };
        debug!("validated {:?} with parameter types {:?}", query_type, param_types);

        Ok(Arc::new(ParsedStatement::Query {
            statement,
            query_type,
            param_types,
        }))
    }

    /// Attach Bind arguments. Purely structural; values are checked when the
    /// portal opens.
    pub fn bind(
        parsed: Arc<ParsedStatement>,
        param_formats: Vec<i16>,
        param_values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    ) -> ExecutableStatement {
        ExecutableStatement::new(parsed, param_formats, param_values, result_formats)
    }

    /// Open a portal over a bound statement.
    pub fn execute(&self, executable: ExecutableStatement) -> Result<Box<dyn Portal>> {
        match executable.parsed.as_ref() {
            ParsedStatement::Admin(_) => Ok(Box::new(AdminPortal::new(self.context.clone(), executable))),
            ParsedStatement::Query { .. } => Ok(Box::new(BypassPortal::open(
                self.context.catalog(),
                &executable,
                self.cancel.clone(),
            )?)),
            ParsedStatement::Empty => Err(OctopusError::Internal("no portal for an empty query".to_string())),
        }
    }

    /// Parameter types and result columns of a parsed statement. Queries are
    /// prepared on their backend to learn the columns but not run.
    pub async fn describe_statement(&self, parsed: &Arc<ParsedStatement>) -> Result<StatementDescription> {
        let fields = match parsed.as_ref() {
            ParsedStatement::Empty => None,
            ParsedStatement::Admin(_) => parsed.admin_result_columns().map(|columns| {
                columns
                    .iter()
                    .map(|name| field_description(name, PgType::Varchar, FormatCode::Text))
                    .collect()
            }),
            ParsedStatement::Query { statement, .. } => {
                let target = BackendTarget::resolve(self.context.catalog(), statement)?;
                let fields = tokio::task::spawn_blocking(move || describe_columns(&target))
                    .await
                    .map_err(|e| OctopusError::Internal(format!("describe task failed: {e}")))??;
                Some(fields).filter(|f: &Vec<FieldDescription>| !f.is_empty())
            }
        };
        Ok(StatementDescription {
            param_types: parsed.param_types().to_vec(),
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::query::portal::PortalState;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> QueryEngine {
        let catalog = Arc::new(Catalog::new("octopus", "bitnine"));
        for (name, ddl) in [
            ("sales", "CREATE TABLE orders (id INTEGER, amount REAL); INSERT INTO orders VALUES (1, 2.5);"),
            ("hr", "CREATE TABLE employees (id INTEGER, name TEXT);"),
        ] {
            let path = dir.path().join(format!("{name}.db"));
            Connection::open(&path).unwrap().execute_batch(ddl).unwrap();
            catalog.add_data_source(name, &path.display().to_string(), None).unwrap();
        }
        QueryEngine::new(catalog.open_context("octopus"), Arc::new(CancelHandle::new()))
    }

    #[test]
    fn test_parse_classifies_input() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        assert!(matches!(*engine.parse(" ; ", &[]).unwrap(), ParsedStatement::Empty));
        assert!(engine.parse("SHOW DATASOURCES", &[]).unwrap().is_admin());
        let parsed = engine.parse("SELECT * FROM orders WHERE id = $1", &[]).unwrap();
        assert_eq!(parsed.param_types(), &[PgType::Int4.to_oid()]);
    }

    #[test]
    fn test_parse_rejects_other_statements() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        assert!(matches!(
            engine.parse("CREATE TABLE t (a int)", &[]),
            Err(OctopusError::NotSupported(_))
        ));
        assert!(matches!(
            engine.parse("SELECT * FROM missing", &[]),
            Err(OctopusError::UndefinedTable(_))
        ));
    }

    #[test]
    fn test_two_data_sources_rejected_before_connecting() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let parsed = engine
            .parse("SELECT * FROM orders JOIN employees ON orders.id = employees.id", &[])
            .unwrap();
        // Remove the files: a connection attempt would now fail differently.
        std::fs::remove_file(dir.path().join("sales.db")).unwrap();
        std::fs::remove_file(dir.path().join("hr.db")).unwrap();
        let result = engine.execute(QueryEngine::bind(parsed, vec![], vec![], vec![]));
        assert!(matches!(result, Err(OctopusError::NotSupported(_))));
    }

    #[tokio::test]
    async fn test_describe_then_run_equals_run() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let parsed = engine.parse("SELECT id, amount FROM orders", &[]).unwrap();

        let described = engine.describe_statement(&parsed).await.unwrap();
        assert_eq!(described.fields.as_ref().map(Vec::len), Some(2));

        let mut first = engine.execute(QueryEngine::bind(parsed.clone(), vec![], vec![], vec![])).unwrap();
        let mut second = engine.execute(QueryEngine::bind(parsed, vec![], vec![], vec![])).unwrap();
        let a = first.run(0).await.unwrap();
        let b = second.run(0).await.unwrap();
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.rows, vec![vec![Some(b"1".to_vec()), Some(b"2.5".to_vec())]]);
        assert_eq!(first.completion_tag().unwrap(), "SELECT 1");
        assert_eq!(first.state(), PortalState::Done);
    }

    #[tokio::test]
    async fn test_query_without_data_source() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let parsed = engine.parse("SELECT 1 + 1 AS two", &[]).unwrap();
        let mut portal = engine.execute(QueryEngine::bind(parsed, vec![], vec![], vec![])).unwrap();
        let fields = portal.describe().await.unwrap().unwrap();
        assert_eq!(fields[0].name, "two");
        assert_eq!(portal.run(0).await.unwrap().rows, vec![vec![Some(b"2".to_vec())]]);
    }
}
