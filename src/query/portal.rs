use crate::admin::{run_all, ShowResult};
use crate::catalog::CatalogContext;
use crate::protocol::FieldDescription;
use crate::query::statement::{ExecutableStatement, ParsedStatement};
use crate::types::{FormatCode, PgType};
use crate::{OctopusError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::debug;

/// Lifecycle of a portal. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    Initial,
    Active,
    Done,
    Failed,
}

pub type Row = Vec<Option<Vec<u8>>>;

/// Rows returned by one Execute.
#[derive(Debug, Default)]
pub struct Batch {
    pub rows: Vec<Row>,
    /// The row limit was reached before the result was exhausted.
    pub suspended: bool,
}

/// An open result stream over an executable statement.
///
/// The first `describe` or `run` activates the portal. A failure in any
/// operation moves it to `Failed` for good.
#[async_trait]
pub trait Portal: Send {
    /// Columns of the result, `None` when the statement returns no rows.
    async fn describe(&mut self) -> Result<Option<Vec<FieldDescription>>>;

    /// Fetch up to `max_rows` rows, all of them when `max_rows` is 0.
    async fn run(&mut self, max_rows: usize) -> Result<Batch>;

    /// The CommandComplete tag. Only valid once the result is exhausted;
    /// moves the portal to `Done`.
    fn completion_tag(&mut self) -> Result<String>;

    /// Release the result stream and anything held for it.
    fn close(&mut self);

    fn state(&self) -> PortalState;
}

/// Build a RowDescription entry. Table and column ids are not tracked.
pub fn field_description(name: &str, pg_type: PgType, format: FormatCode) -> FieldDescription {
    FieldDescription {
        name: name.to_string(),
        table_oid: 0,
        column_id: 0,
        type_oid: pg_type.to_oid(),
        type_size: pg_type.type_size(),
        type_modifier: -1,
        format: format.code(),
    }
}

/// Portal over administrative commands. The commands run in a blocking task
/// the first time rows are asked for; SHOW output is reported as varchar.
pub struct AdminPortal {
    context: CatalogContext,
    executable: ExecutableStatement,
    state: PortalState,
    rows: VecDeque<Row>,
    sent: usize,
    show: bool,
    executed: bool,
}

impl AdminPortal {
    pub fn new(context: CatalogContext, executable: ExecutableStatement) -> Self {
        AdminPortal {
            context,
            executable,
            state: PortalState::Initial,
            rows: VecDeque::new(),
            sent: 0,
            show: false,
            executed: false,
        }
    }

    fn formats(&self, count: usize) -> Result<Vec<FormatCode>> {
        FormatCode::resolve(&self.executable.result_formats, count)
    }

    async fn execute(&mut self) -> Result<()> {
        let context = self.context.clone();
        let parsed = self.executable.parsed.clone();
        let result = tokio::task::spawn_blocking(move || match parsed.as_ref() {
            ParsedStatement::Admin(commands) => run_all(&context, commands),
            _ => Err(OctopusError::Internal("administrative portal over a query".to_string())),
        })
        .await
        .map_err(|e| OctopusError::Internal(format!("administrative command task failed: {e}")))??;

        if let Some(ShowResult { rows, .. }) = result {
            self.show = true;
            self.rows = rows
                .into_iter()
                .map(|row| row.into_iter().map(|v| v.map(String::into_bytes)).collect())
                .collect();
        }
        self.executed = true;
        Ok(())
    }

    fn fail<T>(&mut self, err: OctopusError) -> Result<T> {
        self.state = PortalState::Failed;
        Err(err)
    }

    fn check_usable(&self) -> Result<()> {
        match self.state {
            PortalState::Done | PortalState::Failed => Err(OctopusError::Internal(format!(
                "portal is {:?} and cannot be used",
                self.state
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Portal for AdminPortal {
    async fn describe(&mut self) -> Result<Option<Vec<FieldDescription>>> {
        self.check_usable()?;
        if self.state == PortalState::Initial {
            self.state = PortalState::Active;
        }
        let Some(columns) = self.executable.parsed.admin_result_columns() else {
            return Ok(None);
        };
        let formats = match self.formats(columns.len()) {
            Ok(formats) => formats,
            Err(e) => return self.fail(e),
        };
        Ok(Some(
            columns
                .iter()
                .zip(formats)
                .map(|(name, format)| field_description(name, PgType::Varchar, format))
                .collect(),
        ))
    }

    async fn run(&mut self, max_rows: usize) -> Result<Batch> {
        self.check_usable()?;
        self.state = PortalState::Active;
        if !self.executed {
            if let Err(e) = self.execute().await {
                return self.fail(e);
            }
        }
        let take = if max_rows == 0 { self.rows.len() } else { max_rows.min(self.rows.len()) };
        let rows: Vec<Row> = self.rows.drain(..take).collect();
        self.sent += rows.len();
        debug!("administrative portal returned {} row(s)", rows.len());
        Ok(Batch {
            suspended: max_rows != 0 && !self.rows.is_empty(),
            rows,
        })
    }

    fn completion_tag(&mut self) -> Result<String> {
        self.check_usable()?;
        if !self.executed || !self.rows.is_empty() {
            return Err(OctopusError::Internal("portal has not been run to completion".to_string()));
        }
        self.state = PortalState::Done;
        if self.show {
            return Ok(format!("SELECT {}", self.sent));
        }
        let tag = match self.executable.parsed.as_ref() {
            ParsedStatement::Admin(commands) => commands.last().map(|c| c.tag()).unwrap_or("SET"),
            _ => "SET",
        };
        Ok(tag.to_string())
    }

    fn close(&mut self) {
        self.rows.clear();
    }

    fn state(&self) -> PortalState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::parser;
    use crate::catalog::Catalog;
    use std::sync::Arc;

    fn portal(sql: &str, catalog: &Arc<Catalog>) -> AdminPortal {
        let commands = parser::parse(sql).unwrap().unwrap();
        let parsed = Arc::new(ParsedStatement::Admin(commands));
        AdminPortal::new(
            catalog.open_context("octopus"),
            ExecutableStatement::new(parsed, vec![], vec![], vec![]),
        )
    }

    #[tokio::test]
    async fn test_show_users_in_pages() {
        let catalog = Arc::new(Catalog::new("octopus", "bitnine"));
        let mut portal = portal(
            "CREATE USER jsyang IDENTIFIED BY 'x'; CREATE USER kisung IDENTIFIED BY 'y'; SHOW ALL USERS",
            &catalog,
        );

        let fields = portal.describe().await.unwrap().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].name, "USER_NAME");

        let first = portal.run(2).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        assert!(first.suspended);

        let rest = portal.run(0).await.unwrap();
        assert_eq!(rest.rows.len(), 1);
        assert!(!rest.suspended);
        assert_eq!(portal.completion_tag().unwrap(), "SELECT 3");
        assert_eq!(portal.state(), PortalState::Done);
    }

    #[tokio::test]
    async fn test_failure_is_terminal() {
        let catalog = Arc::new(Catalog::new("octopus", "bitnine"));
        let mut portal = portal("CREATE ROLE r; DROP USER nobody; CREATE ROLE s", &catalog);
        assert!(portal.describe().await.unwrap().is_none());
        assert!(matches!(portal.run(0).await, Err(OctopusError::UndefinedObject(_))));
        assert_eq!(portal.state(), PortalState::Failed);
        assert!(portal.run(0).await.is_err());
        // Commands before the failure stay applied.
        assert!(catalog.meta().roles().any(|r| r == "r"));
    }

    #[tokio::test]
    async fn test_tag_of_non_show_command() {
        let catalog = Arc::new(Catalog::new("octopus", "bitnine"));
        let mut portal = portal("CREATE USER a IDENTIFIED BY 'b'", &catalog);
        let batch = portal.run(0).await.unwrap();
        assert!(batch.rows.is_empty());
        assert_eq!(portal.completion_tag().unwrap(), "CREATE USER");
    }
}
