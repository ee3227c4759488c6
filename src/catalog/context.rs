use crate::admin::command::{ColumnName, CommentTarget, ObjectPrivilege, SystemPrivilege};
use crate::admin::dispatcher::{CatalogRunner, ShowResult};
use crate::catalog::{show, Catalog, RefreshScope, SchemaTree};
use crate::{OctopusError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

struct ContextInner {
    catalog: Arc<Catalog>,
    user: String,
    params: Mutex<BTreeMap<String, String>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.catalog.release_context();
        debug!("catalog context for {} released", self.user);
    }
}

/// A session's handle on the catalog: the authenticated user plus the
/// parameters set with `SET`. Clones share the same context, which is
/// released once the last clone is gone.
#[derive(Clone)]
pub struct CatalogContext {
    inner: Arc<ContextInner>,
}

impl CatalogContext {
    pub(crate) fn new(catalog: Arc<Catalog>, user: &str) -> Self {
        CatalogContext {
            inner: Arc::new(ContextInner {
                catalog,
                user: user.to_string(),
                params: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    pub fn user(&self) -> &str {
        &self.inner.user
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.inner.params.lock().get(name).cloned()
    }

    fn check_schema(tree: &SchemaTree, data_source: &str, schema: &str) -> Result<()> {
        if !tree.contains(data_source) {
            return Err(OctopusError::UndefinedObject(format!(
                "data source \"{data_source}\" does not exist"
            )));
        }
        if tree.schema(data_source, schema).is_none() {
            return Err(OctopusError::UndefinedObject(format!(
                "schema \"{data_source}.{schema}\" does not exist"
            )));
        }
        Ok(())
    }

    fn check_table(tree: &SchemaTree, data_source: &str, schema: &str, table: &str) -> Result<()> {
        Self::check_schema(tree, data_source, schema)?;
        match tree.schema(data_source, schema).and_then(|s| s.tables.get(table)) {
            Some(_) => Ok(()),
            None => Err(OctopusError::UndefinedTable(format!(
                "relation \"{data_source}.{schema}.{table}\" does not exist"
            ))),
        }
    }

    fn check_column(tree: &SchemaTree, column: &ColumnName) -> Result<()> {
        Self::check_table(tree, &column.data_source, &column.schema, &column.table)?;
        let exists = tree
            .schema(&column.data_source, &column.schema)
            .and_then(|s| s.tables.get(&column.table))
            .is_some_and(|t| t.columns.iter().any(|c| c.name == column.column));
        if exists {
            Ok(())
        } else {
            Err(OctopusError::UndefinedObject(format!("column \"{column}\" does not exist")))
        }
    }
}

impl CatalogRunner for CatalogContext {
    fn add_data_source(&self, name: &str, url: &str, driver: Option<&str>) -> Result<()> {
        self.catalog().add_data_source(name, url, driver)
    }

    fn drop_data_source(&self, name: &str) -> Result<()> {
        self.catalog().drop_data_source(name)
    }

    fn update_data_source(&self, name: &str) -> Result<()> {
        self.catalog().refresh_data_source(name, RefreshScope::All)
    }

    fn update_schema(&self, data_source: &str, schema_pattern: &str) -> Result<()> {
        self.catalog()
            .refresh_data_source(data_source, RefreshScope::Schemas { pattern: schema_pattern })
    }

    fn update_table(&self, data_source: &str, schema: &str, table_pattern: &str) -> Result<()> {
        self.catalog().refresh_data_source(
            data_source,
            RefreshScope::Tables {
                schema,
                pattern: table_pattern,
            },
        )
    }

    fn create_user(&self, name: &str, password: &str) -> Result<()> {
        self.catalog().meta().create_user(name, password)?;
        info!("user {} created by {}", name, self.user());
        Ok(())
    }

    fn alter_user(&self, name: &str, password: &str, old_password: Option<&str>) -> Result<()> {
        self.catalog().meta().alter_user(name, password, old_password)?;
        info!("user {} altered by {}", name, self.user());
        Ok(())
    }

    fn drop_user(&self, name: &str) -> Result<()> {
        self.catalog().meta().drop_user(name)?;
        info!("user {} dropped by {}", name, self.user());
        Ok(())
    }

    fn create_role(&self, name: &str) -> Result<()> {
        self.catalog().meta().create_role(name)
    }

    fn drop_role(&self, name: &str) -> Result<()> {
        self.catalog().meta().drop_role(name)
    }

    fn grant_system_privileges(&self, privileges: &[SystemPrivilege], grantees: &[String]) -> Result<()> {
        self.catalog().meta().grant_system_privileges(privileges, grantees)
    }

    fn revoke_system_privileges(&self, privileges: &[SystemPrivilege], revokees: &[String]) -> Result<()> {
        self.catalog().meta().revoke_system_privileges(privileges, revokees)
    }

    fn grant_object_privileges(
        &self,
        privileges: &[ObjectPrivilege],
        data_source: &str,
        schema: &str,
        grantees: &[String],
    ) -> Result<()> {
        let tree = self.catalog().read_schema();
        Self::check_schema(&tree, data_source, schema)?;
        self.catalog()
            .meta()
            .grant_object_privileges(privileges, data_source, schema, grantees)
    }

    fn revoke_object_privileges(
        &self,
        privileges: &[ObjectPrivilege],
        data_source: &str,
        schema: &str,
        revokees: &[String],
    ) -> Result<()> {
        let tree = self.catalog().read_schema();
        Self::check_schema(&tree, data_source, schema)?;
        self.catalog()
            .meta()
            .revoke_object_privileges(privileges, data_source, schema, revokees)
    }

    fn comment_on(&self, target: &CommentTarget, comment: &str) -> Result<()> {
        let tree = self.catalog().read_schema();
        match target {
            CommentTarget::DataSource(ds) => {
                if !tree.contains(ds) {
                    return Err(OctopusError::UndefinedObject(format!("data source \"{ds}\" does not exist")));
                }
            }
            CommentTarget::Schema { data_source, schema } => Self::check_schema(&tree, data_source, schema)?,
            CommentTarget::Table { data_source, schema, table } => {
                Self::check_table(&tree, data_source, schema, table)?
            }
            CommentTarget::Column(column) => Self::check_column(&tree, column)?,
            CommentTarget::User(_) => {}
        }
        self.catalog().meta().set_comment(target.clone(), comment)
    }

    fn set_data_category(&self, column: &ColumnName, category: &str) -> Result<()> {
        let tree = self.catalog().read_schema();
        Self::check_column(&tree, column)?;
        self.catalog().meta().set_data_category(column.clone(), category);
        Ok(())
    }

    fn set_param(&self, name: &str, value: &str) -> Result<()> {
        debug!("session parameter {} = {}", name, value);
        self.inner.params.lock().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn show_data_sources(&self) -> Result<ShowResult> {
        let tree = self.catalog().read_schema();
        Ok(show::data_sources(&tree, &self.catalog().meta()))
    }

    fn show_schemas(&self, data_source: Option<&str>, schema_pattern: Option<&str>) -> Result<ShowResult> {
        let tree = self.catalog().read_schema();
        show::schemas(&tree, &self.catalog().meta(), data_source, schema_pattern)
    }

    fn show_tables(
        &self,
        data_source: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
    ) -> Result<ShowResult> {
        let tree = self.catalog().read_schema();
        show::tables(&tree, &self.catalog().meta(), data_source, schema_pattern, table_pattern)
    }

    fn show_columns(
        &self,
        data_source: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
        column_pattern: Option<&str>,
    ) -> Result<ShowResult> {
        let tree = self.catalog().read_schema();
        show::columns(
            &tree,
            &self.catalog().meta(),
            data_source,
            schema_pattern,
            table_pattern,
            column_pattern,
        )
    }

    fn show_all_users(&self) -> Result<ShowResult> {
        Ok(show::users(&self.catalog().meta()))
    }

    fn show_object_privileges(&self, user: &str) -> Result<ShowResult> {
        show::object_privileges(&self.catalog().meta(), user)
    }

    fn show_comments(
        &self,
        comment_pattern: Option<&str>,
        data_source_pattern: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
        column_pattern: Option<&str>,
    ) -> Result<ShowResult> {
        show::comments(
            &self.catalog().meta(),
            comment_pattern,
            data_source_pattern,
            schema_pattern,
            table_pattern,
            column_pattern,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DEFAULT_SCHEMA;
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn context_with_source(dir: &TempDir) -> CatalogContext {
        let path = dir.path().join("sales.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE orders (id INTEGER, amount REAL, note TEXT);")
            .unwrap();
        let catalog = Arc::new(Catalog::new("octopus", "bitnine"));
        let ctx = catalog.open_context("octopus");
        ctx.add_data_source("sales", &format!("jdbc:sqlite:{}", path.display()), None)
            .unwrap();
        ctx
    }

    #[test]
    fn test_show_data_sources() {
        let dir = TempDir::new().unwrap();
        let ctx = context_with_source(&dir);
        ctx.comment_on(&CommentTarget::DataSource("sales".into()), "sales records")
            .unwrap();
        let result = ctx.show_data_sources().unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0].as_deref(), Some("sales"));
        assert_eq!(result.rows[0][3].as_deref(), Some("sales records"));
    }

    #[test]
    fn test_show_columns_with_category() {
        let dir = TempDir::new().unwrap();
        let ctx = context_with_source(&dir);
        let column = ColumnName {
            data_source: "sales".into(),
            schema: DEFAULT_SCHEMA.into(),
            table: "orders".into(),
            column: "amount".into(),
        };
        ctx.set_data_category(&column, "financial").unwrap();
        let result = ctx
            .show_columns(Some("sales"), None, Some("ord%"), Some("am%"))
            .unwrap();
        assert_eq!(
            result.rows,
            vec![vec![
                Some("sales".to_string()),
                Some(DEFAULT_SCHEMA.to_string()),
                Some("orders".to_string()),
                Some("amount".to_string()),
                Some("REAL".to_string()),
                Some("2".to_string()),
                None,
                Some("financial".to_string()),
            ]]
        );
    }

    #[test]
    fn test_comment_on_missing_objects() {
        let dir = TempDir::new().unwrap();
        let ctx = context_with_source(&dir);
        let err = ctx
            .comment_on(
                &CommentTarget::Table {
                    data_source: "sales".into(),
                    schema: DEFAULT_SCHEMA.into(),
                    table: "nope".into(),
                },
                "x",
            )
            .unwrap_err();
        assert!(matches!(err, OctopusError::UndefinedTable(_)));
        assert!(ctx.comment_on(&CommentTarget::User("ghost".into()), "x").is_err());
    }

    #[test]
    fn test_show_comments_filters() {
        let dir = TempDir::new().unwrap();
        let ctx = context_with_source(&dir);
        ctx.comment_on(&CommentTarget::DataSource("sales".into()), "top level")
            .unwrap();
        ctx.comment_on(
            &CommentTarget::Table {
                data_source: "sales".into(),
                schema: DEFAULT_SCHEMA.into(),
                table: "orders".into(),
            },
            "all orders",
        )
        .unwrap();

        let all = ctx.show_comments(None, None, None, None, None).unwrap();
        assert_eq!(all.rows.len(), 2);
        let tables = ctx.show_comments(None, None, None, Some("%"), None).unwrap();
        assert_eq!(tables.rows.len(), 1);
        assert_eq!(tables.rows[0][0].as_deref(), Some("TABLE"));
        let by_text = ctx.show_comments(Some("top%"), None, None, None, None).unwrap();
        assert_eq!(by_text.rows[0][0].as_deref(), Some("DATASOURCE"));
    }

    #[test]
    fn test_object_privileges_need_schema() {
        let dir = TempDir::new().unwrap();
        let ctx = context_with_source(&dir);
        let users = vec!["octopus".to_string()];
        ctx.grant_object_privileges(&[ObjectPrivilege::Select], "sales", DEFAULT_SCHEMA, &users)
            .unwrap();
        assert!(ctx
            .grant_object_privileges(&[ObjectPrivilege::Select], "sales", "nope", &users)
            .is_err());
        let shown = ctx.show_object_privileges("octopus").unwrap();
        assert_eq!(shown.rows.len(), 1);
        assert_eq!(shown.rows[0][2].as_deref(), Some("SELECT"));
    }

    #[test]
    fn test_set_param() {
        let catalog = Arc::new(Catalog::new("octopus", "bitnine"));
        let ctx = catalog.open_context("octopus");
        ctx.set_param("search_path", "sales").unwrap();
        assert_eq!(ctx.param("search_path").as_deref(), Some("sales"));
    }
}
