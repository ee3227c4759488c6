use crate::admin::command::{AdminCommand, ColumnName, CommentTarget, ObjectPrivilege, SystemPrivilege};
use crate::Result;
use tracing::debug;

/// Rows produced by a SHOW command. Every value is text.
#[derive(Debug, Clone, PartialEq)]
pub struct ShowResult {
    pub columns: &'static [&'static str],
    pub rows: Vec<Vec<Option<String>>>,
}

impl ShowResult {
    pub fn new(columns: &'static [&'static str]) -> Self {
        ShowResult {
            columns,
            rows: Vec::new(),
        }
    }
}

/// Catalog operations the administrative dialect can reach.
pub trait CatalogRunner {
    fn add_data_source(&self, name: &str, url: &str, driver: Option<&str>) -> Result<()>;
    fn drop_data_source(&self, name: &str) -> Result<()>;
    fn update_data_source(&self, name: &str) -> Result<()>;
    fn update_schema(&self, data_source: &str, schema_pattern: &str) -> Result<()>;
    fn update_table(&self, data_source: &str, schema: &str, table_pattern: &str) -> Result<()>;

    fn create_user(&self, name: &str, password: &str) -> Result<()>;
    fn alter_user(&self, name: &str, password: &str, old_password: Option<&str>) -> Result<()>;
    fn drop_user(&self, name: &str) -> Result<()>;
    fn create_role(&self, name: &str) -> Result<()>;
    fn drop_role(&self, name: &str) -> Result<()>;

    fn grant_system_privileges(&self, privileges: &[SystemPrivilege], grantees: &[String]) -> Result<()>;
    fn revoke_system_privileges(&self, privileges: &[SystemPrivilege], revokees: &[String]) -> Result<()>;
    fn grant_object_privileges(
        &self,
        privileges: &[ObjectPrivilege],
        data_source: &str,
        schema: &str,
        grantees: &[String],
    ) -> Result<()>;
    fn revoke_object_privileges(
        &self,
        privileges: &[ObjectPrivilege],
        data_source: &str,
        schema: &str,
        revokees: &[String],
    ) -> Result<()>;

    fn comment_on(&self, target: &CommentTarget, comment: &str) -> Result<()>;
    fn set_data_category(&self, column: &ColumnName, category: &str) -> Result<()>;
    fn set_param(&self, name: &str, value: &str) -> Result<()>;

    fn show_data_sources(&self) -> Result<ShowResult>;
    fn show_schemas(&self, data_source: Option<&str>, schema_pattern: Option<&str>) -> Result<ShowResult>;
    fn show_tables(
        &self,
        data_source: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
    ) -> Result<ShowResult>;
    fn show_columns(
        &self,
        data_source: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
        column_pattern: Option<&str>,
    ) -> Result<ShowResult>;
    fn show_all_users(&self) -> Result<ShowResult>;
    fn show_object_privileges(&self, user: &str) -> Result<ShowResult>;
    fn show_comments(
        &self,
        comment_pattern: Option<&str>,
        data_source_pattern: Option<&str>,
        schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
        column_pattern: Option<&str>,
    ) -> Result<ShowResult>;
}

/// Route one command to the runner. SHOW commands return their rows.
pub fn dispatch(runner: &dyn CatalogRunner, command: &AdminCommand) -> Result<Option<ShowResult>> {
    debug!("dispatching admin command: {:?}", command);
    let done = |r: Result<()>| -> Result<Option<ShowResult>> { r.map(|_| None) };
    match command {
        AdminCommand::AddDataSource { name, url, driver } => {
            done(runner.add_data_source(name, url, driver.as_deref()))
        }
        AdminCommand::DropDataSource { name } => done(runner.drop_data_source(name)),
        AdminCommand::UpdateDataSource { name } => done(runner.update_data_source(name)),
        AdminCommand::UpdateSchema { data_source, schema_pattern } => {
            done(runner.update_schema(data_source, schema_pattern))
        }
        AdminCommand::UpdateTable { data_source, schema, table_pattern } => {
            done(runner.update_table(data_source, schema, table_pattern))
        }
        AdminCommand::CreateUser { name, password } => done(runner.create_user(name, password)),
        AdminCommand::AlterUser { name, password, old_password } => {
            done(runner.alter_user(name, password, old_password.as_deref()))
        }
        AdminCommand::DropUser { name } => done(runner.drop_user(name)),
        AdminCommand::CreateRole { name } => done(runner.create_role(name)),
        AdminCommand::DropRole { name } => done(runner.drop_role(name)),
        AdminCommand::GrantSystemPrivileges { privileges, grantees } => {
            done(runner.grant_system_privileges(privileges, grantees))
        }
        AdminCommand::RevokeSystemPrivileges { privileges, revokees } => {
            done(runner.revoke_system_privileges(privileges, revokees))
        }
        AdminCommand::GrantObjectPrivileges { privileges, data_source, schema, grantees } => {
            done(runner.grant_object_privileges(privileges, data_source, schema, grantees))
        }
        AdminCommand::RevokeObjectPrivileges { privileges, data_source, schema, revokees } => {
            done(runner.revoke_object_privileges(privileges, data_source, schema, revokees))
        }
        AdminCommand::CommentOn { target, comment } => done(runner.comment_on(target, comment)),
        AdminCommand::SetDataCategory { column, category } => done(runner.set_data_category(column, category)),
        AdminCommand::SetParam { name, value } => done(runner.set_param(name, value)),
        AdminCommand::ShowDataSources => runner.show_data_sources().map(Some),
        AdminCommand::ShowSchemas { data_source, schema_pattern } => runner
            .show_schemas(data_source.as_deref(), schema_pattern.as_deref())
            .map(Some),
        AdminCommand::ShowTables { data_source, schema_pattern, table_pattern } => runner
            .show_tables(data_source.as_deref(), schema_pattern.as_deref(), table_pattern.as_deref())
            .map(Some),
        AdminCommand::ShowColumns { data_source, schema_pattern, table_pattern, column_pattern } => runner
            .show_columns(
                data_source.as_deref(),
                schema_pattern.as_deref(),
                table_pattern.as_deref(),
                column_pattern.as_deref(),
            )
            .map(Some),
        AdminCommand::ShowAllUsers => runner.show_all_users().map(Some),
        AdminCommand::ShowObjectPrivileges { user } => runner.show_object_privileges(user).map(Some),
        AdminCommand::ShowComments {
            comment_pattern,
            data_source_pattern,
            schema_pattern,
            table_pattern,
            column_pattern,
        } => runner
            .show_comments(
                comment_pattern.as_deref(),
                data_source_pattern.as_deref(),
                schema_pattern.as_deref(),
                table_pattern.as_deref(),
                column_pattern.as_deref(),
            )
            .map(Some),
    }
}

/// Run commands in order, stopping at the first failure. Commands that ran
/// before the failure stay applied. The rows of the last SHOW command, if
/// any, are returned.
pub fn run_all(runner: &dyn CatalogRunner, commands: &[AdminCommand]) -> Result<Option<ShowResult>> {
    let mut last = None;
    for command in commands {
        if let Some(result) = dispatch(runner, command)? {
            last = Some(result);
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::command::{DATASOURCE_COLUMNS, USER_COLUMNS};
    use crate::OctopusError;
    use std::cell::RefCell;

    /// Records the calls it receives; fails on DROP USER.
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, call: String) -> Result<()> {
            self.calls.borrow_mut().push(call);
            Ok(())
        }
    }

    impl CatalogRunner for Recorder {
        fn add_data_source(&self, name: &str, url: &str, _driver: Option<&str>) -> Result<()> {
            self.record(format!("add {name} {url}"))
        }
        fn drop_data_source(&self, name: &str) -> Result<()> {
            self.record(format!("drop ds {name}"))
        }
        fn update_data_source(&self, name: &str) -> Result<()> {
            self.record(format!("update {name}"))
        }
        fn update_schema(&self, data_source: &str, schema_pattern: &str) -> Result<()> {
            self.record(format!("update schema {data_source} {schema_pattern}"))
        }
        fn update_table(&self, data_source: &str, schema: &str, table_pattern: &str) -> Result<()> {
            self.record(format!("update table {data_source} {schema} {table_pattern}"))
        }
        fn create_user(&self, name: &str, _password: &str) -> Result<()> {
            self.record(format!("create user {name}"))
        }
        fn alter_user(&self, name: &str, _password: &str, _old: Option<&str>) -> Result<()> {
            self.record(format!("alter user {name}"))
        }
        fn drop_user(&self, name: &str) -> Result<()> {
            Err(OctopusError::UndefinedObject(format!("user \"{name}\" does not exist")))
        }
        fn create_role(&self, name: &str) -> Result<()> {
            self.record(format!("create role {name}"))
        }
        fn drop_role(&self, name: &str) -> Result<()> {
            self.record(format!("drop role {name}"))
        }
        fn grant_system_privileges(&self, p: &[SystemPrivilege], g: &[String]) -> Result<()> {
            self.record(format!("grant {} to {}", p.len(), g.join(",")))
        }
        fn revoke_system_privileges(&self, p: &[SystemPrivilege], r: &[String]) -> Result<()> {
            self.record(format!("revoke {} from {}", p.len(), r.join(",")))
        }
        fn grant_object_privileges(&self, _: &[ObjectPrivilege], ds: &str, s: &str, _: &[String]) -> Result<()> {
            self.record(format!("grant on {ds}.{s}"))
        }
        fn revoke_object_privileges(&self, _: &[ObjectPrivilege], ds: &str, s: &str, _: &[String]) -> Result<()> {
            self.record(format!("revoke on {ds}.{s}"))
        }
        fn comment_on(&self, target: &CommentTarget, _comment: &str) -> Result<()> {
            self.record(format!("comment {}", target.kind()))
        }
        fn set_data_category(&self, column: &ColumnName, _category: &str) -> Result<()> {
            self.record(format!("category {column}"))
        }
        fn set_param(&self, name: &str, value: &str) -> Result<()> {
            self.record(format!("set {name}={value}"))
        }
        fn show_data_sources(&self) -> Result<ShowResult> {
            Ok(ShowResult::new(DATASOURCE_COLUMNS))
        }
        fn show_schemas(&self, _: Option<&str>, _: Option<&str>) -> Result<ShowResult> {
            unimplemented!()
        }
        fn show_tables(&self, _: Option<&str>, _: Option<&str>, _: Option<&str>) -> Result<ShowResult> {
            unimplemented!()
        }
        fn show_columns(&self, _: Option<&str>, _: Option<&str>, _: Option<&str>, _: Option<&str>) -> Result<ShowResult> {
            unimplemented!()
        }
        fn show_all_users(&self) -> Result<ShowResult> {
            Ok(ShowResult::new(USER_COLUMNS))
        }
        fn show_object_privileges(&self, _: &str) -> Result<ShowResult> {
            unimplemented!()
        }
        fn show_comments(
            &self,
            _: Option<&str>,
            _: Option<&str>,
            _: Option<&str>,
            _: Option<&str>,
            _: Option<&str>,
        ) -> Result<ShowResult> {
            unimplemented!()
        }
    }

    #[test]
    fn test_run_all_stops_at_first_failure() {
        let recorder = Recorder::default();
        let commands = vec![
            AdminCommand::CreateUser { name: "a".into(), password: "p".into() },
            AdminCommand::DropUser { name: "ghost".into() },
            AdminCommand::CreateRole { name: "r".into() },
        ];
        let err = run_all(&recorder, &commands).unwrap_err();
        assert!(matches!(err, OctopusError::UndefinedObject(_)));
        assert_eq!(*recorder.calls.borrow(), vec!["create user a".to_string()]);
    }

    #[test]
    fn test_last_show_wins() {
        let recorder = Recorder::default();
        let commands = vec![
            AdminCommand::ShowDataSources,
            AdminCommand::SetParam { name: "x".into(), value: "1".into() },
            AdminCommand::ShowAllUsers,
        ];
        let result = run_all(&recorder, &commands).unwrap().unwrap();
        assert_eq!(result.columns, USER_COLUMNS);
    }

    #[test]
    fn test_no_show_returns_none() {
        let recorder = Recorder::default();
        let commands = vec![AdminCommand::AddDataSource {
            name: "ds".into(),
            url: "jdbc:sqlite:/tmp/x.db".into(),
            driver: None,
        }];
        assert!(run_all(&recorder, &commands).unwrap().is_none());
        assert_eq!(*recorder.calls.borrow(), vec!["add ds jdbc:sqlite:/tmp/x.db".to_string()]);
    }
}
