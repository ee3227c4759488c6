use crate::admin::command::{AdminCommand, ColumnName, CommentTarget, ObjectPrivilege, SystemPrivilege};
use crate::{OctopusError, Result};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

/// Parse `sql` as the administrative dialect.
///
/// Returns `Ok(None)` when the text is not administrative and should go to
/// the standard SQL parser. Once the leading keywords mark a statement as
/// administrative, any deviation from the grammar is a syntax error.
pub fn parse(sql: &str) -> Result<Option<Vec<AdminCommand>>> {
    let dialect = PostgreSqlDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, sql).tokenize() else {
        return Ok(None);
    };
    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect();

    let statements: Vec<&[Token]> = tokens
        .split(|t| *t == Token::SemiColon)
        .filter(|s| !s.is_empty())
        .collect();

    match statements.first() {
        Some(first) if is_admin(first) => {}
        _ => return Ok(None),
    }

    let mut commands = Vec::with_capacity(statements.len());
    for statement in statements {
        if !is_admin(statement) {
            return Err(OctopusError::Syntax(format!(
                "syntax error at or near \"{}\": administrative commands cannot be mixed with queries",
                statement[0]
            )));
        }
        let mut parser = AdminParser::new(statement);
        commands.push(parser.parse_command()?);
        parser.expect_end()?;
    }
    debug!("parsed {} administrative command(s)", commands.len());
    Ok(Some(commands))
}

fn keyword_at(tokens: &[Token], index: usize, keyword: &str) -> bool {
    matches!(tokens.get(index), Some(Token::Word(w)) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword))
}

/// Decide from the leading keywords whether a statement belongs to the
/// administrative dialect.
fn is_admin(tokens: &[Token]) -> bool {
    let kw = |index: usize, keyword: &str| keyword_at(tokens, index, keyword);
    if kw(0, "ALTER") {
        kw(1, "SYSTEM") || kw(1, "USER")
    } else if kw(0, "CREATE") || kw(0, "DROP") {
        kw(1, "USER") || kw(1, "ROLE")
    } else if kw(0, "GRANT") || kw(0, "REVOKE") {
        true
    } else if kw(0, "SHOW") {
        ["DATASOURCES", "SCHEMAS", "TABLES", "COLUMNS", "ALL", "OBJECT", "COMMENTS"]
            .iter()
            .any(|k| kw(1, k))
    } else if kw(0, "COMMENT") {
        kw(1, "ON")
    } else if kw(0, "SET") {
        kw(1, "DATACATEGORY") || matches!(tokens.get(2), Some(Token::Eq))
    } else {
        false
    }
}

enum Privileges {
    System(Vec<SystemPrivilege>),
    Object(Vec<ObjectPrivilege>),
}

struct AdminParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> AdminParser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        AdminParser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn error(&self) -> OctopusError {
        match self.peek() {
            Some(token) => OctopusError::Syntax(format!("syntax error at or near \"{token}\"")),
            None => OctopusError::Syntax("syntax error at end of input".to_string()),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        keyword_at(self.tokens, self.pos, keyword)
    }

    fn parse_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume the whole keyword sequence or nothing.
    fn parse_keywords(&mut self, keywords: &[&str]) -> bool {
        let matched = keywords
            .iter()
            .enumerate()
            .all(|(i, k)| keyword_at(self.tokens, self.pos + i, k));
        if matched {
            self.pos += keywords.len();
        }
        matched
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.parse_keyword(keyword) { Ok(()) } else { Err(self.error()) }
    }

    fn expect_keywords(&mut self, keywords: &[&str]) -> Result<()> {
        if self.parse_keywords(keywords) { Ok(()) } else { Err(self.error()) }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.peek().is_none() { Ok(()) } else { Err(self.error()) }
    }

    fn identifier(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Word(w)) => {
                self.pos += 1;
                Ok(w.value.clone())
            }
            _ => Err(self.error()),
        }
    }

    /// `a.b.c` with exactly `count` parts.
    fn qualified(&mut self, count: usize) -> Result<Vec<String>> {
        let mut parts = vec![self.identifier()?];
        while parts.len() < count {
            self.expect_token(&Token::Period)?;
            parts.push(self.identifier()?);
        }
        Ok(parts)
    }

    fn string(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::SingleQuotedString(s)) => {
                self.pos += 1;
                Ok(s.clone())
            }
            _ => Err(self.error()),
        }
    }

    fn optional_string(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::SingleQuotedString(s)) => {
                self.pos += 1;
                Some(s.clone())
            }
            _ => None,
        }
    }

    fn identifier_list(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.identifier()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            names.push(self.identifier()?);
        }
        Ok(names)
    }

    fn parse_command(&mut self) -> Result<AdminCommand> {
        if self.parse_keywords(&["ALTER", "SYSTEM"]) {
            self.parse_alter_system()
        } else if self.parse_keywords(&["CREATE", "USER"]) {
            let name = self.identifier()?;
            self.expect_keywords(&["IDENTIFIED", "BY"])?;
            let password = self.string()?;
            Ok(AdminCommand::CreateUser { name, password })
        } else if self.parse_keywords(&["ALTER", "USER"]) {
            let name = self.identifier()?;
            self.expect_keywords(&["IDENTIFIED", "BY"])?;
            let password = self.string()?;
            let old_password = if self.parse_keyword("REPLACE") { Some(self.string()?) } else { None };
            Ok(AdminCommand::AlterUser { name, password, old_password })
        } else if self.parse_keywords(&["DROP", "USER"]) {
            Ok(AdminCommand::DropUser { name: self.identifier()? })
        } else if self.parse_keywords(&["CREATE", "ROLE"]) {
            Ok(AdminCommand::CreateRole { name: self.identifier()? })
        } else if self.parse_keywords(&["DROP", "ROLE"]) {
            Ok(AdminCommand::DropRole { name: self.identifier()? })
        } else if self.parse_keyword("GRANT") {
            self.parse_grant_or_revoke(true)
        } else if self.parse_keyword("REVOKE") {
            self.parse_grant_or_revoke(false)
        } else if self.parse_keyword("SHOW") {
            self.parse_show()
        } else if self.parse_keywords(&["COMMENT", "ON"]) {
            self.parse_comment_on()
        } else if self.parse_keyword("SET") {
            self.parse_set()
        } else {
            Err(self.error())
        }
    }

    fn parse_alter_system(&mut self) -> Result<AdminCommand> {
        if self.parse_keywords(&["ADD", "DATASOURCE"]) {
            let name = self.identifier()?;
            self.expect_keywords(&["CONNECT", "TO"])?;
            let url = self.string()?;
            let driver = if self.parse_keyword("USING") { Some(self.string()?) } else { None };
            Ok(AdminCommand::AddDataSource { name, url, driver })
        } else if self.parse_keywords(&["DROP", "DATASOURCE"]) {
            Ok(AdminCommand::DropDataSource { name: self.identifier()? })
        } else if self.parse_keywords(&["UPDATE", "DATASOURCE"]) {
            Ok(AdminCommand::UpdateDataSource { name: self.identifier()? })
        } else if self.parse_keywords(&["UPDATE", "SCHEMA"]) {
            let data_source = self.identifier()?;
            self.expect_token(&Token::Period)?;
            let schema_pattern = self.string()?;
            Ok(AdminCommand::UpdateSchema { data_source, schema_pattern })
        } else if self.parse_keywords(&["UPDATE", "TABLE"]) {
            let data_source = self.identifier()?;
            self.expect_token(&Token::Period)?;
            let schema = self.identifier()?;
            self.expect_token(&Token::Period)?;
            let table_pattern = self.string()?;
            Ok(AdminCommand::UpdateTable { data_source, schema, table_pattern })
        } else {
            Err(self.error())
        }
    }

    fn parse_privilege(&mut self) -> Result<Privileges> {
        use Privileges::{Object, System};
        use SystemPrivilege as S;

        let parsed = if self.parse_keywords(&["ALL", "PRIVILEGES"]) {
            System(S::ALL.to_vec())
        } else if self.parse_keyword("ALL") {
            Object(ObjectPrivilege::ALL.to_vec())
        } else if self.parse_keywords(&["SELECT", "ANY", "TABLE"]) {
            System(vec![S::SelectAnyTable])
        } else if self.parse_keyword("SELECT") {
            Object(vec![ObjectPrivilege::Select])
        } else if self.parse_keywords(&["COMMENT", "ANY"]) {
            System(vec![S::CommentAny])
        } else if self.parse_keyword("COMMENT") {
            Object(vec![ObjectPrivilege::Comment])
        } else if self.parse_keywords(&["ALTER", "SYSTEM"]) {
            System(vec![S::AlterSystem])
        } else if self.parse_keywords(&["CREATE", "USER"]) {
            System(vec![S::CreateUser])
        } else if self.parse_keywords(&["ALTER", "USER"]) {
            System(vec![S::AlterUser])
        } else if self.parse_keywords(&["DROP", "USER"]) {
            System(vec![S::DropUser])
        } else if self.parse_keywords(&["GRANT", "ANY", "OBJECT", "PRIVILEGE"]) {
            System(vec![S::GrantAnyObjectPrivilege])
        } else if self.parse_keywords(&["GRANT", "ANY", "PRIVILEGE"]) {
            System(vec![S::GrantAnyPrivilege])
        } else {
            return Err(self.error());
        };
        Ok(parsed)
    }

    fn parse_grant_or_revoke(&mut self, grant: bool) -> Result<AdminCommand> {
        let mut system = Vec::new();
        let mut object = Vec::new();
        loop {
            match self.parse_privilege()? {
                Privileges::System(p) => system.extend(p),
                Privileges::Object(p) => object.extend(p),
            }
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        dedup(&mut system);
        dedup(&mut object);

        let direction = if grant { "TO" } else { "FROM" };
        if self.parse_keyword("ON") {
            if !system.is_empty() {
                return Err(OctopusError::Syntax(
                    "system privileges cannot be granted on a schema".to_string(),
                ));
            }
            let schema = self.qualified(2)?;
            self.expect_keyword(direction)?;
            let users = self.identifier_list()?;
            let (data_source, schema) = (schema[0].clone(), schema[1].clone());
            Ok(if grant {
                AdminCommand::GrantObjectPrivileges { privileges: object, data_source, schema, grantees: users }
            } else {
                AdminCommand::RevokeObjectPrivileges { privileges: object, data_source, schema, revokees: users }
            })
        } else {
            if !object.is_empty() {
                return Err(OctopusError::Syntax("object privileges require ON datasource.schema".to_string()));
            }
            self.expect_keyword(direction)?;
            let users = self.identifier_list()?;
            Ok(if grant {
                AdminCommand::GrantSystemPrivileges { privileges: system, grantees: users }
            } else {
                AdminCommand::RevokeSystemPrivileges { privileges: system, revokees: users }
            })
        }
    }

    fn optional_clause_identifier(&mut self, keyword: &str) -> Result<Option<String>> {
        if self.parse_keyword(keyword) { self.identifier().map(Some) } else { Ok(None) }
    }

    fn optional_clause_string(&mut self, keyword: &str) -> Result<Option<String>> {
        if self.parse_keyword(keyword) { self.string().map(Some) } else { Ok(None) }
    }

    fn parse_show(&mut self) -> Result<AdminCommand> {
        if self.parse_keyword("DATASOURCES") {
            Ok(AdminCommand::ShowDataSources)
        } else if self.parse_keyword("SCHEMAS") {
            Ok(AdminCommand::ShowSchemas {
                data_source: self.optional_clause_identifier("DATASOURCE")?,
                schema_pattern: self.optional_clause_string("SCHEMA")?,
            })
        } else if self.parse_keyword("TABLES") {
            Ok(AdminCommand::ShowTables {
                data_source: self.optional_clause_identifier("DATASOURCE")?,
                schema_pattern: self.optional_clause_string("SCHEMA")?,
                table_pattern: self.optional_clause_string("TABLE")?,
            })
        } else if self.parse_keyword("COLUMNS") {
            Ok(AdminCommand::ShowColumns {
                data_source: self.optional_clause_identifier("DATASOURCE")?,
                schema_pattern: self.optional_clause_string("SCHEMA")?,
                table_pattern: self.optional_clause_string("TABLE")?,
                column_pattern: self.optional_clause_string("COLUMN")?,
            })
        } else if self.parse_keywords(&["ALL", "USERS"]) {
            Ok(AdminCommand::ShowAllUsers)
        } else if self.parse_keywords(&["OBJECT", "PRIVILEGES", "FOR"]) {
            Ok(AdminCommand::ShowObjectPrivileges { user: self.identifier()? })
        } else if self.parse_keyword("COMMENTS") {
            Ok(AdminCommand::ShowComments {
                comment_pattern: self.optional_string(),
                data_source_pattern: self.optional_clause_string("DATASOURCE")?,
                schema_pattern: self.optional_clause_string("SCHEMA")?,
                table_pattern: self.optional_clause_string("TABLE")?,
                column_pattern: self.optional_clause_string("COLUMN")?,
            })
        } else {
            Err(self.error())
        }
    }

    fn column_name(&mut self) -> Result<ColumnName> {
        let mut parts = self.qualified(4)?.into_iter();
        let mut next = || parts.next().unwrap_or_default();
        Ok(ColumnName {
            data_source: next(),
            schema: next(),
            table: next(),
            column: next(),
        })
    }

    fn parse_comment_on(&mut self) -> Result<AdminCommand> {
        let target = if self.parse_keyword("DATASOURCE") {
            CommentTarget::DataSource(self.identifier()?)
        } else if self.parse_keyword("SCHEMA") {
            let parts = self.qualified(2)?;
            CommentTarget::Schema {
                data_source: parts[0].clone(),
                schema: parts[1].clone(),
            }
        } else if self.parse_keyword("TABLE") {
            let parts = self.qualified(3)?;
            CommentTarget::Table {
                data_source: parts[0].clone(),
                schema: parts[1].clone(),
                table: parts[2].clone(),
            }
        } else if self.parse_keyword("COLUMN") {
            CommentTarget::Column(self.column_name()?)
        } else if self.parse_keyword("USER") {
            CommentTarget::User(self.identifier()?)
        } else {
            return Err(self.error());
        };
        self.expect_keyword("IS")?;
        let comment = self.string()?;
        Ok(AdminCommand::CommentOn { target, comment })
    }

    fn parse_set(&mut self) -> Result<AdminCommand> {
        if self.parse_keywords(&["DATACATEGORY", "ON", "COLUMN"]) {
            let column = self.column_name()?;
            self.expect_keyword("IS")?;
            let category = self.string()?;
            return Ok(AdminCommand::SetDataCategory { column, category });
        }

        let name = self.identifier()?;
        self.expect_token(&Token::Eq)?;
        // The value is kept as written: a keyword, a number or a string.
        let mut value = String::new();
        while let Some(token) = self.peek() {
            match token {
                Token::SingleQuotedString(s) => value.push_str(s),
                Token::Word(w) => value.push_str(&w.value),
                Token::Number(n, _) => value.push_str(n),
                Token::Minus | Token::Plus | Token::Period => value.push_str(&token.to_string()),
                _ => return Err(self.error()),
            }
            self.pos += 1;
        }
        if value.is_empty() {
            return Err(self.error());
        }
        Ok(AdminCommand::SetParam { name, value })
    }
}

fn dedup<T: Ord>(items: &mut Vec<T>) {
    items.sort();
    items.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn one(sql: &str) -> AdminCommand {
        let mut commands = parse(sql).unwrap().expect("administrative statement");
        assert_eq!(commands.len(), 1);
        commands.remove(0)
    }

    #[test]
    fn test_standard_sql_is_not_admin() {
        assert!(parse("SELECT * FROM t").unwrap().is_none());
        assert!(parse("INSERT INTO t VALUES (1)").unwrap().is_none());
        assert!(parse("SHOW search_path").unwrap().is_none());
        assert!(parse("CREATE TABLE t (a int)").unwrap().is_none());
        assert!(parse("").unwrap().is_none());
    }

    #[test]
    fn test_add_datasource() {
        assert_eq!(
            one("ALTER SYSTEM ADD DATASOURCE \"bitnine\" CONNECT TO 'jdbc:sqlite:file::memory:?cache=shared' USING 'org.sqlite.JDBC'"),
            AdminCommand::AddDataSource {
                name: "bitnine".into(),
                url: "jdbc:sqlite:file::memory:?cache=shared".into(),
                driver: Some("org.sqlite.JDBC".into()),
            }
        );
        assert_eq!(
            one("alter system add datasource sales connect to '/tmp/sales.db'"),
            AdminCommand::AddDataSource {
                name: "sales".into(),
                url: "/tmp/sales.db".into(),
                driver: None,
            }
        );
    }

    #[test]
    fn test_update_commands() {
        assert_eq!(
            one("ALTER SYSTEM UPDATE TABLE \"bitnine\".\"octopus\".'table%'"),
            AdminCommand::UpdateTable {
                data_source: "bitnine".into(),
                schema: "octopus".into(),
                table_pattern: "table%".into(),
            }
        );
        assert_eq!(
            one("ALTER SYSTEM UPDATE SCHEMA bitnine.'oct%'"),
            AdminCommand::UpdateSchema {
                data_source: "bitnine".into(),
                schema_pattern: "oct%".into(),
            }
        );
    }

    #[test]
    fn test_users_and_roles() {
        assert_eq!(
            one("ALTER USER \"octopus\" IDENTIFIED BY 'new' REPLACE 'old'"),
            AdminCommand::AlterUser {
                name: "octopus".into(),
                password: "new".into(),
                old_password: Some("old".into()),
            }
        );
        assert_eq!(one("DROP ROLE \"octopus\""), AdminCommand::DropRole { name: "octopus".into() });
    }

    #[test]
    fn test_grant_system_privileges() {
        let cmd = one("GRANT ALTER SYSTEM, SELECT ANY TABLE, GRANT ANY OBJECT PRIVILEGE TO \"octopus\", \"junseok\"");
        assert_eq!(
            cmd,
            AdminCommand::GrantSystemPrivileges {
                privileges: vec![
                    SystemPrivilege::AlterSystem,
                    SystemPrivilege::SelectAnyTable,
                    SystemPrivilege::GrantAnyObjectPrivilege,
                ],
                grantees: vec!["octopus".into(), "junseok".into()],
            }
        );
        let AdminCommand::RevokeSystemPrivileges { privileges, .. } = one("REVOKE ALL PRIVILEGES FROM octopus") else {
            panic!("expected revoke");
        };
        assert_eq!(privileges.len(), SystemPrivilege::ALL.len());
    }

    #[test]
    fn test_grant_object_privileges() {
        assert_eq!(
            one("GRANT SELECT, COMMENT, ALL ON \"bitnine\".\"default\" TO \"octopus\""),
            AdminCommand::GrantObjectPrivileges {
                privileges: vec![ObjectPrivilege::Select, ObjectPrivilege::Comment],
                data_source: "bitnine".into(),
                schema: "default".into(),
                grantees: vec!["octopus".into()],
            }
        );
        assert!(matches!(
            parse("GRANT ALTER SYSTEM ON a.b TO u"),
            Err(OctopusError::Syntax(_))
        ));
    }

    #[test]
    fn test_show_commands() {
        assert_eq!(
            one("SHOW TABLES DATASOURCE \"data_source\" TABLE 'table%'"),
            AdminCommand::ShowTables {
                data_source: Some("data_source".into()),
                schema_pattern: None,
                table_pattern: Some("table%".into()),
            }
        );
        assert_eq!(
            one("SHOW COMMENTS '%comment' DATASOURCE 'data_source'"),
            AdminCommand::ShowComments {
                comment_pattern: Some("%comment".into()),
                data_source_pattern: Some("data_source".into()),
                schema_pattern: None,
                table_pattern: None,
                column_pattern: None,
            }
        );
        assert_eq!(
            one("SHOW OBJECT PRIVILEGES FOR \"octopus\""),
            AdminCommand::ShowObjectPrivileges { user: "octopus".into() }
        );
    }

    #[test]
    fn test_comment_and_category() {
        assert_eq!(
            one("COMMENT ON COLUMN \"bitnine\".\"default\".\"employee\".\"permanent\" IS 'comment'"),
            AdminCommand::CommentOn {
                target: CommentTarget::Column(ColumnName {
                    data_source: "bitnine".into(),
                    schema: "default".into(),
                    table: "employee".into(),
                    column: "permanent".into(),
                }),
                comment: "comment".into(),
            }
        );
        assert!(matches!(
            one("SET DATACATEGORY ON COLUMN a.b.c.d IS 'public'"),
            AdminCommand::SetDataCategory { .. }
        ));
    }

    #[test]
    fn test_set_param_values() {
        for (sql, expected) in [
            ("SET \"param_name\" = TRUE", "TRUE"),
            ("SET \"param_name\" = off", "off"),
            ("SET \"param_name\" = 7.7", "7.7"),
            ("SET \"param_name\" = 'octaline'", "octaline"),
        ] {
            assert_eq!(
                one(sql),
                AdminCommand::SetParam {
                    name: "param_name".into(),
                    value: expected.into(),
                }
            );
        }
    }

    #[test]
    fn test_multiple_statements() {
        let commands = parse("CREATE USER a IDENTIFIED BY 'x'; CREATE ROLE r;").unwrap().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            parse("CREATE USER a IDENTIFIED BY 'x'; SELECT 1"),
            Err(OctopusError::Syntax(_))
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("ALTER SYSTEM ADD DATASOURCE"), Err(OctopusError::Syntax(_))));
        assert!(matches!(parse("CREATE USER bob"), Err(OctopusError::Syntax(_))));
        assert!(matches!(parse("SHOW DATASOURCES extra"), Err(OctopusError::Syntax(_))));
    }
}
