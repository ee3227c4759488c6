use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemPrivilege {
    AlterSystem,
    SelectAnyTable,
    CreateUser,
    AlterUser,
    DropUser,
    CommentAny,
    GrantAnyObjectPrivilege,
    GrantAnyPrivilege,
}

impl SystemPrivilege {
    /// What `ALL PRIVILEGES` expands to.
    pub const ALL: [SystemPrivilege; 8] = [
        SystemPrivilege::AlterSystem,
        SystemPrivilege::SelectAnyTable,
        SystemPrivilege::CreateUser,
        SystemPrivilege::AlterUser,
        SystemPrivilege::DropUser,
        SystemPrivilege::CommentAny,
        SystemPrivilege::GrantAnyObjectPrivilege,
        SystemPrivilege::GrantAnyPrivilege,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemPrivilege::AlterSystem => "ALTER SYSTEM",
            SystemPrivilege::SelectAnyTable => "SELECT ANY TABLE",
            SystemPrivilege::CreateUser => "CREATE USER",
            SystemPrivilege::AlterUser => "ALTER USER",
            SystemPrivilege::DropUser => "DROP USER",
            SystemPrivilege::CommentAny => "COMMENT ANY",
            SystemPrivilege::GrantAnyObjectPrivilege => "GRANT ANY OBJECT PRIVILEGE",
            SystemPrivilege::GrantAnyPrivilege => "GRANT ANY PRIVILEGE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectPrivilege {
    Select,
    Comment,
}

impl ObjectPrivilege {
    pub const ALL: [ObjectPrivilege; 2] = [ObjectPrivilege::Select, ObjectPrivilege::Comment];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectPrivilege::Select => "SELECT",
            ObjectPrivilege::Comment => "COMMENT",
        }
    }
}

/// `datasource.schema.table.column` as written in COMMENT ON COLUMN and
/// SET DATACATEGORY.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnName {
    pub data_source: String,
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.data_source, self.schema, self.table, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommentTarget {
    DataSource(String),
    Schema { data_source: String, schema: String },
    Table { data_source: String, schema: String, table: String },
    Column(ColumnName),
    User(String),
}

impl CommentTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            CommentTarget::DataSource(_) => "DATASOURCE",
            CommentTarget::Schema { .. } => "SCHEMA",
            CommentTarget::Table { .. } => "TABLE",
            CommentTarget::Column(_) => "COLUMN",
            CommentTarget::User(_) => "USER",
        }
    }
}

/// One statement of the administrative dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    AddDataSource {
        name: String,
        url: String,
        driver: Option<String>,
    },
    DropDataSource {
        name: String,
    },
    UpdateDataSource {
        name: String,
    },
    UpdateSchema {
        data_source: String,
        schema_pattern: String,
    },
    UpdateTable {
        data_source: String,
        schema: String,
        table_pattern: String,
    },
    CreateUser {
        name: String,
        password: String,
    },
    AlterUser {
        name: String,
        password: String,
        old_password: Option<String>,
    },
    DropUser {
        name: String,
    },
    CreateRole {
        name: String,
    },
    DropRole {
        name: String,
    },
    GrantSystemPrivileges {
        privileges: Vec<SystemPrivilege>,
        grantees: Vec<String>,
    },
    RevokeSystemPrivileges {
        privileges: Vec<SystemPrivilege>,
        revokees: Vec<String>,
    },
    GrantObjectPrivileges {
        privileges: Vec<ObjectPrivilege>,
        data_source: String,
        schema: String,
        grantees: Vec<String>,
    },
    RevokeObjectPrivileges {
        privileges: Vec<ObjectPrivilege>,
        data_source: String,
        schema: String,
        revokees: Vec<String>,
    },
    ShowDataSources,
    ShowSchemas {
        data_source: Option<String>,
        schema_pattern: Option<String>,
    },
    ShowTables {
        data_source: Option<String>,
        schema_pattern: Option<String>,
        table_pattern: Option<String>,
    },
    ShowColumns {
        data_source: Option<String>,
        schema_pattern: Option<String>,
        table_pattern: Option<String>,
        column_pattern: Option<String>,
    },
    ShowAllUsers,
    ShowObjectPrivileges {
        user: String,
    },
    ShowComments {
        comment_pattern: Option<String>,
        data_source_pattern: Option<String>,
        schema_pattern: Option<String>,
        table_pattern: Option<String>,
        column_pattern: Option<String>,
    },
    CommentOn {
        target: CommentTarget,
        comment: String,
    },
    SetDataCategory {
        column: ColumnName,
        category: String,
    },
    SetParam {
        name: String,
        value: String,
    },
}

pub const DATASOURCE_COLUMNS: &[&str] = &["TABLE_CAT", "DRIVER", "URL", "REMARKS"];
pub const SCHEMA_COLUMNS: &[&str] = &["TABLE_SCHEM", "TABLE_CATALOG", "REMARKS"];
pub const TABLE_COLUMNS: &[&str] = &["TABLE_CAT", "TABLE_SCHEM", "TABLE_NAME", "TABLE_TYPE", "REMARKS"];
pub const COLUMN_COLUMNS: &[&str] = &[
    "TABLE_CAT",
    "TABLE_SCHEM",
    "TABLE_NAME",
    "COLUMN_NAME",
    "TYPE_NAME",
    "ORDINAL_POSITION",
    "REMARKS",
    "DATA_CATEGORY",
];
pub const USER_COLUMNS: &[&str] = &["USER_NAME", "PRIVILEGES", "REMARKS"];
pub const OBJECT_PRIVILEGE_COLUMNS: &[&str] = &["TABLE_CAT", "TABLE_SCHEM", "PRIVILEGE"];
pub const COMMENT_COLUMNS: &[&str] = &[
    "OBJECT_TYPE",
    "TABLE_CAT",
    "TABLE_SCHEM",
    "TABLE_NAME",
    "COLUMN_NAME",
    "REMARKS",
];

impl AdminCommand {
    /// Column names of the rows a SHOW command returns, `None` for commands
    /// that return nothing.
    pub fn result_columns(&self) -> Option<&'static [&'static str]> {
        match self {
            AdminCommand::ShowDataSources => Some(DATASOURCE_COLUMNS),
            AdminCommand::ShowSchemas { .. } => Some(SCHEMA_COLUMNS),
            AdminCommand::ShowTables { .. } => Some(TABLE_COLUMNS),
            AdminCommand::ShowColumns { .. } => Some(COLUMN_COLUMNS),
            AdminCommand::ShowAllUsers => Some(USER_COLUMNS),
            AdminCommand::ShowObjectPrivileges { .. } => Some(OBJECT_PRIVILEGE_COLUMNS),
            AdminCommand::ShowComments { .. } => Some(COMMENT_COLUMNS),
            _ => None,
        }
    }
}

impl AdminCommand {
    /// CommandComplete tag reported for a command that returns no rows.
    pub fn tag(&self) -> &'static str {
        match self {
            AdminCommand::AddDataSource { .. }
            | AdminCommand::DropDataSource { .. }
            | AdminCommand::UpdateDataSource { .. }
            | AdminCommand::UpdateSchema { .. }
            | AdminCommand::UpdateTable { .. } => "ALTER SYSTEM",
            AdminCommand::CreateUser { .. } => "CREATE USER",
            AdminCommand::AlterUser { .. } => "ALTER USER",
            AdminCommand::DropUser { .. } => "DROP USER",
            AdminCommand::CreateRole { .. } => "CREATE ROLE",
            AdminCommand::DropRole { .. } => "DROP ROLE",
            AdminCommand::GrantSystemPrivileges { .. } | AdminCommand::GrantObjectPrivileges { .. } => "GRANT",
            AdminCommand::RevokeSystemPrivileges { .. } | AdminCommand::RevokeObjectPrivileges { .. } => "REVOKE",
            AdminCommand::CommentOn { .. } => "COMMENT",
            AdminCommand::SetDataCategory { .. } | AdminCommand::SetParam { .. } => "SET",
            AdminCommand::ShowDataSources
            | AdminCommand::ShowSchemas { .. }
            | AdminCommand::ShowTables { .. }
            | AdminCommand::ShowColumns { .. }
            | AdminCommand::ShowAllUsers
            | AdminCommand::ShowObjectPrivileges { .. }
            | AdminCommand::ShowComments { .. } => "SHOW",
        }
    }
}
