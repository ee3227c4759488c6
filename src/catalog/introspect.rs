use crate::catalog::schema::{ColumnInfo, DataSourceInfo, SchemaInfo, TableInfo, TableKind, DEFAULT_SCHEMA};
use crate::types::PgType;
use crate::{OctopusError, Result};
use rusqlite::{Connection, OpenFlags};
use std::collections::BTreeMap;
use tracing::debug;

/// Driver name recorded for SQLite data sources.
pub const SQLITE_DRIVER: &str = "org.sqlite.JDBC";

/// Check the driver requested for a data source. Only SQLite backends can be
/// reached; anything else is rejected.
pub fn resolve_driver(url: &str, driver: Option<&str>) -> Result<String> {
    match driver {
        Some(d) if d == SQLITE_DRIVER || d.eq_ignore_ascii_case("sqlite") => Ok(SQLITE_DRIVER.to_string()),
        Some(d) => Err(OctopusError::NotSupported(format!("driver '{d}'"))),
        None if url.starts_with("jdbc:") && !url.starts_with("jdbc:sqlite:") => {
            Err(OctopusError::NotSupported(format!("connection string '{url}'")))
        }
        None => Ok(SQLITE_DRIVER.to_string()),
    }
}

/// Strip the `jdbc:sqlite:` or `sqlite:` prefix, leaving a path or a
/// `file:` URI that SQLite understands.
pub fn database_path(url: &str) -> &str {
    url.strip_prefix("jdbc:sqlite:")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

/// Open a connection to the backend behind `url`. The database must already
/// exist.
pub fn open_connection(url: &str) -> rusqlite::Result<Connection> {
    let path = database_path(url);
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
}

/// Read the table and column layout of a backend.
pub fn introspect(name: &str, url: &str, driver: &str) -> Result<DataSourceInfo> {
    let conn = open_connection(url).map_err(|e| OctopusError::Backend {
        message: format!("failed to connect to data source \"{name}\""),
        cause: e.to_string(),
    })?;

    let mut stmt = conn.prepare(
        "SELECT name, type FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
         ORDER BY name",
    )?;
    let relations = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tables = BTreeMap::new();
    for (table_name, kind) in relations {
        let columns = table_columns(&conn, &table_name)?;
        debug!("data source {}: {} {} with {} columns", name, kind, table_name, columns.len());
        tables.insert(
            table_name.clone(),
            TableInfo {
                name: table_name,
                kind: if kind == "view" { TableKind::View } else { TableKind::Table },
                columns,
            },
        );
    }

    let mut schemas = BTreeMap::new();
    schemas.insert(
        DEFAULT_SCHEMA.to_string(),
        SchemaInfo {
            name: DEFAULT_SCHEMA.to_string(),
            tables,
        },
    );

    Ok(DataSourceInfo {
        name: name.to_string(),
        url: url.to_string(),
        driver: driver.to_string(),
        schemas,
    })
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let pragma = format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\""));
    let mut stmt = conn.prepare(&pragma)?;
    let columns = stmt
        .query_map([], |row| {
            let cid: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let type_name: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
            Ok((cid, name, type_name))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(columns
        .into_iter()
        .map(|(cid, name, type_name)| {
            let decl = if type_name.is_empty() { None } else { Some(type_name.as_str()) };
            ColumnInfo {
                pg_type: PgType::from_decltype(decl),
                name,
                type_name,
                position: usize::try_from(cid).unwrap_or(0) + 1,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_driver() {
        assert_eq!(resolve_driver("jdbc:sqlite:/tmp/a.db", None).unwrap(), SQLITE_DRIVER);
        assert_eq!(resolve_driver("/tmp/a.db", Some("sqlite")).unwrap(), SQLITE_DRIVER);
        assert!(matches!(
            resolve_driver("jdbc:mysql://localhost/db", None),
            Err(OctopusError::NotSupported(_))
        ));
        assert!(matches!(
            resolve_driver("/tmp/a.db", Some("com.mysql.jdbc.Driver")),
            Err(OctopusError::NotSupported(_))
        ));
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("jdbc:sqlite:/data/x.db"), "/data/x.db");
        assert_eq!(database_path("sqlite:file:x.db?mode=ro"), "file:x.db?mode=ro");
        assert_eq!(database_path("/data/x.db"), "/data/x.db");
    }

    #[test]
    fn test_introspect_sqlite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name VARCHAR(20), price REAL);
             CREATE VIEW cheap AS SELECT id, name FROM items WHERE price < 10;",
        )
        .unwrap();
        drop(conn);

        let url = format!("jdbc:sqlite:{}", path.display());
        let ds = introspect("shop", &url, SQLITE_DRIVER).unwrap();
        let schema = &ds.schemas[DEFAULT_SCHEMA];
        let items = &schema.tables["items"];
        assert_eq!(items.kind, TableKind::Table);
        assert_eq!(items.columns.len(), 3);
        assert_eq!(items.columns[1].name, "name");
        assert_eq!(items.columns[1].pg_type, PgType::Varchar);
        assert_eq!(items.columns[2].position, 3);
        assert_eq!(schema.tables["cheap"].kind, TableKind::View);
    }

    #[test]
    fn test_introspect_missing_database() {
        let dir = TempDir::new().unwrap();
        let url = format!("jdbc:sqlite:{}", dir.path().join("absent.db").display());
        assert!(matches!(
            introspect("absent", &url, SQLITE_DRIVER),
            Err(OctopusError::Backend { .. })
        ));
    }
}
