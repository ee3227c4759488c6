use crate::types::PgType;
use crate::{OctopusError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// Schema name used for backends without a schema namespace.
pub const DEFAULT_SCHEMA: &str = "__DEFAULT";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as reported by the backend, empty when untyped.
    pub type_name: String,
    pub pg_type: PgType,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Table,
    View,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Table => "TABLE",
            TableKind::View => "VIEW",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaInfo {
    pub name: String,
    pub tables: BTreeMap<String, TableInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceInfo {
    pub name: String,
    pub url: String,
    pub driver: String,
    pub schemas: BTreeMap<String, SchemaInfo>,
}

/// Canonical reference to a catalog table: `datasource.schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub data_source: String,
    pub schema: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.data_source, self.schema, self.table)
    }
}

/// One segment of a table name as written in a query.
#[derive(Debug, Clone, Copy)]
pub struct NamePart<'a> {
    pub value: &'a str,
    pub quoted: bool,
}

impl<'a> NamePart<'a> {
    pub fn new(value: &'a str, quoted: bool) -> Self {
        NamePart { value, quoted }
    }

    /// Quoted identifiers match exactly, bare ones ignore ASCII case.
    pub fn matches(&self, name: &str) -> bool {
        if self.quoted {
            self.value == name
        } else {
            self.value.eq_ignore_ascii_case(name)
        }
    }
}

/// Registered data sources with their schemas, tables and columns.
#[derive(Debug, Clone, Default)]
pub struct SchemaTree {
    data_sources: BTreeMap<String, DataSourceInfo>,
}

impl SchemaTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_source(&self, name: &str) -> Option<&DataSourceInfo> {
        self.data_sources.get(name)
    }

    pub fn data_source_mut(&mut self, name: &str) -> Option<&mut DataSourceInfo> {
        self.data_sources.get_mut(name)
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &DataSourceInfo> {
        self.data_sources.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.data_sources.contains_key(name)
    }

    pub fn insert(&mut self, data_source: DataSourceInfo) {
        self.data_sources.insert(data_source.name.clone(), data_source);
    }

    pub fn remove(&mut self, name: &str) -> Option<DataSourceInfo> {
        self.data_sources.remove(name)
    }

    pub fn schema(&self, data_source: &str, schema: &str) -> Option<&SchemaInfo> {
        self.data_sources.get(data_source)?.schemas.get(schema)
    }

    pub fn table(&self, table: &TableRef) -> Option<&TableInfo> {
        self.schema(&table.data_source, &table.schema)?
            .tables
            .get(&table.table)
    }

    fn tables(&self) -> impl Iterator<Item = (&DataSourceInfo, &SchemaInfo, &TableInfo)> {
        self.data_sources.values().flat_map(|ds| {
            ds.schemas
                .values()
                .flat_map(move |schema| schema.tables.values().map(move |table| (ds, schema, table)))
        })
    }

    /// Resolve a 1-, 2- or 3-part table name to its canonical reference.
    ///
    /// A single part searches every data source and schema. Two parts are
    /// tried as `schema.table` first, then as `datasource.table` within the
    /// default schema. Three parts must name an existing table exactly.
    pub fn resolve(&self, parts: &[NamePart<'_>]) -> Result<TableRef> {
        let candidates: Vec<TableRef> = match parts {
            [table] => self
                .tables()
                .filter(|(_, _, t)| table.matches(&t.name))
                .map(|(ds, s, t)| table_ref(ds, s, t))
                .collect(),
            [first, table] => {
                let as_schema: Vec<TableRef> = self
                    .tables()
                    .filter(|(_, s, t)| first.matches(&s.name) && table.matches(&t.name))
                    .map(|(ds, s, t)| table_ref(ds, s, t))
                    .collect();
                if as_schema.is_empty() {
                    self.tables()
                        .filter(|(ds, s, t)| {
                            first.matches(&ds.name) && s.name == DEFAULT_SCHEMA && table.matches(&t.name)
                        })
                        .map(|(ds, s, t)| table_ref(ds, s, t))
                        .collect()
                } else {
                    as_schema
                }
            }
            [data_source, schema, table] => self
                .tables()
                .filter(|(ds, s, t)| {
                    data_source.matches(&ds.name) && schema.matches(&s.name) && table.matches(&t.name)
                })
                .map(|(ds, s, t)| table_ref(ds, s, t))
                .collect(),
            _ => {
                return Err(OctopusError::UndefinedTable(format!(
                    "improper qualified name (too many dotted names): {}",
                    display_parts(parts)
                )));
            }
        };

        match candidates.as_slice() {
            [] => Err(OctopusError::UndefinedTable(format!(
                "relation \"{}\" does not exist",
                display_parts(parts)
            ))),
            [only] => Ok(only.clone()),
            _ => Err(OctopusError::Ambiguous(format!(
                "table reference \"{}\" is ambiguous: {}",
                display_parts(parts),
                candidates.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

fn table_ref(ds: &DataSourceInfo, schema: &SchemaInfo, table: &TableInfo) -> TableRef {
    TableRef {
        data_source: ds.name.clone(),
        schema: schema.name.clone(),
        table: table.name.clone(),
    }
}

fn display_parts(parts: &[NamePart<'_>]) -> String {
    parts.iter().map(|p| p.value).collect::<Vec<_>>().join(".")
}

/// A SQL LIKE pattern (`%` and `_`, backslash escapes) compiled to a regex.
#[derive(Debug, Clone)]
pub struct LikePattern(Regex);

impl LikePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut re = String::from("(?s)^");
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => re.push_str(".*"),
                '_' => re.push('.'),
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        re.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
                    }
                }
                other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        re.push('$');
        Regex::new(&re)
            .map(LikePattern)
            .map_err(|e| OctopusError::InvalidParameter(format!("invalid pattern '{pattern}': {e}")))
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }

    /// Compile an optional pattern; an absent pattern matches everything.
    pub fn optional(pattern: Option<&str>) -> Result<Option<Self>> {
        pattern.map(LikePattern::new).transpose()
    }
}

/// `true` when there is no pattern or the pattern matches.
pub fn matches_opt(pattern: &Option<LikePattern>, value: &str) -> bool {
    pattern.as_ref().is_none_or(|p| p.is_match(value))
}
