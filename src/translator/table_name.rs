use crate::catalog::{NamePart, SchemaTree, TableRef, DEFAULT_SCHEMA};
use crate::{OctopusError, Result};
use sqlparser::ast::{
    visit_relations, visit_relations_mut, Ident, ObjectName, ObjectNamePart, Query, Statement, VisitMut, VisitorMut,
};
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use tracing::debug;

/// Rewrites table references between the catalog's fully qualified form
/// (`datasource.schema.table`) and the form the backend understands.
///
/// Both directions work on a copy: the input tree is never modified, so a
/// validated statement can be bound and executed any number of times.
pub struct TableNameTranslator;

impl TableNameTranslator {
    /// Resolve every table reference against the catalog and return a tree
    /// in which each one is fully qualified. A name bound by a WITH clause of
    /// an enclosing query is left alone.
    pub fn to_fqn(tree: &SchemaTree, stmt: &Statement) -> Result<Statement> {
        let mut translated = stmt.clone();
        let mut qualifier = Qualifier {
            tree,
            scopes: Vec::new(),
        };
        if let ControlFlow::Break(e) = VisitMut::visit(&mut translated, &mut qualifier) {
            return Err(e);
        }

        debug!("FQN translated: {}", translated);
        Ok(translated)
    }

    /// Strip the data source segment, and the schema segment when it is the
    /// default schema, from every fully qualified reference.
    pub fn to_dsn(stmt: &Statement) -> Statement {
        let mut translated = stmt.clone();
        let _ = visit_relations_mut(&mut translated, |name: &mut ObjectName| {
            if name.0.len() == 3 {
                name.0.remove(0);
                let default_schema = matches!(
                    &name.0[0],
                    ObjectNamePart::Identifier(ident) if ident.value == DEFAULT_SCHEMA
                );
                if default_schema {
                    name.0.remove(0);
                }
            }
            ControlFlow::<()>::Continue(())
        });
        translated
    }

    /// Distinct data sources referenced by a fully qualified tree.
    pub fn data_sources(stmt: &Statement) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let _ = visit_relations(stmt, |name: &ObjectName| {
            if let [ObjectNamePart::Identifier(ds), _, _] = name.0.as_slice() {
                names.insert(ds.value.clone());
            }
            ControlFlow::<()>::Continue(())
        });
        names
    }

    /// Fully qualified tables referenced by a translated tree.
    pub fn tables(stmt: &Statement) -> Vec<TableRef> {
        let mut tables = Vec::new();
        let _ = visit_relations(stmt, |name: &ObjectName| {
            if let Some(table) = table_ref(name) {
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
            ControlFlow::<()>::Continue(())
        });
        tables
    }
}

/// Read a 3-part object name back as a catalog reference.
pub fn table_ref(name: &ObjectName) -> Option<TableRef> {
    match name.0.as_slice() {
        [
            ObjectNamePart::Identifier(ds),
            ObjectNamePart::Identifier(schema),
            ObjectNamePart::Identifier(table),
        ] => Some(TableRef {
            data_source: ds.value.clone(),
            schema: schema.value.clone(),
            table: table.value.clone(),
        }),
        _ => None,
    }
}

fn part_of(ident: &Ident) -> NamePart<'_> {
    NamePart::new(&ident.value, ident.quote_style.is_some())
}

fn name_part(part: &ObjectNamePart) -> NamePart<'_> {
    match part {
        ObjectNamePart::Identifier(ident) => part_of(ident),
    }
}

fn fqn_object_name(table: &TableRef) -> ObjectName {
    ObjectName(
        [&table.data_source, &table.schema, &table.table]
            .into_iter()
            .map(|part| ObjectNamePart::Identifier(Ident::with_quote('"', part.as_str())))
            .collect(),
    )
}

/// Qualifies relations while tracking the CTE names visible at each point:
/// one scope per enclosing query.
struct Qualifier<'a> {
    tree: &'a SchemaTree,
    scopes: Vec<Vec<String>>,
}

impl Qualifier<'_> {
    fn is_cte(&self, ident: &Ident) -> bool {
        self.scopes
            .iter()
            .flatten()
            .any(|cte| part_of(ident).matches(cte))
    }
}

impl VisitorMut for Qualifier<'_> {
    type Break = OctopusError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        let names = query
            .with
            .as_ref()
            .map(|with| with.cte_tables.iter().map(|cte| cte.alias.name.value.clone()).collect())
            .unwrap_or_default();
        self.scopes.push(names);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, name: &mut ObjectName) -> ControlFlow<Self::Break> {
        if let [ObjectNamePart::Identifier(ident)] = name.0.as_slice() {
            if self.is_cte(ident) {
                return ControlFlow::Continue(());
            }
        }
        let parts: Vec<NamePart<'_>> = name.0.iter().map(name_part).collect();
        match self.tree.resolve(&parts) {
            Ok(table) => {
                *name = fqn_object_name(&table);
                ControlFlow::Continue(())
            }
            Err(e) => ControlFlow::Break(e),
        }
    }
}

/// Parse a single statement of standard SQL.
pub fn parse_single(sql: &str) -> Result<Statement> {
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(OctopusError::Syntax("empty query".to_string())),
        n => Err(OctopusError::NotSupported(format!(
            "{n} statements in one query string"
        ))),
    }
}
