use crate::catalog::{SchemaTree, TableRef};
use crate::translator::table_name::{table_ref, TableNameTranslator};
use crate::types::PgType;
use crate::{OctopusError, Result};
use sqlparser::ast::{
    visit_expressions, AssignmentTarget, Expr, Ident, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value,
};
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// Highest `$n` a statement may use. ParameterDescription carries the count
/// in 16 bits.
pub const MAX_PARAMETERS: usize = u16::MAX as usize;

/// Work out the type of every `$n` placeholder in a fully qualified
/// statement.
///
/// A non-zero type sent by the client in Parse wins. Otherwise the type is
/// taken from a column the placeholder is compared with, assigned to or
/// inserted into. Placeholders with nothing to go on are text.
pub fn infer_param_types(tree: &SchemaTree, stmt: &Statement, hints: &[i32]) -> Result<Vec<i32>> {
    let tables = TableNameTranslator::tables(stmt);
    let lookup = |column: &Ident| column_type(tree, &tables, column);

    let mut inferred: BTreeMap<usize, PgType> = BTreeMap::new();
    let mut highest = 0usize;

    let _ = visit_expressions(stmt, |expr: &Expr| {
        if let Some(index) = placeholder_index(expr) {
            highest = highest.max(index);
        }
        match expr {
            Expr::BinaryOp { left, right, .. } => {
                pair(&mut inferred, left, right, &lookup);
                pair(&mut inferred, right, left, &lookup);
            }
            Expr::Between { expr, low, high, .. } => {
                pair(&mut inferred, expr, low, &lookup);
                pair(&mut inferred, expr, high, &lookup);
            }
            Expr::InList { expr, list, .. } => {
                for item in list {
                    pair(&mut inferred, expr, item, &lookup);
                }
            }
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                pair(&mut inferred, expr, pattern, &lookup);
            }
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });

    match stmt {
        Statement::Insert(insert) => {
            if let (TableObject::TableName(name), Some(source)) = (&insert.table, &insert.source) {
                let target = table_ref(name);
                if let (Some(target), SetExpr::Values(values)) = (target, source.body.as_ref()) {
                    let columns: Vec<Option<PgType>> = match tree.table(&target) {
                        Some(table) if insert.columns.is_empty() => {
                            table.columns.iter().map(|c| Some(c.pg_type)).collect()
                        }
                        Some(_) => insert
                            .columns
                            .iter()
                            .map(|c| column_type(tree, std::slice::from_ref(&target), c))
                            .collect(),
                        None => Vec::new(),
                    };
                    for row in &values.rows {
                        for (value, column) in row.iter().zip(columns.iter()) {
                            if let (Some(index), Some(ty)) = (placeholder_index(value), column) {
                                inferred.entry(index).or_insert(*ty);
                            }
                        }
                    }
                }
            }
        }
        Statement::Update { table, assignments, .. } => {
            let target = match &table.relation {
                TableFactor::Table { name, .. } => table_ref(name),
                _ => None,
            };
            if let Some(target) = target {
                for assignment in assignments {
                    let AssignmentTarget::ColumnName(name) = &assignment.target else {
                        continue;
                    };
                    let Some(ObjectNamePart::Identifier(column)) = name.0.last() else {
                        continue;
                    };
                    if let (Some(index), Some(ty)) = (
                        placeholder_index(&assignment.value),
                        column_type(tree, std::slice::from_ref(&target), column),
                    ) {
                        inferred.entry(index).or_insert(ty);
                    }
                }
            }
        }
        _ => {}
    }

    let count = highest.max(hints.len());
    if count > MAX_PARAMETERS {
        return Err(OctopusError::LimitExceeded(format!(
            "statement uses ${count}, at most {MAX_PARAMETERS} parameters are allowed"
        )));
    }
    Ok((1..=count)
        .map(|index| match hints.get(index - 1) {
            Some(&oid) if oid != 0 => oid,
            _ => inferred
                .get(&index)
                .copied()
                .filter(PgType::is_parameter_type)
                .unwrap_or(PgType::Text)
                .to_oid(),
        })
        .collect())
}

/// `$n` as a 1-based index.
fn placeholder_index(expr: &Expr) -> Option<usize> {
    let inner = match expr {
        Expr::Nested(inner) => inner.as_ref(),
        other => other,
    };
    match inner {
        Expr::Value(v) => match &v.value {
            Value::Placeholder(p) => p.strip_prefix('$')?.parse().ok().filter(|n| *n > 0),
            _ => None,
        },
        _ => None,
    }
}

fn column_ident(expr: &Expr) -> Option<&Ident> {
    match expr {
        Expr::Identifier(ident) => Some(ident),
        Expr::CompoundIdentifier(parts) => parts.last(),
        _ => None,
    }
}

/// Record the type of `column` for the placeholder in `other`, if that is
/// the shape of the pair.
fn pair<F>(inferred: &mut BTreeMap<usize, PgType>, column: &Expr, other: &Expr, lookup: &F)
where
    F: Fn(&Ident) -> Option<PgType>,
{
    if let (Some(ident), Some(index)) = (column_ident(column), placeholder_index(other)) {
        if let Some(ty) = lookup(ident) {
            inferred.entry(index).or_insert(ty);
        }
    }
}

fn column_type(tree: &SchemaTree, tables: &[TableRef], column: &Ident) -> Option<PgType> {
    tables
        .iter()
        .filter_map(|t| tree.table(t))
        .find_map(|table| {
            let found = if column.quote_style.is_some() {
                table.columns.iter().find(|c| c.name == column.value)
            } else {
                table.column(&column.value)
            };
            found.map(|c| c.pg_type)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::tests::sample_tree;
    use crate::translator::table_name::parse_single;

    fn infer(sql: &str, hints: &[i32]) -> Vec<i32> {
        let tree = sample_tree();
        let stmt = TableNameTranslator::to_fqn(&tree, &parse_single(sql).unwrap()).unwrap();
        infer_param_types(&tree, &stmt, hints).unwrap()
    }

    #[test]
    fn test_infer_from_comparison() {
        assert_eq!(
            infer("SELECT * FROM employees WHERE id = $1 AND name = $2", &[]),
            vec![PgType::Int4.to_oid(), PgType::Varchar.to_oid()]
        );
        assert_eq!(
            infer("SELECT * FROM sales.orders WHERE $1 < amount", &[]),
            vec![PgType::Float8.to_oid()]
        );
    }

    #[test]
    fn test_hints_win_and_default_is_text() {
        assert_eq!(
            infer("SELECT * FROM employees WHERE id = $1 OR $2 IS NULL", &[PgType::Int8.to_oid()]),
            vec![PgType::Int8.to_oid(), PgType::Text.to_oid()]
        );
    }

    #[test]
    fn test_infer_insert_and_update() {
        assert_eq!(
            infer("INSERT INTO employees (name, id) VALUES ($1, $2)", &[]),
            vec![PgType::Varchar.to_oid(), PgType::Int4.to_oid()]
        );
        assert_eq!(
            infer("UPDATE sales.orders SET amount = $1 WHERE id = $2", &[]),
            vec![PgType::Float8.to_oid(), PgType::Int4.to_oid()]
        );
    }

    #[test]
    fn test_no_placeholders() {
        assert!(infer("SELECT * FROM employees", &[]).is_empty());
    }

    #[test]
    fn test_placeholder_limit() {
        assert_eq!(infer("SELECT $65535", &[]).len(), MAX_PARAMETERS);

        let tree = sample_tree();
        for sql in ["SELECT $65536", "SELECT * FROM employees WHERE id = $2000000000"] {
            let stmt = TableNameTranslator::to_fqn(&tree, &parse_single(sql).unwrap()).unwrap();
            assert!(matches!(
                infer_param_types(&tree, &stmt, &[]),
                Err(OctopusError::LimitExceeded(_))
            ));
        }
    }
}
