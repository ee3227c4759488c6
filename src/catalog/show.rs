use crate::admin::command::{
    ColumnName, CommentTarget, COLUMN_COLUMNS, COMMENT_COLUMNS, DATASOURCE_COLUMNS, OBJECT_PRIVILEGE_COLUMNS,
    SCHEMA_COLUMNS, TABLE_COLUMNS, USER_COLUMNS,
};
use crate::admin::dispatcher::ShowResult;
use crate::catalog::metastore::MetaStore;
use crate::catalog::schema::{matches_opt, DataSourceInfo, LikePattern, SchemaTree};
use crate::{OctopusError, Result};

fn selected<'a>(tree: &'a SchemaTree, data_source: Option<&str>) -> Result<Vec<&'a DataSourceInfo>> {
    match data_source {
        Some(name) => tree
            .data_source(name)
            .map(|ds| vec![ds])
            .ok_or_else(|| OctopusError::UndefinedObject(format!("data source \"{name}\" does not exist"))),
        None => Ok(tree.data_sources().collect()),
    }
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn comment(meta: &MetaStore, target: CommentTarget) -> Option<String> {
    meta.comment(&target).map(str::to_string)
}

pub(super) fn data_sources(tree: &SchemaTree, meta: &MetaStore) -> ShowResult {
    let mut result = ShowResult::new(DATASOURCE_COLUMNS);
    for ds in tree.data_sources() {
        result.rows.push(vec![
            text(&ds.name),
            text(&ds.driver),
            text(&ds.url),
            comment(meta, CommentTarget::DataSource(ds.name.clone())),
        ]);
    }
    result
}

pub(super) fn schemas(
    tree: &SchemaTree,
    meta: &MetaStore,
    data_source: Option<&str>,
    schema_pattern: Option<&str>,
) -> Result<ShowResult> {
    let schema_pattern = LikePattern::optional(schema_pattern)?;
    let mut result = ShowResult::new(SCHEMA_COLUMNS);
    for ds in selected(tree, data_source)? {
        for schema in ds.schemas.values().filter(|s| matches_opt(&schema_pattern, &s.name)) {
            result.rows.push(vec![
                text(&schema.name),
                text(&ds.name),
                comment(
                    meta,
                    CommentTarget::Schema {
                        data_source: ds.name.clone(),
                        schema: schema.name.clone(),
                    },
                ),
            ]);
        }
    }
    Ok(result)
}

pub(super) fn tables(
    tree: &SchemaTree,
    meta: &MetaStore,
    data_source: Option<&str>,
    schema_pattern: Option<&str>,
    table_pattern: Option<&str>,
) -> Result<ShowResult> {
    let schema_pattern = LikePattern::optional(schema_pattern)?;
    let table_pattern = LikePattern::optional(table_pattern)?;
    let mut result = ShowResult::new(TABLE_COLUMNS);
    for ds in selected(tree, data_source)? {
        for schema in ds.schemas.values().filter(|s| matches_opt(&schema_pattern, &s.name)) {
            for table in schema.tables.values().filter(|t| matches_opt(&table_pattern, &t.name)) {
                result.rows.push(vec![
                    text(&ds.name),
                    text(&schema.name),
                    text(&table.name),
                    text(table.kind.as_str()),
                    comment(
                        meta,
                        CommentTarget::Table {
                            data_source: ds.name.clone(),
                            schema: schema.name.clone(),
                            table: table.name.clone(),
                        },
                    ),
                ]);
            }
        }
    }
    Ok(result)
}

pub(super) fn columns(
    tree: &SchemaTree,
    meta: &MetaStore,
    data_source: Option<&str>,
    schema_pattern: Option<&str>,
    table_pattern: Option<&str>,
    column_pattern: Option<&str>,
) -> Result<ShowResult> {
    let schema_pattern = LikePattern::optional(schema_pattern)?;
    let table_pattern = LikePattern::optional(table_pattern)?;
    let column_pattern = LikePattern::optional(column_pattern)?;
    let mut result = ShowResult::new(COLUMN_COLUMNS);
    for ds in selected(tree, data_source)? {
        for schema in ds.schemas.values().filter(|s| matches_opt(&schema_pattern, &s.name)) {
            for table in schema.tables.values().filter(|t| matches_opt(&table_pattern, &t.name)) {
                for column in table.columns.iter().filter(|c| matches_opt(&column_pattern, &c.name)) {
                    let name = ColumnName {
                        data_source: ds.name.clone(),
                        schema: schema.name.clone(),
                        table: table.name.clone(),
                        column: column.name.clone(),
                    };
                    let category = meta.data_category(&name).map(str::to_string);
                    result.rows.push(vec![
                        text(&ds.name),
                        text(&schema.name),
                        text(&table.name),
                        text(&column.name),
                        text(&column.type_name),
                        Some(column.position.to_string()),
                        comment(meta, CommentTarget::Column(name)),
                        category,
                    ]);
                }
            }
        }
    }
    Ok(result)
}

pub(super) fn users(meta: &MetaStore) -> ShowResult {
    let mut result = ShowResult::new(USER_COLUMNS);
    for user in meta.users() {
        let privileges = user
            .system_privileges
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        result.rows.push(vec![
            text(&user.name),
            Some(privileges),
            comment(meta, CommentTarget::User(user.name.clone())),
        ]);
    }
    result
}

pub(super) fn object_privileges(meta: &MetaStore, user: &str) -> Result<ShowResult> {
    let mut result = ShowResult::new(OBJECT_PRIVILEGE_COLUMNS);
    for held in meta.object_privileges(user)? {
        result.rows.push(vec![
            text(&held.data_source),
            text(&held.schema),
            text(held.privilege.as_str()),
        ]);
    }
    Ok(result)
}

pub(super) fn comments(
    meta: &MetaStore,
    comment_pattern: Option<&str>,
    data_source_pattern: Option<&str>,
    schema_pattern: Option<&str>,
    table_pattern: Option<&str>,
    column_pattern: Option<&str>,
) -> Result<ShowResult> {
    let comment_pattern = LikePattern::optional(comment_pattern)?;
    let filters = [
        LikePattern::optional(data_source_pattern)?,
        LikePattern::optional(schema_pattern)?,
        LikePattern::optional(table_pattern)?,
        LikePattern::optional(column_pattern)?,
    ];

    let mut result = ShowResult::new(COMMENT_COLUMNS);
    for (target, remark) in meta.comments() {
        let path: [Option<&str>; 4] = match target {
            CommentTarget::DataSource(ds) => [Some(ds.as_str()), None, None, None],
            CommentTarget::Schema { data_source, schema } => {
                [Some(data_source.as_str()), Some(schema.as_str()), None, None]
            }
            CommentTarget::Table { data_source, schema, table } => {
                [Some(data_source.as_str()), Some(schema.as_str()), Some(table.as_str()), None]
            }
            CommentTarget::Column(c) => [
                Some(c.data_source.as_str()),
                Some(c.schema.as_str()),
                Some(c.table.as_str()),
                Some(c.column.as_str()),
            ],
            CommentTarget::User(_) => continue,
        };
        if !matches_opt(&comment_pattern, remark) {
            continue;
        }
        // A filter on a level the object does not have excludes it.
        let keep = filters.iter().zip(path.iter()).all(|(filter, part)| match (filter, part) {
            (None, _) => true,
            (Some(pattern), Some(value)) => pattern.is_match(value),
            (Some(_), None) => false,
        });
        if keep {
            let mut row = vec![text(target.kind())];
            row.extend(path.iter().map(|part| part.map(str::to_string)));
            row.push(text(remark));
            result.rows.push(row);
        }
    }
    Ok(result)
}
