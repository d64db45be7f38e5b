//! Renders authorization predicates as SQLite `WHERE` fragments.

use std::collections::HashMap;

use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};

use crate::authz::{
    AuthorizationResource, Comparison, ConfigurationError, FieldPath, QueryBuilder, Relation, ResourceType,
};

/// Alias of the queried table in every generated statement.
pub const ROOT_ALIAS: &str = "t0";

/// Table of one resource kind. Attributes map 1:1 onto columns; dotted paths
/// go through `json_extract` on a JSON column.
#[derive(Debug, Clone)]
pub struct TableMapping {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub json_columns: &'static [&'static str],
}

impl TableMapping {
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            json_columns: &[],
        }
    }

    pub fn with_json_columns(mut self, json_columns: &'static [&'static str]) -> Self {
        self.json_columns = json_columns;
        self
    }

    pub fn column(&self, alias: &str, resource_type: ResourceType, field: &FieldPath) -> Result<String, ConfigurationError> {
        let root = field.root();
        if !self.columns.contains(&root) {
            return Err(ConfigurationError::UnmappedField {
                resource_type: resource_type.name().to_string(),
                field: field.to_string(),
            });
        }
        if field.nested().is_empty() {
            Ok(format!("{alias}.{root}"))
        } else if !self.json_columns.contains(&root) {
            Err(ConfigurationError::InvalidFieldPath(field.to_string()))
        } else {
            Ok(format!("json_extract({alias}.{root}, '$.{}')", field.nested().join(".")))
        }
    }

    /// `json_object(...)` expression rebuilding the serialized entity.
    pub fn json_object(&self, alias: &str) -> String {
        let pairs: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                if self.json_columns.contains(column) {
                    format!("'{column}', json({alias}.{column})")
                } else {
                    format!("'{column}', {alias}.{column}")
                }
            })
            .collect();
        format!("json_object({})", pairs.join(", "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableMappings {
    tables: HashMap<ResourceType, TableMapping>,
}

impl TableMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<T: AuthorizationResource>(mut self, mapping: TableMapping) -> Self {
        self.tables.insert(T::resource_type(), mapping);
        self
    }

    pub fn get(&self, resource_type: ResourceType) -> Result<&TableMapping, ConfigurationError> {
        self.tables.get(&resource_type).ok_or_else(|| ConfigurationError::UnmappedField {
            resource_type: resource_type.name().to_string(),
            field: "*".to_string(),
        })
    }
}

/// SQL text with positional `?` parameters, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl SqlFragment {
    fn constant(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            binds: Vec::new(),
        }
    }
}

pub struct SqlPredicateBuilder<'a> {
    mappings: &'a TableMappings,
    scopes: Vec<(ResourceType, String)>,
    next_alias: usize,
}

impl<'a> SqlPredicateBuilder<'a> {
    /// Builds predicates over `root`, aliased as [`ROOT_ALIAS`].
    pub fn new(mappings: &'a TableMappings, root: ResourceType) -> Self {
        Self {
            mappings,
            scopes: vec![(root, ROOT_ALIAS.to_string())],
            next_alias: 1,
        }
    }

    fn column(&self, field: &FieldPath) -> Result<String, ConfigurationError> {
        let (resource_type, alias) = self
            .scopes
            .last()
            .ok_or_else(|| ConfigurationError::invalid_condition("predicate rendered outside any table scope"))?;
        self.mappings.get(*resource_type)?.column(alias, *resource_type, field)
    }

    fn join(
        parts: Vec<Result<SqlFragment, ConfigurationError>>,
        separator: &str,
        empty: &str,
    ) -> Result<SqlFragment, ConfigurationError> {
        let parts = parts.into_iter().collect::<Result<Vec<_>, _>>()?;
        if parts.is_empty() {
            return Ok(SqlFragment::constant(empty));
        }
        let mut sql = Vec::with_capacity(parts.len());
        let mut binds = Vec::new();
        for part in parts {
            sql.push(format!("({})", part.sql));
            binds.extend(part.binds);
        }
        Ok(SqlFragment {
            sql: sql.join(separator),
            binds,
        })
    }
}

impl QueryBuilder for SqlPredicateBuilder<'_> {
    type Output = Result<SqlFragment, ConfigurationError>;

    fn literal(&mut self, value: bool) -> Self::Output {
        Ok(SqlFragment::constant(if value { "1 = 1" } else { "1 = 0" }))
    }

    fn and(&mut self, parts: Vec<Self::Output>) -> Self::Output {
        Self::join(parts, " AND ", "1 = 1")
    }

    fn or(&mut self, parts: Vec<Self::Output>) -> Self::Output {
        Self::join(parts, " OR ", "1 = 0")
    }

    fn compare(&mut self, field: &FieldPath, comparison: Comparison, value: &Value) -> Self::Output {
        let column = self.column(field)?;
        if value.is_null() {
            let sql = match comparison {
                Comparison::Equal => format!("{column} IS NULL"),
                Comparison::NotEqual => format!("{column} IS NOT NULL"),
                _ => "1 = 0".to_string(),
            };
            return Ok(SqlFragment { sql, binds: Vec::new() });
        }
        let guard = type_guard(&column, value);
        let sql = match comparison {
            Comparison::NotEqual => format!("{column} IS NOT NULL AND NOT ({guard} AND {column} = ?)"),
            other => format!("{guard} AND {column} {} ?", other.sql_operator()),
        };
        Ok(SqlFragment {
            sql,
            binds: vec![value.clone()],
        })
    }

    fn is_in(&mut self, field: &FieldPath, values: &[Value]) -> Self::Output {
        let column = self.column(field)?;
        let (numbers, texts): (Vec<Value>, Vec<Value>) = values
            .iter()
            .filter(|value| !value.is_null())
            .cloned()
            .partition(is_numeric);

        let mut parts = Vec::new();
        for group in [texts, numbers] {
            let Some(first) = group.first() else {
                continue;
            };
            let placeholders = vec!["?"; group.len()].join(", ");
            parts.push(Ok(SqlFragment {
                sql: format!("{} AND {column} IN ({placeholders})", type_guard(&column, first)),
                binds: group,
            }));
        }
        match parts.len() {
            1 => parts.remove(0),
            _ => Self::join(parts, " OR ", "1 = 0"),
        }
    }

    fn enter_subquery(&mut self, relation: &Relation) {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        self.scopes.push((relation.to, alias));
    }

    fn exists(&mut self, relation: &Relation, filter: Self::Output) -> Self::Output {
        let (inner_type, inner_alias) = self
            .scopes
            .pop()
            .ok_or_else(|| ConfigurationError::invalid_condition("unbalanced subquery scope"))?;
        let filter = filter?;
        let inner = self.mappings.get(inner_type)?;
        let inner_column = inner.column(&inner_alias, inner_type, &relation.to_field)?;
        let outer_column = self.column(&relation.from_field)?;
        Ok(SqlFragment {
            sql: format!(
                "EXISTS (SELECT 1 FROM {} {inner_alias} WHERE {inner_column} = {outer_column} AND ({}))",
                inner.table, filter.sql
            ),
            binds: filter.binds,
        })
    }
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Number(_) | Value::Bool(_))
}

/// Restricts a comparison to stored values of the bound value's kind, so
/// column affinity never turns `'5' = 5` into a match.
fn type_guard(column: &str, value: &Value) -> String {
    if is_numeric(value) {
        format!("typeof({column}) IN ('integer', 'real')")
    } else {
        format!("typeof({column}) = 'text'")
    }
}

/// Binds JSON values as their closest SQLite type.
pub fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &'q [Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(flag) => query.bind(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => query.bind(integer),
                None => query.bind(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => query.bind(text.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::authz::Predicate;
    use crate::db::table_mappings;
    use crate::resources::{Document, Task};

    fn path(value: &str) -> FieldPath {
        FieldPath::parse(value).unwrap()
    }

    fn render(predicate: &Predicate) -> Result<SqlFragment, ConfigurationError> {
        let mappings = table_mappings();
        let mut builder = SqlPredicateBuilder::new(&mappings, Task::resource_type());
        predicate.build(&mut builder)
    }

    #[test]
    fn comparisons_bind_their_values() {
        let predicate = Predicate::equal(path("case_team"), "north")
            .and(Predicate::is_in(path("candidate_group"), vec![json!("a"), Value::Null, json!("b")]));
        let fragment = render(&predicate).unwrap();
        assert_eq!(
            fragment.sql,
            "(typeof(t0.case_team) = 'text' AND t0.case_team = ?) AND \
             (typeof(t0.candidate_group) = 'text' AND t0.candidate_group IN (?, ?))"
        );
        assert_eq!(fragment.binds, vec![json!("north"), json!("a"), json!("b")]);
    }

    #[test]
    fn comparisons_only_match_values_of_the_same_kind() {
        let fragment = render(&Predicate::equal(path("case_team"), 5)).unwrap();
        assert_eq!(fragment.sql, "typeof(t0.case_team) IN ('integer', 'real') AND t0.case_team = ?");

        let fragment = render(&Predicate::compare(path("case_team"), Comparison::NotEqual, json!(5))).unwrap();
        assert_eq!(
            fragment.sql,
            "t0.case_team IS NOT NULL AND NOT (typeof(t0.case_team) IN ('integer', 'real') AND t0.case_team = ?)"
        );

        let fragment = render(&Predicate::is_in(path("case_team"), vec![json!(5), json!("north"), json!(7)])).unwrap();
        assert_eq!(
            fragment.sql,
            "(typeof(t0.case_team) = 'text' AND t0.case_team IN (?)) OR \
             (typeof(t0.case_team) IN ('integer', 'real') AND t0.case_team IN (?, ?))"
        );
        assert_eq!(fragment.binds, vec![json!("north"), json!(5), json!(7)]);
    }

    #[test]
    fn null_comparisons_use_is_null() {
        let fragment = render(&Predicate::equal(path("assignee"), Value::Null)).unwrap();
        assert_eq!(fragment.sql, "t0.assignee IS NULL");
        assert!(fragment.binds.is_empty());
    }

    #[test]
    fn constants_render_as_tautologies() {
        assert_eq!(render(&Predicate::FALSE).unwrap().sql, "1 = 0");
        assert_eq!(render(&Predicate::TRUE).unwrap().sql, "1 = 1");
        assert_eq!(render(&Predicate::is_in(path("assignee"), vec![])).unwrap().sql, "1 = 0");
    }

    #[test]
    fn exists_renders_a_correlated_subquery() {
        let relation = Relation::new::<Task, Document>("document_id", "id").unwrap();
        let predicate = Predicate::exists(relation, Predicate::equal(path("content.region"), "eu"));
        let fragment = render(&predicate).unwrap();
        assert_eq!(
            fragment.sql,
            "EXISTS (SELECT 1 FROM documents t1 WHERE t1.id = t0.document_id AND \
             (typeof(json_extract(t1.content, '$.region')) = 'text' AND json_extract(t1.content, '$.region') = ?))"
        );
        assert_eq!(fragment.binds, vec![json!("eu")]);
    }

    #[test]
    fn unmapped_fields_are_rejected() {
        assert!(matches!(
            render(&Predicate::equal(path("priority"), 1)),
            Err(ConfigurationError::UnmappedField { .. })
        ));
    }

    #[test]
    fn dotted_paths_on_plain_columns_are_rejected() {
        assert_eq!(
            render(&Predicate::equal(path("case_team.name"), "north")).unwrap_err(),
            ConfigurationError::InvalidFieldPath("case_team.name".into())
        );
    }

    #[test]
    fn entities_are_rebuilt_with_json_object() {
        let mappings = table_mappings();
        let documents = mappings.get(Document::resource_type()).unwrap();
        assert_eq!(
            documents.json_object("t0"),
            "json_object('id', t0.id, 'definition_name', t0.definition_name, 'assignee', t0.assignee, 'team', t0.team, 'content', json(t0.content))"
        );
    }
}
