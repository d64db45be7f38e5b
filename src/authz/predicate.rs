//! ORM-agnostic predicate tree.
//!
//! A compiled specification is a [`Predicate`] over the rows of one resource
//! type. It can be rendered into any query language through [`QueryBuilder`]
//! or evaluated directly against a materialized [`EvaluationRow`]; both paths
//! walk the same tree, which keeps single-entity checks and list filters in
//! agreement.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::error::ConfigurationError;
use super::resource::{AuthorizationResource, ResourceType};

/// Dotted attribute path, e.g. `content.team`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Every segment must match `[A-Za-z_][A-Za-z0-9_]*`, which also makes the
    /// path safe to splice into generated SQL.
    pub fn parse(path: &str) -> Result<Self, ConfigurationError> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().all(|segment| is_identifier(segment)) {
            Ok(Self { segments })
        } else {
            Err(ConfigurationError::InvalidFieldPath(path.to_string()))
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Segments after the root, for paths into a nested document.
    pub fn nested(&self) -> &[String] {
        &self.segments[1..]
    }

    pub fn resolve<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| current.as_object()?.get(segment))
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Join from rows of `from` to rows of `to` where `from.from_field = to.to_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub from: ResourceType,
    pub to: ResourceType,
    pub from_field: FieldPath,
    pub to_field: FieldPath,
}

impl Relation {
    pub fn new<A, B>(from_field: &str, to_field: &str) -> Result<Self, ConfigurationError>
    where
        A: AuthorizationResource,
        B: AuthorizationResource,
    {
        Ok(Self {
            from: A::resource_type(),
            to: B::resource_type(),
            from_field: FieldPath::parse(from_field)?,
            to_field: FieldPath::parse(to_field)?,
        })
    }

    fn key(&self) -> (ResourceType, ResourceType) {
        (self.from, self.to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl Comparison {
    pub const fn sql_operator(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Literal(bool),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare {
        field: FieldPath,
        comparison: Comparison,
        value: Value,
    },
    In {
        field: FieldPath,
        values: Vec<Value>,
    },
    /// Some row of `relation.to` joined to the current row satisfies `filter`.
    Exists {
        relation: Relation,
        filter: Box<Predicate>,
    },
}

impl Predicate {
    pub const TRUE: Self = Self::Literal(true);
    pub const FALSE: Self = Self::Literal(false);

    pub fn compare(field: FieldPath, comparison: Comparison, value: Value) -> Self {
        Self::Compare {
            field,
            comparison,
            value,
        }
    }

    pub fn equal(field: FieldPath, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Equal, value.into())
    }

    pub fn is_in(field: FieldPath, values: Vec<Value>) -> Self {
        Self::In { field, values }
    }

    pub fn exists(relation: Relation, filter: Predicate) -> Self {
        if filter.is_unsatisfiable() {
            return Self::FALSE;
        }
        Self::Exists {
            relation,
            filter: Box::new(filter),
        }
    }

    /// Conjunction with constant folding and flattening.
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flattened = Vec::new();
        for part in parts {
            match part {
                Self::Literal(true) => {}
                Self::Literal(false) => return Self::FALSE,
                Self::And(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }
        match flattened.len() {
            0 => Self::TRUE,
            1 => flattened.remove(0),
            _ => Self::And(flattened),
        }
    }

    /// Disjunction with constant folding and flattening.
    pub fn any(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flattened = Vec::new();
        for part in parts {
            match part {
                Self::Literal(false) => {}
                Self::Literal(true) => return Self::TRUE,
                Self::Or(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }
        match flattened.len() {
            0 => Self::FALSE,
            1 => flattened.remove(0),
            _ => Self::Or(flattened),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::all([self, other])
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::any([self, other])
    }

    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, Self::Literal(false))
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Literal(true))
    }

    pub fn build<Q: QueryBuilder + ?Sized>(&self, builder: &mut Q) -> Q::Output {
        match self {
            Self::Literal(value) => builder.literal(*value),
            Self::And(parts) => {
                let built = parts.iter().map(|part| part.build(builder)).collect();
                builder.and(built)
            }
            Self::Or(parts) => {
                let built = parts.iter().map(|part| part.build(builder)).collect();
                builder.or(built)
            }
            Self::Compare {
                field,
                comparison,
                value,
            } => builder.compare(field, *comparison, value),
            Self::In { field, values } => builder.is_in(field, values),
            Self::Exists { relation, filter } => {
                builder.enter_subquery(relation);
                let inner = filter.build(builder);
                builder.exists(relation, inner)
            }
        }
    }

    pub fn evaluate(&self, row: &EvaluationRow) -> bool {
        match self {
            Self::Literal(value) => *value,
            Self::And(parts) => parts.iter().all(|part| part.evaluate(row)),
            Self::Or(parts) => parts.iter().any(|part| part.evaluate(row)),
            Self::Compare {
                field,
                comparison,
                value,
            } => compare_attribute(field.resolve(&row.attributes), *comparison, value),
            Self::In { field, values } => match field.resolve(&row.attributes) {
                Some(attribute) if !attribute.is_null() => values
                    .iter()
                    .any(|candidate| !candidate.is_null() && values_equal(attribute, candidate)),
                _ => false,
            },
            Self::Exists { relation, filter } => row
                .related
                .get(&relation.key())
                .map(|rows| rows.iter().any(|related| filter.evaluate(related)))
                .unwrap_or(false),
        }
    }

    /// Subqueries reachable at this level, grouped per relation, each with the
    /// union of the filters applied to its rows.
    pub(crate) fn subqueries(&self) -> Vec<(&Relation, Predicate)> {
        let mut grouped: Vec<(&Relation, Vec<Predicate>)> = Vec::new();
        self.collect_subqueries(&mut grouped);
        grouped
            .into_iter()
            .map(|(relation, filters)| (relation, Predicate::any(filters)))
            .collect()
    }

    fn collect_subqueries<'a>(&'a self, grouped: &mut Vec<(&'a Relation, Vec<Predicate>)>) {
        match self {
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_subqueries(grouped);
                }
            }
            Self::Exists { relation, filter } => {
                let filter = filter.as_ref().clone();
                match grouped.iter_mut().find(|(existing, _)| existing.key() == relation.key()) {
                    Some((_, filters)) => filters.push(filter),
                    None => grouped.push((relation, vec![filter])),
                }
            }
            Self::Literal(_) | Self::Compare { .. } | Self::In { .. } => {}
        }
    }
}

/// SQL-like comparison: a missing or null attribute only matches a null value
/// through `Equal`, and ordering is defined for numbers and strings only.
fn compare_attribute(attribute: Option<&Value>, comparison: Comparison, value: &Value) -> bool {
    let attribute = attribute.filter(|attribute| !attribute.is_null());
    if value.is_null() {
        return match comparison {
            Comparison::Equal => attribute.is_none(),
            Comparison::NotEqual => attribute.is_some(),
            _ => false,
        };
    }
    let Some(attribute) = attribute else {
        return false;
    };
    match comparison {
        Comparison::Equal => values_equal(attribute, value),
        Comparison::NotEqual => !values_equal(attribute, value),
        ordering => match order_values(attribute, value) {
            Some(Ordering::Greater) => matches!(ordering, Comparison::GreaterThan | Comparison::GreaterThanOrEqual),
            Some(Ordering::Less) => matches!(ordering, Comparison::LessThan | Comparison::LessThanOrEqual),
            Some(Ordering::Equal) => {
                matches!(ordering, Comparison::GreaterThanOrEqual | Comparison::LessThanOrEqual)
            }
            None => false,
        },
    }
}

/// Numbers compare by value and booleans equal their 0/1 storage form. Text
/// never equals a number, matching the typed comparison the SQL renderer emits.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (numeric(left), numeric(right)) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn order_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => numeric(left)?.partial_cmp(&numeric(right)?),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Bool(flag) => Some(f64::from(u8::from(*flag))),
        _ => None,
    }
}

/// A candidate row plus the related rows its subqueries range over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationRow {
    attributes: Value,
    related: HashMap<(ResourceType, ResourceType), Vec<EvaluationRow>>,
}

impl EvaluationRow {
    pub fn new(attributes: Value) -> Self {
        Self {
            attributes,
            related: HashMap::new(),
        }
    }

    pub fn with_related(mut self, relation: &Relation, rows: Vec<EvaluationRow>) -> Self {
        self.insert_related(relation, rows);
        self
    }

    pub fn insert_related(&mut self, relation: &Relation, rows: Vec<EvaluationRow>) {
        self.related.insert(relation.key(), rows);
    }

    pub fn attributes(&self) -> &Value {
        &self.attributes
    }
}

/// Target of predicate rendering. `enter_subquery` is called before the
/// filter of an `Exists` node is built and `exists` closes that scope.
pub trait QueryBuilder {
    type Output;

    fn literal(&mut self, value: bool) -> Self::Output;
    fn and(&mut self, parts: Vec<Self::Output>) -> Self::Output;
    fn or(&mut self, parts: Vec<Self::Output>) -> Self::Output;
    fn compare(&mut self, field: &FieldPath, comparison: Comparison, value: &Value) -> Self::Output;
    fn is_in(&mut self, field: &FieldPath, values: &[Value]) -> Self::Output;
    fn enter_subquery(&mut self, relation: &Relation);
    fn exists(&mut self, relation: &Relation, filter: Self::Output) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::resources::{Document, Task};

    fn path(value: &str) -> FieldPath {
        FieldPath::parse(value).unwrap()
    }

    #[test]
    fn field_paths_reject_anything_but_identifiers() {
        assert!(FieldPath::parse("content.team").is_ok());
        assert!(FieldPath::parse("_private").is_ok());
        for invalid in ["", "a..b", "1st", "name'); drop", "a.b-c"] {
            assert_eq!(
                FieldPath::parse(invalid).unwrap_err(),
                ConfigurationError::InvalidFieldPath(invalid.to_string())
            );
        }
    }

    #[test]
    fn field_paths_resolve_nested_values() {
        let value = json!({ "content": { "team": "north" } });
        assert_eq!(path("content.team").resolve(&value), Some(&json!("north")));
        assert_eq!(path("content.owner").resolve(&value), None);
        assert_eq!(path("content.team.name").resolve(&value), None);
    }

    #[test]
    fn connectives_fold_constants() {
        let compare = Predicate::equal(path("assignee"), "alice");
        assert_eq!(Predicate::all(Vec::new()), Predicate::TRUE);
        assert_eq!(Predicate::any(Vec::new()), Predicate::FALSE);
        assert_eq!(compare.clone().and(Predicate::TRUE), compare);
        assert_eq!(compare.clone().and(Predicate::FALSE), Predicate::FALSE);
        assert_eq!(compare.clone().or(Predicate::TRUE), Predicate::TRUE);
        assert_eq!(compare.clone().or(Predicate::FALSE), compare);
    }

    #[test]
    fn nested_connectives_flatten() {
        let a = Predicate::equal(path("a"), 1);
        let b = Predicate::equal(path("b"), 2);
        let c = Predicate::equal(path("c"), 3);
        let combined = a.clone().and(b.clone()).and(c.clone());
        assert_eq!(combined, Predicate::And(vec![a, b, c]));
    }

    #[test]
    fn exists_with_unsatisfiable_filter_folds_to_false() {
        let relation = Relation::new::<Task, Document>("document_id", "id").unwrap();
        assert_eq!(Predicate::exists(relation, Predicate::FALSE), Predicate::FALSE);
    }

    #[test]
    fn null_comparisons_follow_sql_semantics() {
        let row = EvaluationRow::new(json!({ "assignee": null, "name": "review" }));
        assert!(Predicate::equal(path("assignee"), Value::Null).evaluate(&row));
        assert!(Predicate::equal(path("missing"), Value::Null).evaluate(&row));
        assert!(!Predicate::equal(path("assignee"), "alice").evaluate(&row));
        assert!(!Predicate::compare(path("assignee"), Comparison::NotEqual, json!("alice")).evaluate(&row));
        assert!(Predicate::compare(path("name"), Comparison::NotEqual, Value::Null).evaluate(&row));
    }

    #[test]
    fn ordering_comparisons() {
        let row = EvaluationRow::new(json!({ "version": 3, "key": "loan" }));
        assert!(Predicate::compare(path("version"), Comparison::GreaterThan, json!(2)).evaluate(&row));
        assert!(Predicate::compare(path("version"), Comparison::LessThanOrEqual, json!(3.0)).evaluate(&row));
        assert!(!Predicate::compare(path("version"), Comparison::LessThan, json!(3)).evaluate(&row));
        assert!(Predicate::compare(path("key"), Comparison::GreaterThanOrEqual, json!("a")).evaluate(&row));
        assert!(!Predicate::compare(path("key"), Comparison::GreaterThan, json!(1)).evaluate(&row));
    }

    #[test]
    fn in_ignores_null_candidates() {
        let row = EvaluationRow::new(json!({ "team": "north" }));
        assert!(Predicate::is_in(path("team"), vec![json!("south"), json!("north")]).evaluate(&row));
        assert!(!Predicate::is_in(path("team"), vec![]).evaluate(&row));
        let unassigned = EvaluationRow::new(json!({ "team": null }));
        assert!(!Predicate::is_in(path("team"), vec![Value::Null]).evaluate(&unassigned));
    }

    #[test]
    fn booleans_equal_their_integer_storage() {
        let row = EvaluationRow::new(json!({ "active": 1 }));
        assert!(Predicate::equal(path("active"), true).evaluate(&row));
    }

    #[test]
    fn text_never_equals_a_number() {
        let row = EvaluationRow::new(json!({ "case_team": "5" }));
        assert!(!Predicate::equal(path("case_team"), 5).evaluate(&row));
        assert!(!Predicate::is_in(path("case_team"), vec![json!(5)]).evaluate(&row));
        assert!(Predicate::compare(path("case_team"), Comparison::NotEqual, json!(5)).evaluate(&row));
        assert!(!Predicate::compare(path("case_team"), Comparison::GreaterThanOrEqual, json!(1)).evaluate(&row));
    }

    #[test]
    fn exists_ranges_over_related_rows() {
        let relation = Relation::new::<Task, Document>("document_id", "id").unwrap();
        let predicate = Predicate::exists(relation.clone(), Predicate::equal(path("team"), "north"));

        let related = EvaluationRow::new(json!({ "id": "d1", "team": "north" }));
        let row = EvaluationRow::new(json!({ "document_id": "d1" })).with_related(&relation, vec![related]);
        assert!(predicate.evaluate(&row));

        let unrelated = EvaluationRow::new(json!({ "document_id": "d2" })).with_related(&relation, vec![]);
        assert!(!predicate.evaluate(&unrelated));
        assert!(!predicate.evaluate(&EvaluationRow::new(json!({}))));
    }

    #[test]
    fn subqueries_are_grouped_per_relation() {
        let relation = Relation::new::<Task, Document>("document_id", "id").unwrap();
        let north = Predicate::equal(path("team"), "north");
        let south = Predicate::equal(path("team"), "south");
        let predicate = Predicate::any([
            Predicate::exists(relation.clone(), north.clone()),
            Predicate::exists(relation.clone(), south.clone()),
        ]);

        let subqueries = predicate.subqueries();
        assert_eq!(subqueries.len(), 1);
        assert_eq!(subqueries[0].1, Predicate::Or(vec![north, south]));
    }
}
