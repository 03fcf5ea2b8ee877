//! Storage-agnostic select filter.
//!
//! Conditions are chained with AND/OR; AND binds tighter than OR, so
//! `a AND b OR c` reads as `(a AND b) OR c`. Comparisons follow SQL NULL
//! semantics: every operator except `IsNull` is false against a NULL field.
//! The in-memory backend evaluates filters with [`QueryFilter::apply`], the
//! Postgres backend translates the same structure into a WHERE clause.

use core::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    In,
    NotIn,
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like => "LIKE",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

/// Value on either side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    Null,
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
    List(Vec<FilterValue>),
}

impl FilterValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }

    /// Ordering between two scalar values of the same kind.
    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (FilterValue::Text(a), FilterValue::Text(b)) => Some(a.cmp(b)),
            (FilterValue::Integer(a), FilterValue::Integer(b)) => Some(a.cmp(b)),
            (FilterValue::Timestamp(a), FilterValue::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting; NULL sorts first.
    fn sort_cmp(&self, other: &FilterValue) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(value: Vec<T>) -> Self {
        FilterValue::List(value.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Ignored on the first condition.
    pub connector: Connector,
    pub field: String,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Condition {
    fn evaluate(&self, actual: &FilterValue) -> bool {
        match self.operator {
            Operator::IsNull => actual.is_null(),
            Operator::IsNotNull => !actual.is_null(),
            _ if actual.is_null() => false,
            Operator::Equals => actual.compare(&self.value) == Some(Ordering::Equal),
            Operator::NotEquals => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Greater)
            ),
            Operator::GreaterThan => actual.compare(&self.value) == Some(Ordering::Greater),
            Operator::GreaterOrEqual => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThan => actual.compare(&self.value) == Some(Ordering::Less),
            Operator::LessOrEqual => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In => self.list().iter().any(|v| actual.compare(v) == Some(Ordering::Equal)),
            Operator::NotIn => !self.list().iter().any(|v| actual.compare(v) == Some(Ordering::Equal)),
            Operator::Like => match (actual, &self.value) {
                (FilterValue::Text(text), FilterValue::Text(pattern)) => like(text, pattern),
                _ => false,
            },
        }
    }

    fn list(&self) -> &[FilterValue] {
        match &self.value {
            FilterValue::List(values) => values,
            single => core::slice::from_ref(single),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// Entity fields a filter can address.
pub trait Filterable {
    /// `None` when the entity has no such field.
    fn field_value(&self, field: &str) -> Option<FilterValue>;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    pub conditions: Vec<Condition>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, field: &str, operator: Operator, value: impl Into<FilterValue>) -> Self {
        self.push(Connector::And, field, operator, value.into());
        self
    }

    pub fn or(mut self, field: &str, operator: Operator, value: impl Into<FilterValue>) -> Self {
        self.push(Connector::Or, field, operator, value.into());
        self
    }

    pub fn with_order(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn push(&mut self, connector: Connector, field: &str, operator: Operator, value: FilterValue) {
        self.conditions.push(Condition {
            connector,
            field: field.to_string(),
            operator,
            value,
        });
    }

    /// Conditions grouped into OR-separated AND groups.
    pub fn groups(&self) -> Vec<&[Condition]> {
        let mut groups = Vec::new();
        let mut start = 0;
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 && condition.connector == Connector::Or {
                groups.push(&self.conditions[start..i]);
                start = i;
            }
        }
        if start < self.conditions.len() {
            groups.push(&self.conditions[start..]);
        }
        groups
    }

    pub fn matches<E: Filterable>(&self, entity: &E) -> QueueResult<bool> {
        if self.conditions.is_empty() {
            return Ok(true);
        }
        for group in self.groups() {
            let mut all = true;
            for condition in group {
                let actual = field(entity, &condition.field)?;
                if !condition.evaluate(&actual) {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Filter, order and page a set of entities.
    pub fn apply<E, I>(&self, entities: I) -> QueueResult<Vec<E>>
    where
        E: Filterable,
        I: IntoIterator<Item = E>,
    {
        let mut selected = Vec::new();
        for entity in entities {
            if self.matches(&entity)? {
                selected.push(entity);
            }
        }

        if let Some((order_field, direction)) = &self.order_by {
            let mut keyed = Vec::with_capacity(selected.len());
            for entity in selected {
                keyed.push((field(&entity, order_field)?, entity));
            }
            keyed.sort_by(|(a, _), (b, _)| match direction {
                Direction::Asc => a.sort_cmp(b),
                Direction::Desc => b.sort_cmp(a),
            });
            selected = keyed.into_iter().map(|(_, entity)| entity).collect();
        }

        let paged = selected
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(paged)
    }
}

fn field<E: Filterable>(entity: &E, name: &str) -> QueueResult<FilterValue> {
    entity
        .field_value(name)
        .ok_or_else(|| QueueError::validation(format!("unknown filter field: {name}")))
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        name: &'static str,
        queue: Option<&'static str>,
        retries: i64,
    }

    impl Filterable for Row {
        fn field_value(&self, field: &str) -> Option<FilterValue> {
            match field {
                "name" => Some(self.name.into()),
                "queue" => Some(self.queue.into()),
                "retries" => Some(self.retries.into()),
                _ => None,
            }
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { name: "alpha", queue: Some("q1"), retries: 0 },
            Row { name: "beta", queue: Some("q2"), retries: 3 },
            Row { name: "gamma", queue: None, retries: 1 },
            Row { name: "delta", queue: Some("q1"), retries: 5 },
        ]
    }

    fn names(rows: Vec<Row>) -> Vec<&'static str> {
        rows.into_iter().map(|r| r.name).collect()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let filter = QueryFilter::new()
            .and("queue", Operator::Equals, "q1")
            .and("retries", Operator::GreaterThan, 1_i64)
            .or("name", Operator::Equals, "beta");

        assert_eq!(names(filter.apply(rows()).unwrap()), vec!["beta", "delta"]);
    }

    #[test]
    fn null_fields_only_match_null_checks() {
        let not_q1 = QueryFilter::new().and("queue", Operator::NotEquals, "q1");
        assert_eq!(names(not_q1.apply(rows()).unwrap()), vec!["beta"]);

        let null = QueryFilter::new().and("queue", Operator::IsNull, FilterValue::Null);
        assert_eq!(names(null.apply(rows()).unwrap()), vec!["gamma"]);
    }

    #[test]
    fn in_like_order_and_paging() {
        let filter = QueryFilter::new()
            .and("retries", Operator::In, vec![0_i64, 1, 5])
            .and("name", Operator::Like, "%a")
            .with_order("retries", Direction::Desc)
            .with_offset(1)
            .with_limit(1);

        // delta(5), gamma(1), alpha(0) -> skip one, take one
        assert_eq!(names(filter.apply(rows()).unwrap()), vec!["gamma"]);
    }

    #[test]
    fn unknown_field_is_a_validation_error() {
        let filter = QueryFilter::new().and("colour", Operator::Equals, "red");
        assert!(matches!(filter.apply(rows()), Err(QueueError::Validation(_))));
    }

    #[test]
    fn like_wildcards() {
        assert!(like("ScheduleCheckTask", "Schedule%"));
        assert!(like("abc", "a_c"));
        assert!(!like("abc", "a_"));
        assert!(like("", "%"));
        assert!(!like("abc", "abd"));
    }
}
