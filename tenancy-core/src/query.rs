//! Store-agnostic query model.
//!
//! Filters, updates and aggregation pipelines are plain data so that scope
//! plugins can inspect and rewrite them before any store sees them.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored record.
pub type Document = serde_json::Map<String, Value>;

/// Condition on a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Eq(Value),
    In(Vec<Value>),
    Exists(bool),
}

impl Condition {
    /// `Eq(null)` also matches a missing column.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => match value {
                Some(v) => v == expected,
                None => expected.is_null(),
            },
            Condition::In(options) => {
                let v = value.unwrap_or(&Value::Null);
                options.iter().any(|o| o == v)
            }
            Condition::Exists(should) => value.is_some() == *should,
        }
    }
}

/// Conjunction of per-column conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter(BTreeMap<String, Condition>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), Condition::Eq(value.into()));
        self
    }

    pub fn any_of<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.0.insert(column.into(), Condition::In(values));
        self
    }

    pub fn exists(mut self, column: impl Into<String>, should: bool) -> Self {
        self.0.insert(column.into(), Condition::Exists(should));
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, condition: Condition) {
        self.0.insert(column.into(), condition);
    }

    pub fn get(&self, column: &str) -> Option<&Condition> {
        self.0.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Narrow the filter to `column == value`, replacing any caller condition
    /// on that column.
    pub fn pin(&mut self, column: &str, value: &str) {
        self.0
            .insert(column.to_string(), Condition::Eq(Value::String(value.to_string())));
    }

    /// Whether the filter already pins `column` to exactly `value`.
    pub fn pins(&self, column: &str, value: &str) -> bool {
        matches!(self.0.get(column), Some(Condition::Eq(Value::String(v))) if v == value)
    }

    /// Move a condition keyed by `alias` under `column`.
    ///
    /// A condition already present under `column` wins.
    pub fn rename(&mut self, alias: &str, column: &str) {
        if let Some(cond) = self.0.remove(alias) {
            self.0.entry(column.to_string()).or_insert(cond);
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(column, cond)| cond.matches(doc.get(column)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub order: SortOrder,
}

/// Order documents by `keys`, first key most significant.
pub fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let ord = compare_values(a.get(&key.column), b.get(&key.column));
            let ord = match key.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn type_rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Read query: filter, ordering and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = self.filter.eq(column, value);
        self
    }

    pub fn sort_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey {
            column: column.into(),
            order,
        });
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

impl From<Filter> for Query {
    fn from(filter: Filter) -> Self {
        Query::new().filter(filter)
    }
}

/// `$set`-style partial update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Document,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(column.into(), value.into());
        self
    }

    pub fn apply(&self, doc: &mut Document) {
        for (k, v) in &self.set {
            doc.insert(k.clone(), v.clone());
        }
    }
}

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Sort(Vec<SortKey>),
    Skip(usize),
    Limit(usize),
    /// Keep only the listed columns.
    Project(Vec<String>),
    /// Group by `by` and count members into `count_as`.
    GroupCount { by: String, count_as: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn matching(self, filter: Filter) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn prepend(&mut self, stage: Stage) {
        self.stages.insert(0, stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether the leading run of `Match` stages already pins `column` to `value`.
    pub fn leading_match_pins(&self, column: &str, value: &str) -> bool {
        self.stages
            .iter()
            .map_while(|s| match s {
                Stage::Match(f) => Some(f),
                _ => None,
            })
            .any(|f| f.pins(column, value))
    }

    /// Apply `f` to every `Match` stage filter.
    pub fn for_each_match(&mut self, mut f: impl FnMut(&mut Filter)) {
        for stage in &mut self.stages {
            if let Stage::Match(filter) = stage {
                f(filter);
            }
        }
    }
}
