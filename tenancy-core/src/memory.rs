use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::collection::{Collection, ID_COLUMN};
use crate::query::{sort_documents, Document, Filter, Pipeline, Query, Stage, Update};

/// In-memory collection for testing and development.
#[derive(Clone, Default)]
pub struct MemoryCollection {
    docs: Arc<RwLock<Vec<Document>>>,
    indexes: Arc<RwLock<Vec<String>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored document, unscoped. Test/diagnostic use only.
    pub fn snapshot(&self) -> Vec<Document> {
        self.docs.read().clone()
    }

    pub fn indexes(&self) -> Vec<String> {
        self.indexes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

fn page(mut docs: Vec<Document>, skip: Option<usize>, limit: Option<usize>) -> Vec<Document> {
    if let Some(n) = skip {
        docs = docs.into_iter().skip(n).collect();
    }
    if let Some(n) = limit {
        docs.truncate(n);
    }
    docs
}

fn project(doc: Document, columns: &[String]) -> Document {
    doc.into_iter()
        .filter(|(k, _)| columns.iter().any(|c| c == k))
        .collect()
}

fn group_count(docs: Vec<Document>, by: &str, count_as: &str) -> Vec<Document> {
    // keyed by the JSON text of the group value so output order is stable
    let mut groups: BTreeMap<String, (Value, u64)> = BTreeMap::new();
    for doc in docs {
        let key = doc.get(by).cloned().unwrap_or(Value::Null);
        let entry = groups.entry(key.to_string()).or_insert((key, 0));
        entry.1 += 1;
    }

    groups
        .into_values()
        .map(|(key, n)| {
            let mut out = Document::new();
            out.insert(ID_COLUMN.to_string(), key);
            out.insert(count_as.to_string(), Value::from(n));
            out
        })
        .collect()
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn find(&self, query: Query) -> Result<Vec<Document>> {
        let mut out: Vec<Document> = self
            .docs
            .read()
            .iter()
            .filter(|d| query.filter.matches(d))
            .cloned()
            .collect();

        sort_documents(&mut out, &query.sort);
        Ok(page(out, query.skip, query.limit))
    }

    async fn count(&self, filter: Filter) -> Result<u64> {
        let n = self.docs.read().iter().filter(|d| filter.matches(d)).count();
        Ok(n as u64)
    }

    async fn insert(&self, mut doc: Document) -> Result<Document> {
        // assign a primary key when the caller did not
        if !doc.contains_key(ID_COLUMN) {
            doc.insert(
                ID_COLUMN.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }
        self.docs.write().push(doc.clone());
        Ok(doc)
    }

    async fn update(&self, filter: Filter, update: Update) -> Result<u64> {
        let mut docs = self.docs.write();
        let mut n = 0;
        for doc in docs.iter_mut().filter(|d| filter.matches(d)) {
            update.apply(doc);
            n += 1;
        }
        Ok(n)
    }

    async fn remove(&self, filter: Filter) -> Result<u64> {
        let mut docs = self.docs.write();
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn aggregate(&self, pipeline: Pipeline) -> Result<Vec<Document>> {
        let mut docs = self.snapshot();

        for stage in pipeline.stages {
            docs = match stage {
                Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
                Stage::Sort(keys) => {
                    sort_documents(&mut docs, &keys);
                    docs
                }
                Stage::Skip(n) => page(docs, Some(n), None),
                Stage::Limit(n) => page(docs, None, Some(n)),
                Stage::Project(columns) => docs.into_iter().map(|d| project(d, &columns)).collect(),
                Stage::GroupCount { by, count_as } => group_count(docs, &by, &count_as),
            };
        }

        Ok(docs)
    }

    async fn ensure_index(&self, column: &str) -> Result<()> {
        let mut indexes = self.indexes.write();
        if !indexes.iter().any(|c| c == column) {
            indexes.push(column.to_string());
        }
        Ok(())
    }
}
