//! Persistent record of analyses.

use crate::error::{Error, Result};
use crate::models::Analysis;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage for analysis records.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, analysis: &Analysis) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Analysis>>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Records whose title, pitch or category contains `text`
    /// (case-insensitive), newest first.
    async fn search(&self, text: &str, limit: usize, offset: usize) -> Result<Vec<Analysis>>;
}

/// In-process store, lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, Analysis>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

fn matches(analysis: &Analysis, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let idea = &analysis.request.idea;
    idea.title.to_lowercase().contains(needle)
        || idea.one_liner.to_lowercase().contains(needle)
        || idea
            .category
            .as_deref()
            .map_or(false, |c| c.to_lowercase().contains(needle))
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn put(&self, analysis: &Analysis) -> Result<()> {
        self.records
            .write()
            .await
            .insert(analysis.id, analysis.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Analysis>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn search(&self, text: &str, limit: usize, offset: usize) -> Result<Vec<Analysis>> {
        if limit == 0 {
            return Err(Error::Validation("search limit must be at least 1".to_string()));
        }
        let needle = text.trim().to_lowercase();

        let records = self.records.read().await;
        let mut found: Vec<&Analysis> = records.values().filter(|a| matches(a, &needle)).collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(found
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRequest, Idea};
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn analysis(title: &str, pitch: &str, age_minutes: i64) -> Analysis {
        let mut analysis = Analysis::new(AnalysisRequest::new(Idea::new(title, pitch)));
        analysis.created_at = analysis.created_at - Duration::minutes(age_minutes);
        analysis
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        let record = analysis("Loom", "Agentic coding assistant", 0);

        assert_ok!(store.put(&record).await);
        assert_eq!(store.get(record.id).await.unwrap(), Some(record.clone()));

        assert!(store.delete(record.id).await.unwrap());
        assert!(!store.delete(record.id).await.unwrap());
        assert_eq!(store.get(record.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let store = MemoryStore::new();
        let mut record = analysis("Loom", "Agentic coding assistant", 0);
        store.put(&record).await.unwrap();

        record.overall_score = Some(70);
        store.put(&record).await.unwrap();

        assert_eq!(store.count().await, 1);
        assert_eq!(
            store.get(record.id).await.unwrap().unwrap().overall_score,
            Some(70)
        );
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_newest_first() {
        let store = MemoryStore::new();
        let old = analysis("Loom", "Agentic coding assistant", 30);
        let new = analysis("Weave", "AI CODING reviewer", 5);
        let other = analysis("Brew", "Coffee subscription", 1);
        for record in [&old, &new, &other] {
            store.put(record).await.unwrap();
        }

        let found = store.search("coding", 10, 0).await.unwrap();
        let titles: Vec<_> = found.iter().map(|a| a.request.idea.title.as_str()).collect();
        assert_eq!(titles, vec!["Weave", "Loom"]);

        let page = store.search("coding", 1, 1).await.unwrap();
        assert_eq!(page[0].request.idea.title, "Loom");

        assert_eq!(store.search("", 10, 0).await.unwrap().len(), 3);
        assert_err!(store.search("x", 0, 0).await);
    }
}
