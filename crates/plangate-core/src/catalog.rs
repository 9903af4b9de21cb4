use crate::error::GateError;
use crate::storage::GateStorage;
use crate::types::{ContentItem, PlanBody, PlanPreview};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Caller brief handed to the content engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanBrief {
    pub title: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
}

/// Output of the content engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPlan {
    pub preview: PlanPreview,
    pub full: PlanBody,
}

/// External plan generator.
#[async_trait]
pub trait ContentEngine: Send + Sync {
    fn engine_id(&self) -> &'static str;

    async fn generate(&self, brief: &PlanBrief) -> Result<GeneratedPlan, GateError>;
}

/// Creates content items on first request and serves immutable lookups.
pub struct ContentCatalog {
    storage: Arc<dyn GateStorage>,
    engine: Arc<dyn ContentEngine>,
}

impl ContentCatalog {
    pub fn new(storage: Arc<dyn GateStorage>, engine: Arc<dyn ContentEngine>) -> Self {
        Self { storage, engine }
    }

    /// Generate and store a plan. An existing id returns the stored item unchanged.
    pub async fn create(
        &self,
        brief: &PlanBrief,
        content_id: Option<String>,
    ) -> Result<ContentItem, GateError> {
        let content_id = match content_id {
            Some(id) => {
                let id = id.trim().to_string();
                if id.is_empty() {
                    return Err(GateError::invalid_input("content_id must not be empty"));
                }
                if let Some(existing) = self.storage.get_content(&id).await? {
                    return Ok(existing);
                }
                id
            }
            None => format!("plan-{}", Uuid::new_v4()),
        };

        let generated = self.engine.generate(brief).await.map_err(|err| {
            warn!(
                content_id = %content_id,
                engine = self.engine.engine_id(),
                error = %err,
                "content generation failed"
            );
            match err {
                GateError::ContentEngineFailure(_) => err,
                other => GateError::ContentEngineFailure(other.to_string()),
            }
        })?;

        let outcome = self
            .storage
            .insert_content_if_absent(ContentItem {
                content_id: content_id.clone(),
                preview: generated.preview,
                full: generated.full,
                created_at: Utc::now(),
            })
            .await?;

        if outcome.inserted() {
            info!(content_id = %content_id, engine = self.engine.engine_id(), "content item created");
        }
        Ok(outcome.into_inner())
    }

    pub async fn get(&self, content_id: &str) -> Result<ContentItem, GateError> {
        if content_id.trim().is_empty() {
            return Err(GateError::invalid_input("content_id is required"));
        }
        self.storage
            .get_content(content_id)
            .await?
            .ok_or_else(|| GateError::content_not_found(content_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryGateStorage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEngine {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentEngine for CountingEngine {
        fn engine_id(&self) -> &'static str {
            "counting"
        }

        async fn generate(&self, brief: &PlanBrief) -> Result<GeneratedPlan, GateError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeneratedPlan {
                preview: PlanPreview(json!({ "title": brief.title, "generation": n })),
                full: PlanBody(json!({ "title": brief.title, "generation": n, "stops": ["a"] })),
            })
        }
    }

    struct BrokenEngine;

    #[async_trait]
    impl ContentEngine for BrokenEngine {
        fn engine_id(&self) -> &'static str {
            "broken"
        }

        async fn generate(&self, _brief: &PlanBrief) -> Result<GeneratedPlan, GateError> {
            Err(GateError::ContentEngineFailure("model offline".to_string()))
        }
    }

    #[tokio::test]
    async fn create_with_existing_id_keeps_first_generation() {
        let engine = Arc::new(CountingEngine::default());
        let catalog = ContentCatalog::new(Arc::new(InMemoryGateStorage::new()), engine.clone());
        let brief = PlanBrief {
            title: Some("Rooftop evening".to_string()),
            ..PlanBrief::default()
        };

        let first = catalog.create(&brief, Some("plan-1".to_string())).await.unwrap();
        let second = catalog.create(&brief, Some("plan-1".to_string())).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generated_ids_are_prefixed() {
        let catalog = ContentCatalog::new(
            Arc::new(InMemoryGateStorage::new()),
            Arc::new(CountingEngine::default()),
        );
        let item = catalog.create(&PlanBrief::default(), None).await.unwrap();
        assert!(item.content_id.starts_with("plan-"));
        assert_eq!(catalog.get(&item.content_id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn engine_failure_stores_nothing() {
        let storage = Arc::new(InMemoryGateStorage::new());
        let catalog = ContentCatalog::new(storage.clone(), Arc::new(BrokenEngine));

        let err = catalog
            .create(&PlanBrief::default(), Some("plan-x".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::ContentEngineFailure(_)));
        assert!(matches!(
            catalog.get("plan-x").await,
            Err(GateError::NotFound(_))
        ));
    }
}
