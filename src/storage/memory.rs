use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::core::{
    domain::Language,
    errors::StoreError,
    traits::project_store::{ProjectStore, ProjectUpdate},
};

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectRecord {
    pub id: String,
    pub language: Language,
    pub code: String,
    pub output: String,
    pub input: String,
    pub updated_at: DateTime<Utc>,
}

/// Process-local project store. Every update upserts the project's latest
/// code, output and input.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    projects: DashMap<String, ProjectRecord>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project_id: &str) -> Option<ProjectRecord> {
        self.projects.get(project_id).map(|record| record.clone())
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[async_trait::async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn update_project(&self, project_id: &str, update: ProjectUpdate) -> Result<(), StoreError> {
        if project_id.trim().is_empty() {
            return Err(StoreError::NotFound {
                project_id: project_id.to_string(),
            });
        }

        let record = ProjectRecord {
            id: project_id.to_string(),
            language: update.language,
            code: update.code,
            output: update.output,
            input: update.input.unwrap_or_default(),
            updated_at: Utc::now(),
        };
        self.projects.insert(project_id.to_string(), record);
        tracing::debug!(project_id, "Project updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(output: &str) -> ProjectUpdate {
        ProjectUpdate {
            language: Language::Python,
            code: "print(1)".to_string(),
            output: output.to_string(),
            input: None,
        }
    }

    #[tokio::test]
    async fn test_update_upserts_latest_state() {
        let store = InMemoryProjectStore::new();

        store.update_project("p1", update("1\n")).await.unwrap();
        store.update_project("p1", update("2\n")).await.unwrap();

        assert_eq!(store.len(), 1);
        let record = store.get("p1").unwrap();
        assert_eq!(record.output, "2\n");
        assert_eq!(record.input, "");
        assert_eq!(record.language, Language::Python);
    }

    #[tokio::test]
    async fn test_blank_project_id_is_rejected() {
        let store = InMemoryProjectStore::new();

        let err = store.update_project("  ", update("x")).await.unwrap_err();

        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.is_empty());
    }
}
