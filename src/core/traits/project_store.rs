use crate::core::{domain::Language, errors::StoreError};

/// Latest state of a project after an execution.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectUpdate {
    pub language: Language,
    pub code: String,
    pub output: String,
    pub input: Option<String>,
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait ProjectStore: std::fmt::Debug + Send + Sync {
    async fn update_project(&self, project_id: &str, update: ProjectUpdate) -> Result<(), StoreError>;
}
