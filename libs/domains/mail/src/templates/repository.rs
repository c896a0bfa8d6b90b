use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::MailResult;
use crate::models::Template;

/// Read access to stored templates.
///
/// Lookups are always scoped by owner: a template id belonging to another
/// owner resolves to `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get_template(&self, owner_id: Uuid, template_id: Uuid) -> MailResult<Option<Template>>;
}

/// In-memory implementation of TemplateRepository (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateRepository {
    templates: Arc<RwLock<HashMap<Uuid, Template>>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a template, replacing any with the same id.
    pub async fn insert(&self, template: Template) -> Template {
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        template
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn get_template(&self, owner_id: Uuid, template_id: Uuid) -> MailResult<Option<Template>> {
        let templates = self.templates.read().await;
        Ok(templates
            .get(&template_id)
            .filter(|t| t.owner_id == owner_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_is_owner_scoped() {
        let repository = InMemoryTemplateRepository::new();
        let owner = Uuid::now_v7();
        let template = repository.insert(Template::new(owner, "welcome", "Hi")).await;

        let found = repository.get_template(owner, template.id).await.unwrap();
        assert_eq!(found.map(|t| t.name), Some("welcome".to_string()));

        let other = repository.get_template(Uuid::now_v7(), template.id).await.unwrap();
        assert!(other.is_none());
    }
}
