//! Template loading, caching, and column mapping.
//!
//! Templates come from an external store behind the [`TemplateStore`] trait;
//! the [`TemplateMapper`] caches them per `(tenant, template)` pair so a run
//! over a million-row file fetches its template once. Mapping turns a raw
//! file row (column names) into template field names, matching columns
//! case-insensitively; a column the file does not carry maps to `Null` so
//! the `required` validation can flag it downstream.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{TemplateError, TemplateResult};
use crate::types::{Step, Template, ValidationRule};

/// External source of channel templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetch a template by id, scoped to a tenant.
    async fn fetch(&self, template_id: &str, tenant_id: &str) -> TemplateResult<Template>;
}

/// In-memory template store, for tests and embedded deployments.
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<(String, String), Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tenant_id: &str, template: Template) {
        self.templates
            .write()
            .await
            .insert((tenant_id.to_string(), template.id.clone()), template);
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn fetch(&self, template_id: &str, tenant_id: &str) -> TemplateResult<Template> {
        self.templates
            .read()
            .await
            .get(&(tenant_id.to_string(), template_id.to_string()))
            .cloned()
            .ok_or_else(|| TemplateError::NotFound {
                template_id: template_id.to_string(),
                tenant_id: tenant_id.to_string(),
            })
    }
}

/// Loads templates through a store, caches them, and maps raw rows onto
/// template fields.
pub struct TemplateMapper {
    store: Arc<dyn TemplateStore>,
    cache: RwLock<HashMap<(String, String), Arc<Template>>>,
}

impl TemplateMapper {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load a template, hitting the store only on a cache miss.
    pub async fn load_template(
        &self,
        template_id: &str,
        tenant_id: &str,
    ) -> TemplateResult<Arc<Template>> {
        let key = (tenant_id.to_string(), template_id.to_string());

        if let Some(cached) = self.cache.read().await.get(&key) {
            return Ok(Arc::clone(cached));
        }

        debug!(%template_id, %tenant_id, "template cache miss, fetching from store");
        let template = Arc::new(self.store.fetch(template_id, tenant_id).await?);
        self.cache.write().await.insert(key, Arc::clone(&template));
        Ok(template)
    }

    /// Map raw file columns onto template field names.
    ///
    /// Column matching is case-insensitive; unmatched fields map to `Null`.
    pub fn map_row_to_fields(
        &self,
        raw_row: &Map<String, Value>,
        template: &Template,
    ) -> Map<String, Value> {
        let mut mapped = Map::new();
        for attribute in &template.attributes {
            let value = raw_row
                .iter()
                .find(|(column, _)| column.eq_ignore_ascii_case(&attribute.column_name))
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Null);
            mapped.insert(attribute.name.clone(), value);
        }
        mapped
    }

    /// Transformation steps configured for a field. Empty for unknown fields.
    pub fn transformation_steps<'t>(&self, template: &'t Template, field: &str) -> &'t [Step] {
        template
            .attributes
            .iter()
            .find(|a| a.name == field)
            .map(|a| a.transformations.as_slice())
            .unwrap_or(&[])
    }

    /// Validation rules configured for a field. Empty for unknown fields.
    pub fn validation_rules<'t>(
        &self,
        template: &'t Template,
        field: &str,
    ) -> &'t [ValidationRule] {
        template
            .attributes
            .iter()
            .find(|a| a.name == field)
            .map(|a| a.validations.as_slice())
            .unwrap_or(&[])
    }

    /// Names of fields marked required.
    pub fn required_fields(&self, template: &Template) -> Vec<String> {
        template
            .attributes
            .iter()
            .filter(|a| a.is_required)
            .map(|a| a.name.clone())
            .collect()
    }

    /// All field names, in template order.
    pub fn field_names(&self, template: &Template) -> Vec<String> {
        template.attributes.iter().map(|a| a.name.clone()).collect()
    }

    /// Drop every cached template.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }
}
