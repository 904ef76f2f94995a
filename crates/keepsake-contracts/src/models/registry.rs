use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    /// Reference photos beyond this count are dropped from the request.
    pub max_reference_images: usize,
}

/// Ordered set of image models; the first entry is the default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn default_model(&self) -> Option<&ModelSpec> {
        self.models.values().next()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();
    let mut insert = |name: &str, provider: &str, max_reference_images: usize| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                max_reference_images,
            },
        );
    };

    insert("gemini-3-pro-image-preview", "gemini", 4);
    insert("gemini-2.5-flash-image", "gemini", 3);
    insert("dryrun-image-1", "dryrun", 4);
    map
}

#[cfg(test)]
mod tests {
    use super::ModelRegistry;

    #[test]
    fn default_registry_leads_with_gemini_pro() {
        let registry = ModelRegistry::default();
        let default = registry.default_model().map(|model| model.name.as_str());
        assert_eq!(default, Some("gemini-3-pro-image-preview"));
        assert_eq!(registry.list().count(), 3);
        assert_eq!(
            registry.get(" dryrun-image-1 ").map(|model| model.provider.as_str()),
            Some("dryrun")
        );
    }
}
