use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    pub fn select(&self, requested: Option<&str>) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.get(name) {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                format!("Requested model '{name}' unavailable; using default.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let Some(model) = self.registry.default_model().cloned() else {
            return Err("No image models registered.".to_string());
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}
