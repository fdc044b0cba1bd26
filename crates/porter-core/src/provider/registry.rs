use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{CoreError, CoreErrorKind};
use crate::provider::{Provider, ProviderResult};

/// Name-keyed set of providers with a designated default.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> ProviderResult<()> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(CoreError::invalid_input(format!(
                "duplicate provider registration for '{name}'"
            )));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Records the default by name. The provider does not need to be
    /// registered yet; resolution falls back when it is missing.
    pub fn set_default(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.default_provider = (!name.trim().is_empty()).then_some(name);
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The default provider, else the first registered by name.
    pub fn text_provider(&self) -> ProviderResult<Arc<dyn Provider>> {
        self.default_provider
            .as_deref()
            .and_then(|name| self.providers.get(name))
            .or_else(|| self.providers.values().next())
            .cloned()
            .ok_or_else(|| provider_not_found("provider not found: no providers are registered"))
    }

    /// `preferred` when it supports vision, else the default when it does,
    /// else the first vision-capable provider by name.
    pub fn vision_provider(&self, preferred: Option<&str>) -> ProviderResult<Arc<dyn Provider>> {
        let capable = |name: Option<&str>| {
            name.and_then(|name| self.providers.get(name))
                .filter(|provider| provider.supports_vision())
        };

        capable(preferred.filter(|name| !name.is_empty()))
            .or_else(|| capable(self.default_provider.as_deref()))
            .or_else(|| {
                self.providers
                    .values()
                    .find(|provider| provider.supports_vision())
            })
            .cloned()
            .ok_or_else(|| provider_not_found("no vision-capable provider is registered"))
    }
}

fn provider_not_found(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::Provider, message)
}
