use crate::provider::PostingProvider;
use std::sync::Arc;
use threadcraft_core::CoreError;
use tracing::{debug, info};

/// Ordered set of posting providers. The first registered is the primary.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn PostingProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names are unique; registering a second provider under a taken name fails.
    pub fn register(&mut self, provider: Arc<dyn PostingProvider>) -> Result<(), CoreError> {
        if self.find(provider.name()).is_some() {
            return Err(CoreError::invalid_input(format!(
                "provider {} is already registered",
                provider.name()
            )));
        }

        info!(
            "Registered posting provider {} (available: {})",
            provider.name(),
            provider.is_available()
        );
        self.providers.push(provider);
        Ok(())
    }

    pub fn primary(&self) -> Option<Arc<dyn PostingProvider>> {
        self.providers.first().cloned()
    }

    /// First provider, in registration order, whose configuration is complete.
    pub fn first_available(&self) -> Option<Arc<dyn PostingProvider>> {
        let found = self.providers.iter().find(|p| p.is_available()).cloned();
        if found.is_none() {
            debug!("No available provider among {}", self.providers.len());
        }
        found
    }

    pub fn all(&self) -> Vec<Arc<dyn PostingProvider>> {
        self.providers.clone()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn PostingProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use threadcraft_core::{ConfigError, PostCommentRequest, PostCommentResult};

    struct Fake {
        name: &'static str,
        configured: bool,
    }

    #[async_trait]
    impl PostingProvider for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn ensure_configured(&self) -> Result<(), CoreError> {
            if self.configured {
                Ok(())
            } else {
                Err(CoreError::Config(ConfigError::MissingField {
                    field: format!("{}.api_key", self.name),
                }))
            }
        }

        async fn post_comment(
            &self,
            _request: &PostCommentRequest,
        ) -> Result<PostCommentResult, CoreError> {
            self.ensure_configured()?;
            Ok(PostCommentResult::posted(format!("{}-1", self.name), None))
        }
    }

    fn fake(name: &'static str, configured: bool) -> Arc<dyn PostingProvider> {
        Arc::new(Fake { name, configured })
    }

    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.primary().is_none());
        assert!(registry.first_available().is_none());
    }

    #[test]
    fn test_primary_is_first_registered() {
        let mut registry = ProviderRegistry::new();
        registry.register(fake("unconfigured", false)).unwrap();
        registry.register(fake("backup", true)).unwrap();

        assert_eq!(registry.primary().unwrap().name(), "unconfigured");
        assert_eq!(registry.first_available().unwrap().name(), "backup");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_all_is_a_copy() {
        let mut registry = ProviderRegistry::new();
        registry.register(fake("a", true)).unwrap();

        let mut snapshot = registry.all();
        snapshot.push(fake("b", true));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_by_name_and_duplicates() {
        let mut registry = ProviderRegistry::new();
        registry.register(fake("a", true)).unwrap();
        registry.register(fake("b", false)).unwrap();

        assert_eq!(registry.find("b").unwrap().name(), "b");
        assert!(registry.find("c").is_none());
        assert!(matches!(
            registry.register(fake("a", true)),
            Err(CoreError::InvalidInput { .. })
        ));
    }
}
