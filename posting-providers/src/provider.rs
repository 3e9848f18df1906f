use async_trait::async_trait;
use threadcraft_core::{
    CommentStatus, CoreError, PostCommentRequest, PostCommentResult, ProviderError,
};

/// Optional operations a provider may implement beyond posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    StatusChecks,
    CapacityReporting,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::StatusChecks => "status_checks",
            Capability::CapacityReporting => "capacity_reporting",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub status_checks: bool,
    pub capacity_reporting: bool,
}

impl Capabilities {
    pub fn post_only() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            status_checks: true,
            capacity_reporting: true,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::StatusChecks => self.status_checks,
            Capability::CapacityReporting => self.capacity_reporting,
        }
    }
}

/// A backend able to publish comments on behalf of a user.
///
/// `post_comment` reports delivery failures inside the returned
/// [`PostCommentResult`]; an `Err` means the provider is misconfigured.
#[async_trait]
pub trait PostingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::post_only()
    }

    /// Errors with a configuration error naming what is missing.
    fn ensure_configured(&self) -> Result<(), CoreError>;

    /// Cheap check, no network.
    fn is_available(&self) -> bool {
        self.ensure_configured().is_ok()
    }

    async fn post_comment(&self, request: &PostCommentRequest)
        -> Result<PostCommentResult, CoreError>;

    async fn check_comment_status(&self, _comment_id: &str) -> Result<CommentStatus, CoreError> {
        Err(unsupported(self.name(), Capability::StatusChecks))
    }

    async fn remaining_capacity(&self) -> Result<u32, CoreError> {
        Err(unsupported(self.name(), Capability::CapacityReporting))
    }
}

pub(crate) fn unsupported(provider: &str, capability: Capability) -> CoreError {
    CoreError::Provider(ProviderError::Unsupported {
        provider: provider.to_string(),
        capability: capability.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PostOnly;

    #[async_trait]
    impl PostingProvider for PostOnly {
        fn name(&self) -> &str {
            "post-only"
        }

        fn ensure_configured(&self) -> Result<(), CoreError> {
            Ok(())
        }

        async fn post_comment(
            &self,
            _request: &PostCommentRequest,
        ) -> Result<PostCommentResult, CoreError> {
            Ok(PostCommentResult::posted("c1".to_string(), None))
        }
    }

    #[test]
    fn test_capability_lookup() {
        let caps = Capabilities {
            status_checks: true,
            capacity_reporting: false,
        };
        assert!(caps.supports(Capability::StatusChecks));
        assert!(!caps.supports(Capability::CapacityReporting));
        assert!(!Capabilities::post_only().supports(Capability::StatusChecks));
        assert!(Capabilities::all().supports(Capability::CapacityReporting));
    }

    #[tokio::test]
    async fn test_optional_operations_default_to_unsupported() {
        let provider = PostOnly;
        assert!(provider.is_available());

        let status = provider.check_comment_status("c1").await;
        assert!(matches!(
            status,
            Err(CoreError::Provider(ProviderError::Unsupported { ref capability, .. }))
                if capability == "status_checks"
        ));
        assert!(provider.remaining_capacity().await.is_err());
    }
}
