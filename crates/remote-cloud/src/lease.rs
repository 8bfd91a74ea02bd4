use std::sync::Arc;

use tracing::{debug, warn};

use crate::provider::{Instance, Provider};

/// Exclusive ownership of a provisioned instance.
///
/// The instance is destroyed by [`release`](Self::release), or, if the lease
/// is dropped while still holding it, by a destroy task spawned on the
/// current runtime.
pub struct InstanceLease {
    provider: Arc<dyn Provider>,
    api_key: String,
    instance: Option<Instance>,
}

impl InstanceLease {
    pub fn new(provider: Arc<dyn Provider>, api_key: String, instance: Instance) -> Self {
        debug!(provider = provider.name(), instance = %instance.id, "instance leased");
        Self {
            provider,
            api_key,
            instance: Some(instance),
        }
    }

    /// The leased instance, or `None` once released.
    pub fn instance(&self) -> Option<&Instance> {
        self.instance.as_ref()
    }

    /// Destroy the instance. Calling this again is a no-op. Destroy failures
    /// are logged, not returned: the caller's outcome takes precedence.
    pub async fn release(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        destroy(self.provider.as_ref(), &self.api_key, &instance).await;
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(instance = %instance.id, "no runtime to destroy dropped instance; it will expire on its own");
            return;
        };
        let provider = Arc::clone(&self.provider);
        let api_key = std::mem::take(&mut self.api_key);
        runtime.spawn(async move {
            destroy(provider.as_ref(), &api_key, &instance).await;
        });
    }
}

async fn destroy(provider: &dyn Provider, api_key: &str, instance: &Instance) {
    match provider.destroy_instance(api_key, instance).await {
        Ok(()) => debug!(provider = provider.name(), instance = %instance.id, "instance destroyed"),
        Err(e) => {
            warn!(provider = provider.name(), instance = %instance.id, error = %e, "failed to destroy instance")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::FakeProvider;

    use super::*;

    #[tokio::test]
    async fn release_is_idempotent() {
        let provider = Arc::new(FakeProvider::default());
        let mut lease = InstanceLease::new(provider.clone(), "k".into(), Instance::new("sb-1"));

        lease.release().await;
        lease.release().await;
        drop(lease);
        tokio::task::yield_now().await;

        assert_eq!(provider.destroyed(), vec!["sb-1".to_string()]);
    }

    #[tokio::test]
    async fn dropped_lease_destroys_instance() {
        let provider = Arc::new(FakeProvider::default());
        let lease = InstanceLease::new(provider.clone(), "k".into(), Instance::new("sb-2"));
        drop(lease);

        for _ in 0..10 {
            if !provider.destroyed().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.destroyed(), vec!["sb-2".to_string()]);
    }

    #[tokio::test]
    async fn destroy_failure_is_swallowed() {
        let provider = Arc::new(FakeProvider {
            fail_destroy: true,
            ..FakeProvider::default()
        });
        let mut lease = InstanceLease::new(provider.clone(), "k".into(), Instance::new("sb-3"));
        lease.release().await;
        assert!(lease.instance().is_none());
    }
}
