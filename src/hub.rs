//! Wires configured providers and their backends into a [`Router`].

use std::collections::BTreeSet;
use std::sync::Arc;

use fanout_engine::{MergedResult, Provider, ProviderDescriptor, Query, Router};

use crate::config::HubConfig;
use crate::error::Result;

/// A configured router plus the roster it was built from.
pub struct Hub {
    router: Router,
    unbacked: Vec<String>,
}

impl Hub {
    /// Build a hub from `config` and the available provider backends.
    ///
    /// Backends with a `[[providers]]` entry take its descriptor and
    /// limits; others run with defaults. Configured providers without a
    /// backend are reported by [`Hub::unbacked`] and never routed to.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the router rejects
    /// the provider set.
    pub fn build(config: &HubConfig, backends: Vec<Arc<dyn Provider>>) -> Result<Self> {
        config.validate()?;
        let mut builder = Router::builder(config.engine.clone());
        let mut backed = BTreeSet::new();

        for backend in backends {
            let id = backend.id().to_owned();
            let descriptor = match config.provider(&id) {
                Some(provider) => {
                    if let Some(limits) = &provider.limits {
                        builder = builder.limits(id.clone(), limits.clone());
                    }
                    provider.descriptor()
                }
                None => {
                    tracing::warn!(provider = %id, "no configuration for provider; using defaults");
                    ProviderDescriptor::new(id.clone())
                }
            };
            builder = builder.provider(descriptor, backend);
            backed.insert(id);
        }

        let unbacked: Vec<String> = config
            .providers
            .iter()
            .filter(|p| !backed.contains(&p.id))
            .map(|p| p.id.clone())
            .collect();
        for id in &unbacked {
            tracing::warn!(provider = %id, "configured provider has no backend; skipped");
        }

        Ok(Self {
            router: builder.build()?,
            unbacked,
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Configured providers that had no backend.
    pub fn unbacked(&self) -> &[String] {
        &self.unbacked
    }

    /// Route `query` through the engine.
    ///
    /// # Errors
    ///
    /// Returns the engine's routing failure.
    pub async fn route(&self, query: &Query) -> Result<MergedResult> {
        Ok(self.router.route(query).await?)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("router", &self.router)
            .field("unbacked", &self.unbacked)
            .finish()
    }
}
