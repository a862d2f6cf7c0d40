//! Configuration refresh service
//!
//! Parses a submitted document, reconciles it and makes the result the
//! active configuration. A refresh that fails leaves the previous
//! configuration active.

use std::sync::Arc;
use tracing::{info, warn};

use crate::codec::{DocumentCodec, YamlCodec};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::models::{Action, Change};
use crate::reconcile::{self, Reconciler, RunOutcome};
use crate::registry::ConfigurationRegistry;

pub struct ConfigurationService {
    codec: Arc<dyn DocumentCodec>,
    reconciler: Option<Arc<Reconciler>>,
    registry: Arc<ConfigurationRegistry>,
}

impl ConfigurationService {
    /// Service without a datasource; only [`Action::Current`] is possible
    pub fn new(registry: Arc<ConfigurationRegistry>) -> Self {
        Self {
            codec: Arc::new(YamlCodec),
            reconciler: None,
            registry,
        }
    }

    pub fn with_reconciler(mut self, reconciler: Arc<Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn DocumentCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn registry(&self) -> &Arc<ConfigurationRegistry> {
        &self.registry
    }

    /// Parse `text`, reconcile it and switch the registry to the result
    ///
    /// Returns the serialized configuration that became active.
    pub async fn refresh(&self, text: &str, change: Change, action: Action) -> ConfigurationResult<String> {
        let mut desired = self.codec.parse(text)?;
        desired.set_change(change);
        desired.set_action(action);

        let outcome = match action {
            Action::Current => reconcile::current(&desired, self.codec.as_ref()),
            Action::Apply => match &self.reconciler {
                Some(reconciler) => reconciler.apply(&desired, change).await,
                None => Err(ConfigurationError::Unavailable(
                    "no datasource configured, only 'current' is possible".to_string(),
                )),
            },
        };

        let RunOutcome {
            configuration,
            document,
            ..
        } = outcome.inspect_err(|e| {
            warn!("Configuration refresh failed, keeping revision {}: {}", self.registry.revision(), e);
        })?;
        let revision = self.registry.switch_configuration(configuration, true);
        info!("Configuration refreshed ({}), revision {}", action, revision);
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDao;

    const DOCUMENT: &str = r#"!Configuration
options:
  datasource.url: ""
tables:
  public.obs:
    options:
      description: Observations
    columns:
      ra: !Column
        type: DOUBLE
"#;

    #[tokio::test]
    async fn test_current_without_datasource() {
        let registry = Arc::new(ConfigurationRegistry::default());
        let service = ConfigurationService::new(registry.clone());
        let document = service
            .refresh(DOCUMENT, Change::None, Action::Current)
            .await
            .unwrap();
        assert!(document.starts_with("!Configuration"));
        assert!(document.contains("datasource.url"));
        assert_eq!(registry.revision(), 1);
        assert!(registry.current().get_table_config("public.obs").is_some());
    }

    #[tokio::test]
    async fn test_apply_without_datasource_is_unavailable() {
        let registry = Arc::new(ConfigurationRegistry::default());
        let service = ConfigurationService::new(registry.clone());
        let err = service
            .refresh(DOCUMENT, Change::Update, Action::Apply)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Unavailable(_)));
        assert_eq!(registry.revision(), 0);
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_previous_configuration() {
        let registry = Arc::new(ConfigurationRegistry::default());
        let dao = Arc::new(MemoryDao::new());
        let service = ConfigurationService::new(registry.clone())
            .with_reconciler(Arc::new(Reconciler::new(dao.clone())));

        service
            .refresh(DOCUMENT, Change::Update, Action::Apply)
            .await
            .unwrap();
        assert_eq!(registry.revision(), 1);

        let dropped = DOCUMENT.replace("      ra: !Column\n        type: DOUBLE\n", "      dec: !Column\n        type: DOUBLE\n");
        let err = service
            .refresh(&dropped, Change::Update, Action::Apply)
            .await
            .unwrap_err();
        assert!(err.is_change_level());
        assert_eq!(registry.revision(), 1);
        let current = registry.current();
        assert!(current.get_table_config("public.obs").unwrap().column("ra").is_some());
    }
}
