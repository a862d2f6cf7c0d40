//! Holder of the active configuration
//!
//! [`ConfigurationRegistry`] is passed to whoever needs the configuration;
//! there is no global instance. Reads go through an [`ArcSwap`] and never
//! block. Switching is atomic: a reader sees either the old or the new
//! configuration, never a mix of both.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::models::Configuration;

/// Component that derives state from the active configuration
///
/// Listeners are invalidated and then re-primed synchronously on every
/// notifying switch, in registration order. They are called with the
/// registry's listener lock held and must not call back into the registry.
pub trait ConfigurationListener: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str;

    /// Rebuild derived state from `configuration`
    fn on_configuration(&self, configuration: &Configuration);

    /// Drop derived state; called before the new configuration is delivered
    fn invalidate(&self);

    fn is_ready(&self) -> bool;
}

/// Active configuration plus the listeners depending on it
pub struct ConfigurationRegistry {
    current: ArcSwap<Configuration>,
    revision: AtomicU64,
    listeners: Mutex<Vec<Arc<dyn ConfigurationListener>>>,
}

impl Default for ConfigurationRegistry {
    fn default() -> Self {
        Self::new(Configuration::new())
    }
}

impl ConfigurationRegistry {
    pub fn new(initial: Configuration) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            revision: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the active configuration
    pub fn current(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    /// Number of switches so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Add a listener and prime it with the active configuration
    ///
    /// Holding the listener lock while priming keeps a concurrent switch
    /// from delivering an older configuration after the newer one.
    pub fn register(&self, listener: Arc<dyn ConfigurationListener>) {
        let mut listeners = self.listeners();
        listener.on_configuration(&self.current.load());
        debug!("Registered configuration listener {}", listener.name());
        listeners.push(listener);
    }

    /// Make `configuration` active
    ///
    /// With `notify`, every listener is invalidated and re-primed before
    /// this returns. Switches are serialized, so listeners always end on
    /// the configuration [`current`](Self::current) returns. Returns the
    /// new revision.
    pub fn switch_configuration(&self, configuration: Configuration, notify: bool) -> u64 {
        let listeners = self.listeners();
        let configuration = Arc::new(configuration);
        self.current.store(configuration.clone());
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Switched to configuration revision {}", revision);

        if notify {
            for listener in listeners.iter() {
                listener.invalidate();
            }
            for listener in listeners.iter() {
                listener.on_configuration(&configuration);
                if !listener.is_ready() {
                    warn!("{} is not ready after revision {}", listener.name(), revision);
                }
            }
        }
        revision
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn ConfigurationListener>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Tracks whether the service behind one endpoint can run with the active
/// configuration
pub struct EndPointReadiness {
    end_point: String,
    ready: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl EndPointReadiness {
    pub fn new(end_point: impl Into<String>) -> Self {
        Self {
            end_point: end_point.into(),
            ready: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// Why the endpoint is not ready, if it is not
    pub fn last_error(&self) -> Option<String> {
        self.error_slot().clone()
    }

    fn error_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConfigurationListener for EndPointReadiness {
    fn name(&self) -> &str {
        &self.end_point
    }

    fn on_configuration(&self, configuration: &Configuration) {
        match configuration.check_end_point(&self.end_point) {
            Ok(()) => {
                *self.error_slot() = None;
                self.ready.store(true, Ordering::Release);
            }
            Err(e) => {
                debug!("Endpoint {} not ready: {}", self.end_point, e);
                *self.error_slot() = Some(e.to_string());
                self.ready.store(false, Ordering::Release);
            }
        }
    }

    fn invalidate(&self) {
        self.ready.store(false, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnConfig, EndPoint, TableConfig};

    fn with_end_point() -> Configuration {
        let mut table = TableConfig::new("public.obs");
        let mut ra = ColumnConfig::new("ra");
        ra.set_datatype("DOUBLE");
        table.add_column(ra);
        let mut tap = EndPoint::new("tap");
        tap.add_table("public.obs");

        let mut config = Configuration::new();
        config.add_table(table);
        config.add_end_point(tap);
        config
    }

    #[test]
    fn test_register_primes_listener() {
        let registry = ConfigurationRegistry::new(with_end_point());
        let readiness = Arc::new(EndPointReadiness::new("tap"));
        assert!(!readiness.is_ready());
        registry.register(readiness.clone());
        assert!(readiness.is_ready());
        assert_eq!(registry.revision(), 0);
    }

    #[test]
    fn test_switch_notifies_listeners() {
        let registry = ConfigurationRegistry::default();
        let readiness = Arc::new(EndPointReadiness::new("tap"));
        registry.register(readiness.clone());
        assert!(!readiness.is_ready());
        assert!(readiness.last_error().is_some());

        assert_eq!(registry.switch_configuration(with_end_point(), true), 1);
        assert!(readiness.is_ready());
        assert!(readiness.last_error().is_none());
        assert!(registry.current().get_end_point("tap").is_some());
    }

    #[test]
    fn test_switch_without_notify_keeps_listener_state() {
        let registry = ConfigurationRegistry::default();
        let readiness = Arc::new(EndPointReadiness::new("tap"));
        registry.register(readiness.clone());

        registry.switch_configuration(with_end_point(), false);
        assert!(!readiness.is_ready());
        assert_eq!(registry.revision(), 1);
    }

    struct LastSeen(Mutex<Option<String>>);

    impl ConfigurationListener for LastSeen {
        fn name(&self) -> &str {
            "last-seen"
        }

        fn on_configuration(&self, configuration: &Configuration) {
            *self.0.lock().unwrap() = configuration.options().get("label").map(str::to_string);
        }

        fn invalidate(&self) {}

        fn is_ready(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_concurrent_switches_leave_listener_on_current() {
        let registry = Arc::new(ConfigurationRegistry::default());
        let seen = Arc::new(LastSeen(Mutex::new(None)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let seen = seen.clone();
                std::thread::spawn(move || {
                    if i == 4 {
                        registry.register(seen);
                    }
                    for round in 0..25 {
                        let mut config = Configuration::new();
                        config.options_mut().put("label", format!("{}-{}", i, round));
                        registry.switch_configuration(config, true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.revision(), 200);
        let current = registry.current().options().get("label").map(str::to_string);
        assert!(current.is_some());
        assert_eq!(*seen.0.lock().unwrap(), current);
    }

    #[test]
    fn test_snapshot_survives_switch() {
        let registry = ConfigurationRegistry::new(with_end_point());
        let before = registry.current();
        registry.switch_configuration(Configuration::new(), true);
        assert!(before.get_end_point("tap").is_some());
        assert!(registry.current().end_points().is_empty());
    }
}
