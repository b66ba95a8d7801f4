use std::sync::{Arc, RwLock};

use crate::project_config::ProjectConfig;

/// `ConfigurationStore` holds the current [`ProjectConfig`] and allows concurrent access for
/// readers and writers.
///
/// Readers get an `Arc` snapshot. A decision made with a snapshot is unaffected by a configuration
/// swapped in while it runs.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<ProjectConfig>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_configuration(&self) -> Option<Arc<ProjectConfig>> {
        // Err() is only possible if a writer panicked while holding the lock. Don't crash the app
        // because of it.
        let configuration = self.configuration.read().ok()?;
        configuration.clone()
    }

    /// Set new configuration, returning the previous one.
    pub fn set_configuration(&self, config: ProjectConfig) -> Option<Arc<ProjectConfig>> {
        log::debug!(target: "decision_core",
                    revision:serde = config.revision();
                    "updating configuration");

        // Build the new value before taking the write lock.
        let new_value = Some(Arc::new(config));

        let mut configuration_slot = self.configuration.write().ok()?;
        std::mem::replace(&mut configuration_slot, new_value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::project_config::{Datafile, ProjectConfig};

    use super::ConfigurationStore;

    fn config(revision: &str) -> ProjectConfig {
        ProjectConfig::new(Datafile {
            revision: Some(revision.to_owned()),
            ..Default::default()
        })
    }

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::new());
        assert!(store.get_configuration().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_configuration(config("1"));
            })
            .join();
        }

        assert_eq!(store.get_configuration().unwrap().revision(), Some("1"));
    }

    #[test]
    fn snapshot_survives_replacement() {
        let store = ConfigurationStore::new();
        assert!(store.set_configuration(config("1")).is_none());
        let snapshot = store.get_configuration().unwrap();

        let previous = store.set_configuration(config("2")).unwrap();
        assert_eq!(previous.revision(), Some("1"));
        assert_eq!(snapshot.revision(), Some("1"));
        assert_eq!(store.get_configuration().unwrap().revision(), Some("2"));
    }
}
