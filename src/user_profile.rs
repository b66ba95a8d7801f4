//! Sticky bucketing through a pluggable, external user profile store.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Error type that user profile stores may return.
pub type UserProfileStoreError = Box<dyn std::error::Error + Send + Sync>;

/// Previously made decisions for a user, keyed by experiment id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub experiment_bucket_map: HashMap<String, StoredDecision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDecision {
    pub variation_id: String,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        UserProfile {
            user_id: user_id.into(),
            experiment_bucket_map: HashMap::new(),
        }
    }

    pub fn variation_id_for_experiment(&self, experiment_id: &str) -> Option<&str> {
        self.experiment_bucket_map
            .get(experiment_id)
            .map(|d| d.variation_id.as_str())
    }

    pub fn save_variation_for_experiment(
        &mut self,
        experiment_id: impl Into<String>,
        variation_id: impl Into<String>,
    ) {
        self.experiment_bucket_map.insert(
            experiment_id.into(),
            StoredDecision {
                variation_id: variation_id.into(),
            },
        );
    }
}

/// Storage for [`UserProfile`]s, implemented by the host application.
///
/// Both operations may be slow and may fail. Failures never abort a decision: a failed lookup is
/// treated as "no stored decision" and a failed save is only logged. Each operation is attempted
/// once.
pub trait UserProfileStore: Send + Sync {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>, UserProfileStoreError>;

    fn save(&self, profile: &UserProfile) -> Result<(), UserProfileStoreError>;
}
