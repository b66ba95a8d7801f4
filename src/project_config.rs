//! In-memory project configuration: experiments, groups, audiences, rollouts and feature flags.
//!
//! [`ProjectConfig`] is immutable once built and only offers lookups. Unknown ids and keys yield
//! `None`; callers treat that as "not found" and keep going.
use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use crate::{audience::ConditionLeaf, condition_tree::ConditionTree, Result};

/// Serialized form of a project configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datafile {
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub audiences: Vec<Audience>,
    /// Audiences with structured conditions. Take precedence over `audiences` with the same id.
    #[serde(default)]
    pub typed_audiences: Vec<Audience>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ExperimentStatus {
    Running,
    Launched,
    Paused,
    NotStarted,
    Archived,
    #[default]
    Unknown,
}

impl From<String> for ExperimentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Running" => ExperimentStatus::Running,
            "Launched" => ExperimentStatus::Launched,
            "Paused" => ExperimentStatus::Paused,
            "Not started" => ExperimentStatus::NotStarted,
            "Archived" => ExperimentStatus::Archived,
            _ => ExperimentStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum GroupPolicy {
    /// Mutually exclusive: a user is bucketed into at most one experiment of the group.
    Random,
    Overlapping,
    Unknown,
}

impl From<String> for GroupPolicy {
    fn from(value: String) -> Self {
        match value.as_str() {
            "random" => GroupPolicy::Random,
            "overlapping" => GroupPolicy::Overlapping,
            _ => GroupPolicy::Unknown,
        }
    }
}

/// An experiment, or a rollout rule (rules share the same shape).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    /// Tree over audience ids. When present, takes precedence over `audience_ids`.
    #[serde(default)]
    pub audience_conditions: Option<ConditionTree<String>>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    /// Whitelist: user id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    #[serde(skip)]
    pub group_id: Option<String>,
    #[serde(skip)]
    pub group_policy: Option<GroupPolicy>,
}

impl Experiment {
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    pub fn variation_by_id(&self, variation_id: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == variation_id)
    }

    pub fn variation_by_key(&self, variation_key: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.key == variation_key)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: bool,
    /// Variable id to overridden value.
    #[serde(default, deserialize_with = "deserialize_variable_usages")]
    pub variables: HashMap<String, String>,
}

#[derive(Deserialize)]
struct VariableUsage {
    id: String,
    value: String,
}

fn deserialize_variable_usages<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<HashMap<String, String>, D::Error> {
    let usages = Vec::<VariableUsage>::deserialize(deserializer)?;
    Ok(usages.into_iter().map(|u| (u.id, u.value)).collect())
}

/// One entry of a traffic allocation table.
///
/// `end_of_range` is the exclusive upper bound of the entity's range. Entries are ordered by
/// ascending `end_of_range`, so each range starts where the previous one ends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    /// Entity ids are experiment ids.
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `None` if conditions could not be parsed. Such audience always evaluates to unknown.
    #[serde(default, deserialize_with = "deserialize_audience_conditions")]
    pub conditions: Option<ConditionTree<ConditionLeaf>>,
}

/// Audience conditions are either embedded as a tree or encoded as a JSON string.
fn deserialize_audience_conditions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<ConditionTree<ConditionLeaf>>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let value = match value {
        serde_json::Value::String(s) => match serde_json::from_str(&s) {
            Ok(value) => value,
            Err(err) => {
                log::warn!(target: "decision_core", "failed to parse audience conditions: {err}");
                return Ok(None);
            }
        },
        value => value,
    };
    match ConditionTree::from_json(value) {
        Ok(tree) => Ok(Some(tree)),
        Err(err) => {
            log::warn!(target: "decision_core", "failed to parse audience conditions: {err}");
            Ok(None)
        }
    }
}

/// An ordered list of targeting rules. The last rule is the "everyone else" rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub rollout_id: String,
}

impl FeatureFlag {
    pub fn rollout_id(&self) -> Option<&str> {
        Some(self.rollout_id.as_str()).filter(|id| !id.is_empty())
    }
}

/// Indexed, read-only view over a [`Datafile`].
#[derive(Debug, Default)]
pub struct ProjectConfig {
    revision: Option<String>,
    experiments: HashMap<String, Experiment>,
    experiment_ids_by_key: HashMap<String, String>,
    groups: HashMap<String, Group>,
    audiences: HashMap<String, Audience>,
    rollouts: HashMap<String, Rollout>,
    flags: HashMap<String, FeatureFlag>,
    flag_keys_order: Vec<String>,
    /// Flag key to variation key to variation, across the flag's experiments and rollout rules.
    flag_variations: HashMap<String, HashMap<String, Variation>>,
}

impl ProjectConfig {
    pub fn from_json(json: &str) -> Result<ProjectConfig> {
        let datafile: Datafile = serde_json::from_str(json)?;
        Ok(ProjectConfig::new(datafile))
    }

    pub fn new(datafile: Datafile) -> ProjectConfig {
        let mut experiments = HashMap::new();
        for experiment in datafile.experiments {
            experiments.insert(experiment.id.clone(), experiment);
        }

        let mut groups = HashMap::new();
        for mut group in datafile.groups {
            for mut experiment in std::mem::take(&mut group.experiments) {
                experiment.group_id = Some(group.id.clone());
                experiment.group_policy = Some(group.policy);
                experiments.insert(experiment.id.clone(), experiment);
            }
            groups.insert(group.id.clone(), group);
        }

        let experiment_ids_by_key = experiments
            .values()
            .map(|e| (e.key.clone(), e.id.clone()))
            .collect();

        let mut audiences = HashMap::new();
        for audience in datafile.audiences.into_iter().chain(datafile.typed_audiences) {
            audiences.insert(audience.id.clone(), audience);
        }

        let rollouts: HashMap<String, Rollout> = datafile
            .rollouts
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut flag_variations = HashMap::new();
        for flag in &datafile.feature_flags {
            let rules = flag
                .rollout_id()
                .and_then(|id| rollouts.get(id))
                .map(|r| r.experiments.as_slice())
                .unwrap_or_default();
            let variations: HashMap<String, Variation> = flag
                .experiment_ids
                .iter()
                .filter_map(|id| experiments.get(id))
                .chain(rules)
                .flat_map(|e| &e.variations)
                .map(|v| (v.key.clone(), v.clone()))
                .collect();
            flag_variations.insert(flag.key.clone(), variations);
        }

        let flag_keys_order = datafile
            .feature_flags
            .iter()
            .map(|f| f.key.clone())
            .collect();
        let flags = datafile
            .feature_flags
            .into_iter()
            .map(|f| (f.key.clone(), f))
            .collect();

        ProjectConfig {
            revision: datafile.revision,
            experiments,
            experiment_ids_by_key,
            groups,
            audiences,
            rollouts,
            flags,
            flag_keys_order,
            flag_variations,
        }
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn experiment_by_id(&self, experiment_id: &str) -> Option<&Experiment> {
        self.experiments.get(experiment_id)
    }

    pub fn experiment_by_key(&self, experiment_key: &str) -> Option<&Experiment> {
        self.experiment_ids_by_key
            .get(experiment_key)
            .and_then(|id| self.experiments.get(id))
    }

    pub fn variation_by_id(&self, experiment_key: &str, variation_id: &str) -> Option<&Variation> {
        self.experiment_by_key(experiment_key)?
            .variation_by_id(variation_id)
    }

    pub fn variation_by_key(
        &self,
        experiment_key: &str,
        variation_key: &str,
    ) -> Option<&Variation> {
        self.experiment_by_key(experiment_key)?
            .variation_by_key(variation_key)
    }

    pub fn group_by_id(&self, group_id: &str) -> Option<&Group> {
        self.groups.get(group_id)
    }

    pub fn audience_by_id(&self, audience_id: &str) -> Option<&Audience> {
        self.audiences.get(audience_id)
    }

    pub fn rollout_by_id(&self, rollout_id: &str) -> Option<&Rollout> {
        self.rollouts.get(rollout_id)
    }

    pub fn flag_by_key(&self, flag_key: &str) -> Option<&FeatureFlag> {
        self.flags.get(flag_key)
    }

    /// All flags in the order they were declared.
    pub fn flags(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.flag_keys_order
            .iter()
            .filter_map(|key| self.flags.get(key))
    }

    /// Find a variation of the flag (from any of its experiments or rollout rules) by key.
    pub fn flag_variation_by_key(&self, flag_key: &str, variation_key: &str) -> Option<&Variation> {
        self.flag_variations.get(flag_key)?.get(variation_key)
    }
}
