//! Explicit overrides that bypass audience evaluation and bucketing.
//!
//! There are two independent layers:
//! - [`ForcedVariations`]: a long-lived map of user id to experiment id to variation id, owned by
//!   the [`DecisionService`](crate::DecisionService) and consulted first in experiment flows.
//! - [`ForcedDecisions`]: a per-[`UserContext`](crate::UserContext) map keyed by flag key and
//!   optional rule key, consulted first in feature flows.
use std::{collections::HashMap, sync::RwLock};

use crate::{
    decision::DecisionReasons,
    project_config::{Experiment, ProjectConfig, Variation},
    Error, Result,
};

#[derive(Debug, Default)]
pub struct ForcedVariations {
    /// user id -> experiment id -> variation id
    map: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ForcedVariations {
    pub fn new() -> Self {
        ForcedVariations::default()
    }

    /// Force `user_id` into `variation_key` of the experiment, or clear the override when
    /// `variation_key` is `None`.
    ///
    /// Nothing is changed if the experiment or variation is not in `config`.
    pub fn set(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let Some(experiment) = config.experiment_by_key(experiment_key) else {
            log::warn!(target: "decision_core",
                       experiment_key,
                       user_id;
                       "cannot set forced variation: experiment is not in the configuration");
            return Err(Error::ExperimentNotFound(experiment_key.to_owned()));
        };

        let Some(variation_key) = variation_key else {
            self.clear(&experiment.id, user_id);
            log::info!(target: "decision_core",
                       experiment_key,
                       user_id;
                       "cleared forced variation");
            return Ok(());
        };

        if variation_key.is_empty() {
            log::warn!(target: "decision_core",
                       experiment_key,
                       user_id;
                       "cannot set forced variation: variation key is empty");
            return Err(Error::InvalidVariationKey);
        }

        let Some(variation) = experiment.variation_by_key(variation_key) else {
            log::warn!(target: "decision_core",
                       experiment_key,
                       user_id,
                       variation_key;
                       "cannot set forced variation: variation is not in the experiment");
            return Err(Error::VariationNotFound {
                experiment_key: experiment_key.to_owned(),
                variation_key: variation_key.to_owned(),
            });
        };

        {
            let mut map = self
                .map
                .write()
                .expect("thread holding forced variations lock should not panic");
            map.entry(user_id.to_owned())
                .or_default()
                .insert(experiment.id.clone(), variation.id.clone());
        }

        log::info!(target: "decision_core",
                   experiment_key,
                   user_id,
                   variation_key;
                   "set forced variation");
        Ok(())
    }

    fn clear(&self, experiment_id: &str, user_id: &str) {
        let mut map = self
            .map
            .write()
            .expect("thread holding forced variations lock should not panic");
        if let Some(experiments) = map.get_mut(user_id) {
            experiments.remove(experiment_id);
            // Leave no trace, so a cleared user looks exactly like one that was never set.
            if experiments.is_empty() {
                map.remove(user_id);
            }
        }
    }

    /// Forced variation of `user_id` in `experiment`, if one is set and the variation still
    /// exists in the experiment.
    pub fn get<'a>(
        &self,
        experiment: &'a Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let variation_id = {
            let map = self
                .map
                .read()
                .expect("thread holding forced variations lock should not panic");
            map.get(user_id)?.get(&experiment.id)?.clone()
        };

        let Some(variation) = experiment.variation_by_id(&variation_id) else {
            reasons.error(format!(
                "Forced variation ID \"{variation_id}\" of user \"{user_id}\" is not in experiment \"{}\".",
                experiment.key
            ));
            return None;
        };

        reasons.info(format!(
            "Variation \"{}\" is mapped to experiment \"{}\" and user \"{user_id}\" in the forced variation map.",
            variation.key, experiment.key
        ));
        Some(variation)
    }

    /// Number of users with at least one forced variation.
    #[cfg(test)]
    fn user_count(&self) -> usize {
        self.map
            .read()
            .expect("thread holding forced variations lock should not panic")
            .len()
    }
}

/// Key of a forced decision: a flag, optionally narrowed to one of its rules.
///
/// `(flag, None)` and `(flag, Some(rule))` are independent slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionContext {
    pub flag_key: String,
    pub rule_key: Option<String>,
}

impl DecisionContext {
    pub fn new(flag_key: impl Into<String>, rule_key: Option<&str>) -> Self {
        DecisionContext {
            flag_key: flag_key.into(),
            rule_key: rule_key.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedDecision {
    pub variation_key: String,
}

impl ForcedDecision {
    pub fn new(variation_key: impl Into<String>) -> Self {
        ForcedDecision {
            variation_key: variation_key.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ForcedDecisions {
    map: RwLock<HashMap<DecisionContext, ForcedDecision>>,
}

impl ForcedDecisions {
    pub fn new() -> Self {
        ForcedDecisions::default()
    }

    /// Insert or overwrite the forced decision for exactly `context`.
    pub fn set(&self, context: DecisionContext, decision: ForcedDecision) -> Result<()> {
        if decision.variation_key.is_empty() {
            return Err(Error::InvalidVariationKey);
        }
        self.map
            .write()
            .expect("thread holding forced decisions lock should not panic")
            .insert(context, decision);
        Ok(())
    }

    pub fn get(&self, context: &DecisionContext) -> Option<ForcedDecision> {
        self.map
            .read()
            .expect("thread holding forced decisions lock should not panic")
            .get(context)
            .cloned()
    }

    /// Remove exactly the slot for `context`. Returns `true` if there was one.
    pub fn remove(&self, context: &DecisionContext) -> bool {
        self.map
            .write()
            .expect("thread holding forced decisions lock should not panic")
            .remove(context)
            .is_some()
    }

    pub fn remove_all(&self) {
        self.map
            .write()
            .expect("thread holding forced decisions lock should not panic")
            .clear();
    }

    pub fn is_empty(&self) -> bool {
        self.map
            .read()
            .expect("thread holding forced decisions lock should not panic")
            .is_empty()
    }

    /// Resolve the forced decision for `context` to a variation of the flag.
    ///
    /// A forced decision that names a variation the flag doesn't have is ignored.
    pub(crate) fn find_validated<'a>(
        &self,
        config: &'a ProjectConfig,
        context: &DecisionContext,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let decision = self.get(context)?;
        let target = match &context.rule_key {
            Some(rule_key) => format!("flag ({}), rule ({rule_key})", context.flag_key),
            None => format!("flag ({})", context.flag_key),
        };

        match config.flag_variation_by_key(&context.flag_key, &decision.variation_key) {
            Some(variation) => {
                reasons.info(format!(
                    "Variation ({}) is mapped to {target} and user ({user_id}) in the forced decision map.",
                    variation.key
                ));
                Some(variation)
            }
            None => {
                reasons.info(format!(
                    "Invalid variation is mapped to {target} and user ({user_id}) in the forced decision map."
                ));
                None
            }
        }
    }
}

impl Clone for ForcedDecisions {
    fn clone(&self) -> Self {
        let map = self
            .map
            .read()
            .expect("thread holding forced decisions lock should not panic")
            .clone();
        ForcedDecisions {
            map: RwLock::new(map),
        }
    }
}
