//! Types produced by the decision service.
use serde::Serialize;

use crate::project_config::{Experiment, Variation};

/// Options that alter how a decision is made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecideOptions {
    /// Neither look up nor save sticky decisions in the user profile store.
    pub ignore_user_profile_service: bool,
    /// Return informational reasons in addition to error reasons.
    pub include_reasons: bool,
    /// `decide_all` returns only flags that resolved to an enabled variation.
    pub enabled_flags_only: bool,
}

impl DecideOptions {
    /// Combine two sets of options. An option is set if it is set in either.
    pub fn union(self, other: DecideOptions) -> DecideOptions {
        DecideOptions {
            ignore_user_profile_service: self.ignore_user_profile_service
                || other.ignore_user_profile_service,
            include_reasons: self.include_reasons || other.include_reasons,
            enabled_flags_only: self.enabled_flags_only || other.enabled_flags_only,
        }
    }
}

/// Ordered, human-readable explanation of a decision.
///
/// Every reason is logged at debug level as it is recorded. Informational reasons are kept only
/// when requested; error reasons are always kept.
#[derive(Debug, Clone, Default)]
pub struct DecisionReasons {
    include_infos: bool,
    reasons: Vec<String>,
}

impl DecisionReasons {
    pub fn new(options: &DecideOptions) -> Self {
        DecisionReasons {
            include_infos: options.include_reasons,
            reasons: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!(target: "decision_core", "{message}");
        if self.include_infos {
            self.reasons.push(message);
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!(target: "decision_core", "{message}");
        self.reasons.push(message);
    }

    pub fn as_slice(&self) -> &[String] {
        &self.reasons
    }

    pub fn into_vec(self) -> Vec<String> {
        self.reasons
    }
}

/// A result paired with the reasons that led to it.
#[derive(Debug, Clone)]
pub struct DecisionResponse<T> {
    pub result: T,
    pub reasons: Vec<String>,
}

/// Where a feature decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// An experiment the flag is attached to (or a flag-level forced decision).
    Experiment,
    /// A rule of the flag's rollout.
    Rollout,
    /// Nothing matched.
    None,
}

/// Outcome of resolving a feature flag for a user.
#[derive(Debug, Clone, Copy)]
pub struct FeatureDecision<'a> {
    experiment: Option<&'a Experiment>,
    variation: Option<&'a Variation>,
    source: DecisionSource,
}

impl<'a> FeatureDecision<'a> {
    pub fn none() -> FeatureDecision<'a> {
        FeatureDecision {
            experiment: None,
            variation: None,
            source: DecisionSource::None,
        }
    }

    pub(crate) fn from_experiment(
        experiment: Option<&'a Experiment>,
        variation: &'a Variation,
    ) -> FeatureDecision<'a> {
        FeatureDecision {
            experiment,
            variation: Some(variation),
            source: DecisionSource::Experiment,
        }
    }

    pub(crate) fn from_rollout(
        rule: &'a Experiment,
        variation: Option<&'a Variation>,
    ) -> FeatureDecision<'a> {
        FeatureDecision {
            experiment: Some(rule),
            variation,
            source: DecisionSource::Rollout,
        }
    }

    /// Experiment or rollout rule the decision was made in.
    pub fn experiment(&self) -> Option<&'a Experiment> {
        self.experiment
    }

    pub fn variation(&self) -> Option<&'a Variation> {
        self.variation
    }

    pub fn source(&self) -> DecisionSource {
        self.source
    }
}

/// Decision for a flag, as returned to users of [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub flag_key: String,
    pub variation_key: Option<String>,
    pub enabled: bool,
    pub rule_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl Decision {
    pub(crate) fn from_feature_decision(
        flag_key: &str,
        decision: &FeatureDecision,
        reasons: Vec<String>,
    ) -> Decision {
        Decision {
            flag_key: flag_key.to_owned(),
            variation_key: decision.variation().map(|v| v.key.clone()),
            enabled: decision.variation().is_some_and(|v| v.feature_enabled),
            rule_key: decision.experiment().map(|e| e.key.clone()),
            reasons,
        }
    }

    pub(crate) fn error(flag_key: &str, reasons: Vec<String>) -> Decision {
        Decision {
            flag_key: flag_key.to_owned(),
            variation_key: None,
            enabled: false,
            rule_key: None,
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DecideOptions, DecisionReasons, DecisionSource, FeatureDecision};

    #[test]
    fn infos_are_dropped_unless_requested() {
        let mut reasons = DecisionReasons::new(&DecideOptions::default());
        reasons.info("info");
        reasons.error("error");
        assert_eq!(reasons.into_vec(), vec!["error"]);

        let mut reasons = DecisionReasons::new(&DecideOptions {
            include_reasons: true,
            ..Default::default()
        });
        reasons.info("first");
        reasons.error("second");
        reasons.info("third");
        assert_eq!(reasons.as_slice(), ["first", "second", "third"]);
    }

    #[test]
    fn options_union() {
        let a = DecideOptions {
            include_reasons: true,
            ..Default::default()
        };
        let b = DecideOptions {
            ignore_user_profile_service: true,
            ..Default::default()
        };
        let both = a.union(b);
        assert!(both.include_reasons);
        assert!(both.ignore_user_profile_service);
        assert!(!both.enabled_flags_only);
    }

    #[test]
    fn empty_feature_decision() {
        let decision = FeatureDecision::none();
        assert!(decision.experiment().is_none());
        assert!(decision.variation().is_none());
        assert_eq!(decision.source(), DecisionSource::None);
    }
}
