use crate::{
    audience::{evaluate_audiences, AudienceScope},
    bucketer,
    decision::{DecideOptions, DecisionReasons, DecisionResponse, FeatureDecision},
    forced_decisions::{DecisionContext, ForcedVariations},
    project_config::{Experiment, FeatureFlag, ProjectConfig, Variation},
    sharder::Murmur3Sharder,
    user_profile::{UserProfile, UserProfileStore},
    Error, Result, UserContext,
};

/// Resolves variations for experiments and feature flags.
///
/// The service is stateless with respect to the configuration, which is passed to every call. It
/// owns the legacy forced variation map and the optional user profile store.
pub struct DecisionService {
    forced_variations: ForcedVariations,
    user_profile_store: Option<Box<dyn UserProfileStore>>,
}

/// Why a rollout rule produced no variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleNonMatchReason {
    FailingAudience,
    TrafficAllocationMiss,
}

impl DecisionService {
    pub fn new(user_profile_store: Option<Box<dyn UserProfileStore>>) -> Self {
        DecisionService {
            forced_variations: ForcedVariations::new(),
            user_profile_store,
        }
    }

    pub fn set_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        self.forced_variations
            .set(config, experiment_key, user_id, variation_key)
    }

    pub fn get_forced_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        options: &DecideOptions,
    ) -> DecisionResponse<Option<&'a Variation>> {
        let mut reasons = DecisionReasons::new(options);
        let result = match config.experiment_by_key(experiment_key) {
            Some(experiment) => self.forced_variations.get(experiment, user_id, &mut reasons),
            None => {
                reasons.error(format!(
                    "Experiment key \"{experiment_key}\" is not in the configuration."
                ));
                None
            }
        };
        DecisionResponse {
            result,
            reasons: reasons.into_vec(),
        }
    }

    /// Resolve the variation of `experiment` for `user`.
    ///
    /// Precedence: forced variation, whitelist, stored (sticky) decision, then audience match
    /// followed by bucketing.
    pub fn get_variation<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment: &'a Experiment,
        user: &UserContext,
        options: &DecideOptions,
    ) -> DecisionResponse<Option<&'a Variation>> {
        let mut reasons = DecisionReasons::new(options);
        let result = self.get_variation_inner(config, experiment, user, options, &mut reasons);
        DecisionResponse {
            result,
            reasons: reasons.into_vec(),
        }
    }

    fn get_variation_inner<'a>(
        &self,
        config: &'a ProjectConfig,
        experiment: &'a Experiment,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let user_id = user.user_id();

        if !experiment.is_running() {
            reasons.info(format!("Experiment \"{}\" is not running.", experiment.key));
            return None;
        }

        if let Some(variation) = self.forced_variations.get(experiment, user_id, reasons) {
            return Some(variation);
        }

        if let Some(variation) = whitelisted_variation(experiment, user_id, reasons) {
            return Some(variation);
        }

        let sticky = self
            .user_profile_store
            .as_deref()
            .filter(|_| !options.ignore_user_profile_service);

        let profile = sticky.and_then(|store| lookup_profile(store, user_id, reasons));
        if let Some(variation) = profile
            .as_ref()
            .and_then(|profile| stored_variation(experiment, profile, reasons))
        {
            return Some(variation);
        }

        let audience_result = evaluate_audiences(
            config,
            experiment,
            user.attributes(),
            AudienceScope::Experiment,
            reasons,
        );
        if !audience_result.is_true() {
            reasons.info(format!(
                "User \"{user_id}\" does not meet conditions to be in experiment \"{}\".",
                experiment.key
            ));
            return None;
        }

        let bucketing_id = user.bucketing_id(reasons);
        let variation =
            bucketer::bucket_experiment(&Murmur3Sharder, config, experiment, bucketing_id, reasons);

        match variation {
            Some(variation) => {
                reasons.info(format!(
                    "User \"{user_id}\" is in variation \"{}\" of experiment \"{}\".",
                    variation.key, experiment.key
                ));
                if let Some(store) = sticky {
                    save_profile(store, profile, user_id, experiment, variation, reasons);
                }
            }
            None => {
                reasons.info(format!(
                    "User \"{user_id}\" is in no variation of experiment \"{}\".",
                    experiment.key
                ));
            }
        }

        variation
    }

    /// Resolve `flag` for `user`: flag-level forced decision, then the flag's experiments in
    /// order, then its rollout rules.
    pub fn get_variation_for_feature<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &'a FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
    ) -> DecisionResponse<FeatureDecision<'a>> {
        let mut reasons = DecisionReasons::new(options);
        let result = self.get_variation_for_feature_inner(config, flag, user, options, &mut reasons);
        DecisionResponse {
            result,
            reasons: reasons.into_vec(),
        }
    }

    fn get_variation_for_feature_inner<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &'a FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> FeatureDecision<'a> {
        let context = DecisionContext::new(&flag.key, None);
        if let Some(variation) = forced_decision(config, user, &context, reasons) {
            return FeatureDecision::from_experiment(None, variation);
        }

        if let Some(decision) =
            self.get_variation_for_feature_experiment(config, flag, user, options, reasons)
        {
            return decision;
        }

        self.get_variation_for_rollout(config, flag, user, reasons)
    }

    fn get_variation_for_feature_experiment<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &'a FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Option<FeatureDecision<'a>> {
        if flag.experiment_ids.is_empty() {
            reasons.info(format!(
                "The feature flag \"{}\" is not used in any experiments.",
                flag.key
            ));
            return None;
        }

        for experiment_id in &flag.experiment_ids {
            let Some(experiment) = config.experiment_by_id(experiment_id) else {
                reasons.error(format!(
                    "Experiment ID \"{experiment_id}\" of flag \"{}\" is not in the configuration.",
                    flag.key
                ));
                continue;
            };

            let context = DecisionContext::new(&flag.key, Some(experiment.key.as_str()));
            if let Some(variation) = forced_decision(config, user, &context, reasons) {
                return Some(FeatureDecision::from_experiment(Some(experiment), variation));
            }

            if let Some(variation) =
                self.get_variation_inner(config, experiment, user, options, reasons)
            {
                reasons.info(format!(
                    "The user \"{}\" is bucketed into experiment \"{}\" of feature \"{}\".",
                    user.user_id(),
                    experiment.key,
                    flag.key
                ));
                return Some(FeatureDecision::from_experiment(Some(experiment), variation));
            }
        }

        reasons.info(format!(
            "The user \"{}\" is not bucketed into any of the experiments on the feature \"{}\".",
            user.user_id(),
            flag.key
        ));
        None
    }

    /// Evaluate rollout rules in order. A user who matches a targeted rule's audience but misses
    /// its traffic allocation goes straight to the "everyone else" rule; later targeted rules are
    /// not evaluated.
    fn get_variation_for_rollout<'a>(
        &self,
        config: &'a ProjectConfig,
        flag: &'a FeatureFlag,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> FeatureDecision<'a> {
        let Some(rollout_id) = flag.rollout_id() else {
            reasons.info(format!(
                "The feature flag \"{}\" is not used in a rollout.",
                flag.key
            ));
            return FeatureDecision::none();
        };

        let Some(rollout) = config.rollout_by_id(rollout_id) else {
            reasons.error(format!(
                "Rollout ID \"{rollout_id}\" of flag \"{}\" is not in the configuration.",
                flag.key
            ));
            return FeatureDecision::none();
        };

        let Some((everyone_else, targeted_rules)) = rollout.experiments.split_last() else {
            reasons.info(format!("Rollout \"{rollout_id}\" has no rules."));
            return FeatureDecision::none();
        };

        for (index, rule) in targeted_rules.iter().enumerate() {
            let context = DecisionContext::new(&flag.key, Some(rule.key.as_str()));
            if let Some(variation) = forced_decision(config, user, &context, reasons) {
                return FeatureDecision::from_rollout(rule, Some(variation));
            }

            let rule_label = format!("{}", index + 1);
            match self.evaluate_rule(config, rule, &rule_label, user, reasons) {
                Ok(variation) => return FeatureDecision::from_rollout(rule, Some(variation)),
                Err(RuleNonMatchReason::FailingAudience) => continue,
                Err(RuleNonMatchReason::TrafficAllocationMiss) => {
                    reasons.info(format!(
                        "User \"{}\" is not in the traffic group for targeting rule {rule_label}. \
                         Checking \"Everyone Else\" rule now.",
                        user.user_id()
                    ));
                    break;
                }
            }
        }

        let context = DecisionContext::new(&flag.key, Some(everyone_else.key.as_str()));
        if let Some(variation) = forced_decision(config, user, &context, reasons) {
            return FeatureDecision::from_rollout(everyone_else, Some(variation));
        }

        match self.evaluate_rule(config, everyone_else, "Everyone Else", user, reasons) {
            Ok(variation) => FeatureDecision::from_rollout(everyone_else, Some(variation)),
            Err(RuleNonMatchReason::TrafficAllocationMiss) => {
                FeatureDecision::from_rollout(everyone_else, None)
            }
            Err(RuleNonMatchReason::FailingAudience) => FeatureDecision::none(),
        }
    }

    fn evaluate_rule<'a>(
        &self,
        config: &ProjectConfig,
        rule: &'a Experiment,
        rule_label: &str,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> std::result::Result<&'a Variation, RuleNonMatchReason> {
        let user_id = user.user_id();

        let audience_result =
            evaluate_audiences(config, rule, user.attributes(), AudienceScope::Rule, reasons);
        if !audience_result.is_true() {
            reasons.info(format!(
                "User \"{user_id}\" does not meet conditions for targeting rule {rule_label}."
            ));
            return Err(RuleNonMatchReason::FailingAudience);
        }
        reasons.info(format!(
            "User \"{user_id}\" meets conditions for targeting rule {rule_label}."
        ));

        let bucketing_id = user.bucketing_id(reasons);
        match bucketer::bucket_rule(&Murmur3Sharder, rule, bucketing_id, reasons) {
            Some(variation) => {
                reasons.info(format!(
                    "User \"{user_id}\" bucketed into variation \"{}\" of targeting rule {rule_label}.",
                    variation.key
                ));
                Ok(variation)
            }
            None => Err(RuleNonMatchReason::TrafficAllocationMiss),
        }
    }
}

fn forced_decision<'a>(
    config: &'a ProjectConfig,
    user: &UserContext,
    context: &DecisionContext,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    user.forced_decisions()
        .find_validated(config, context, user.user_id(), reasons)
}

fn whitelisted_variation<'a>(
    experiment: &'a Experiment,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let variation_key = experiment.forced_variations.get(user_id)?;
    match experiment.variation_by_key(variation_key) {
        Some(variation) => {
            reasons.info(format!(
                "User \"{user_id}\" is forced in variation \"{variation_key}\"."
            ));
            Some(variation)
        }
        None => {
            reasons.error(format!(
                "Variation \"{variation_key}\" is not in the datafile. Not activating user \"{user_id}\"."
            ));
            None
        }
    }
}

fn stored_variation<'a>(
    experiment: &'a Experiment,
    profile: &UserProfile,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let variation_id = profile.variation_id_for_experiment(&experiment.id)?;
    match experiment.variation_by_id(variation_id) {
        Some(variation) => {
            reasons.info(format!(
                "Returning previously activated variation \"{}\" of experiment \"{}\" for user \"{}\" from user profile.",
                variation.key, experiment.key, profile.user_id
            ));
            Some(variation)
        }
        None => {
            reasons.info(format!(
                "User \"{}\" was previously bucketed into variation with ID \"{variation_id}\" for experiment \"{}\", but no matching variation was found. Re-bucketing user.",
                profile.user_id, experiment.key
            ));
            None
        }
    }
}

fn lookup_profile(
    store: &dyn UserProfileStore,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<UserProfile> {
    match store.lookup(user_id) {
        Ok(profile) => profile,
        Err(err) => {
            let err = Error::from(err);
            log::warn!(target: "decision_core",
                       user_id;
                       "user profile lookup failed: {err}");
            reasons.error(format!(
                "Unable to retrieve user profile for user \"{user_id}\" as lookup failed."
            ));
            None
        }
    }
}

fn save_profile(
    store: &dyn UserProfileStore,
    profile: Option<UserProfile>,
    user_id: &str,
    experiment: &Experiment,
    variation: &Variation,
    reasons: &mut DecisionReasons,
) {
    let mut profile = profile.unwrap_or_else(|| UserProfile::new(user_id));
    profile.save_variation_for_experiment(&experiment.id, &variation.id);

    match store.save(&profile) {
        Ok(()) => reasons.info(format!(
            "Saved variation \"{}\" of experiment \"{}\" for user \"{user_id}\".",
            variation.key, experiment.key
        )),
        Err(err) => {
            let err = Error::from(err);
            log::warn!(target: "decision_core",
                       user_id;
                       "user profile save failed: {err}");
            reasons.error(format!(
                "Failed to save variation \"{}\" of experiment \"{}\" for user \"{user_id}\".",
                variation.key, experiment.key
            ));
        }
    }
}
