use std::sync::Arc;

use crate::{
    configuration_store::ConfigurationStore,
    decision::{DecideOptions, Decision},
    project_config::ProjectConfig,
    ClientConfig, DecisionService, Error, Result, UserContext,
};

/// A client that makes experiment and feature flag decisions against the current configuration.
///
/// In order to create a client instance, first create [`ClientConfig`]. The client has no
/// configuration until one is set through [`Client::set_configuration`] or the shared
/// [`ConfigurationStore`].
///
/// # Examples
/// ```
/// # use decision_core::{Client, ClientConfig};
/// let client = Client::new(ClientConfig::new());
/// ```
pub struct Client {
    configuration_store: Arc<ConfigurationStore>,
    decision_service: DecisionService,
    default_decide_options: DecideOptions,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Self {
        Client::new_with_configuration_store(config, Arc::new(ConfigurationStore::new()))
    }

    /// Create a new `Client` that reads configuration from a store shared with its producer.
    pub fn new_with_configuration_store(
        config: ClientConfig,
        configuration_store: Arc<ConfigurationStore>,
    ) -> Self {
        Client {
            configuration_store,
            decision_service: DecisionService::new(config.user_profile_store),
            default_decide_options: config.default_decide_options,
        }
    }

    pub fn configuration_store(&self) -> &Arc<ConfigurationStore> {
        &self.configuration_store
    }

    /// Replace the current configuration.
    pub fn set_configuration(&self, config: ProjectConfig) {
        self.configuration_store.set_configuration(config);
    }

    /// Parse a JSON datafile and make it the current configuration.
    ///
    /// The current configuration is left untouched if parsing fails.
    pub fn set_configuration_json(&self, json: &str) -> Result<()> {
        let config = ProjectConfig::from_json(json).inspect_err(|err| {
            log::warn!(target: "decision_core", "failed to parse configuration: {err}");
        })?;
        self.set_configuration(config);
        Ok(())
    }

    /// Variation key of the experiment for the given user, or `None` if the user is not
    /// bucketed, the experiment is unknown or there is no configuration yet.
    pub fn get_variation(&self, experiment_key: &str, user: &UserContext) -> Result<Option<String>> {
        let Some(config) = self.configuration_store.get_configuration() else {
            log::warn!(target: "decision_core",
                       experiment_key,
                       user_id = user.user_id();
                       "deciding an experiment before configuration has been set");
            return Ok(None);
        };

        let Some(experiment) = config.experiment_by_key(experiment_key) else {
            log::warn!(target: "decision_core",
                       experiment_key;
                       "experiment is not in the configuration");
            return Ok(None);
        };

        let response = self.decision_service.get_variation(
            &config,
            experiment,
            user,
            &self.default_decide_options,
        );
        let variation_key = response.result.map(|v| v.key.clone());

        log::trace!(target: "decision_core",
                    experiment_key,
                    user_id = user.user_id(),
                    variation_key:serde = variation_key;
                    "decided an experiment");

        Ok(variation_key)
    }

    /// Decide `flag_key` for the user.
    ///
    /// `options` are combined with the client's default options. This never fails: a missing
    /// configuration or flag produces a disabled decision whose reasons say what went wrong.
    pub fn decide(&self, user: &UserContext, flag_key: &str, options: DecideOptions) -> Decision {
        let Some(config) = self.configuration_store.get_configuration() else {
            log::warn!(target: "decision_core",
                       flag_key,
                       user_id = user.user_id();
                       "deciding a flag before configuration has been set");
            return Decision::error(flag_key, vec![CONFIGURATION_MISSING_REASON.to_owned()]);
        };

        let options = self.default_decide_options.union(options);
        self.decide_with_config(&config, user, flag_key, &options)
    }

    /// Decide every flag of the current configuration, in the order they are declared.
    pub fn decide_all(&self, user: &UserContext, options: DecideOptions) -> Vec<Decision> {
        let Some(config) = self.configuration_store.get_configuration() else {
            log::warn!(target: "decision_core",
                       user_id = user.user_id();
                       "deciding all flags before configuration has been set");
            return Vec::new();
        };

        let options = self.default_decide_options.union(options);
        config
            .flags()
            .map(|flag| self.decide_with_config(&config, user, &flag.key, &options))
            .filter(|decision| !options.enabled_flags_only || decision.enabled)
            .collect()
    }

    /// Whether the flag resolves to an enabled variation for the user. Unknown flags are
    /// disabled.
    pub fn is_feature_enabled(&self, flag_key: &str, user: &UserContext) -> Result<bool> {
        let config = self.require_configuration()?;
        if config.flag_by_key(flag_key).is_none() {
            log::warn!(target: "decision_core",
                       flag_key;
                       "flag is not in the configuration");
            return Ok(false);
        }
        Ok(self
            .decide_with_config(&config, user, flag_key, &self.default_decide_options)
            .enabled)
    }

    /// Force the user into a variation of an experiment, or clear the override with `None`.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let config = self.require_configuration()?;
        self.decision_service
            .set_forced_variation(&config, experiment_key, user_id, variation_key)
    }

    pub fn get_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
    ) -> Result<Option<String>> {
        let config = self.require_configuration()?;
        let response = self.decision_service.get_forced_variation(
            &config,
            experiment_key,
            user_id,
            &self.default_decide_options,
        );
        Ok(response.result.map(|v| v.key.clone()))
    }

    fn require_configuration(&self) -> Result<Arc<ProjectConfig>> {
        self.configuration_store
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)
    }

    fn decide_with_config(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        flag_key: &str,
        options: &DecideOptions,
    ) -> Decision {
        let Some(flag) = config.flag_by_key(flag_key) else {
            log::warn!(target: "decision_core",
                       flag_key;
                       "flag is not in the configuration");
            return Decision::error(flag_key, vec![format!("No flag was found for key \"{flag_key}\".")]);
        };

        let response = self
            .decision_service
            .get_variation_for_feature(config, flag, user, options);
        let decision = Decision::from_feature_decision(flag_key, &response.result, response.reasons);

        log::trace!(target: "decision_core",
                    flag_key,
                    user_id = user.user_id(),
                    decision:serde = decision;
                    "decided a flag");

        decision
    }
}

const CONFIGURATION_MISSING_REASON: &str = "Configuration is not available yet.";
