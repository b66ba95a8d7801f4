use crate::{decision::DecideOptions, user_profile::UserProfileStore, Client};

/// Configuration for [`Client`].
#[derive(Default)]
pub struct ClientConfig {
    pub(crate) user_profile_store: Option<Box<dyn UserProfileStore>>,
    pub(crate) default_decide_options: DecideOptions,
}

impl ClientConfig {
    /// Create a default configuration: no user profile store and no default decide options.
    ///
    /// ```
    /// # use decision_core::ClientConfig;
    /// ClientConfig::new();
    /// ```
    pub fn new() -> Self {
        ClientConfig::default()
    }

    /// Set a user profile store to make experiment decisions sticky across configuration changes.
    pub fn user_profile_store(&mut self, store: impl UserProfileStore + 'static) -> &mut Self {
        self.user_profile_store = Some(Box::new(store));
        self
    }

    /// Options applied to every [`Client::decide`] call, in addition to the per-call options.
    ///
    /// ```
    /// # use decision_core::{ClientConfig, DecideOptions};
    /// let mut config = ClientConfig::new();
    /// config.default_decide_options(DecideOptions {
    ///     include_reasons: true,
    ///     ..Default::default()
    /// });
    /// ```
    pub fn default_decide_options(&mut self, options: DecideOptions) -> &mut Self {
        self.default_decide_options = options;
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use decision_core::{Client, ClientConfig};
    /// let client: Client = ClientConfig::new().to_client();
    /// ```
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}
