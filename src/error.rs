use std::sync::Arc;

use crate::user_profile::UserProfileStoreError;

/// Result type used by fallible operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can be returned to the caller.
///
/// Decision paths never surface these: configuration absence and store failures are logged and
/// degrade to "no variation". Errors are only returned from boundary operations (override setters
/// and configuration parsing).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Configuration has not been set yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// Configuration document could not be parsed.
    #[error("error parsing configuration")]
    ConfigurationParseError(#[source] Arc<serde_json::Error>),

    /// No experiment with the given key exists in the current configuration.
    #[error("experiment not found: {0}")]
    ExperimentNotFound(String),

    /// The experiment exists but has no variation with the given key.
    #[error("variation {variation_key:?} not found in experiment {experiment_key:?}")]
    VariationNotFound {
        /// Key of the experiment that was searched.
        experiment_key: String,
        /// Requested variation key.
        variation_key: String,
    },

    /// Variation key is empty.
    #[error("invalid variation key")]
    InvalidVariationKey,

    /// The pluggable user profile store returned an error.
    #[error("user profile store error: {0}")]
    UserProfileStore(Arc<UserProfileStoreError>),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParseError(Arc::new(value))
    }
}

impl From<UserProfileStoreError> for Error {
    fn from(value: UserProfileStoreError) -> Self {
        Error::UserProfileStore(Arc::new(value))
    }
}
