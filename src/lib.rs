//! `decision_core` decides which variation of an experiment or feature flag a user gets.
//!
//! # Overview
//!
//! [`ProjectConfig`](project_config::ProjectConfig) is an immutable, indexed view over a JSON
//! datafile: experiments, mutually exclusive groups, audiences, feature flags and their rollouts.
//! [`ConfigurationStore`](configuration_store::ConfigurationStore) holds the current configuration
//! and hands out snapshots; a configuration swapped in during a decision does not affect it.
//!
//! [`DecisionService`] resolves a [`UserContext`] against a configuration snapshot. For an
//! experiment it walks a fixed waterfall: forced variation, whitelist, stored (sticky) decision,
//! audience match, and finally bucketing. For a feature flag it consults the user's forced
//! decisions, then the flag's experiments in order, then the rules of its rollout.
//!
//! Bucketing is deterministic: the same bucketing id always lands in the same bucket, in this
//! crate and in any other implementation using the same [`sharder`]. Audience targeting uses
//! three-valued logic over [`condition_tree::ConditionTree`]s, where missing or mistyped
//! attributes evaluate to [`Ternary::Unknown`](condition_tree::Ternary::Unknown).
//!
//! [`Client`] ties a configuration store and a decision service together and exposes decisions
//! by key.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. They are only returned from boundary operations
//! such as setting a forced variation or parsing a configuration. Decisions themselves never fail:
//! an unknown experiment or flag key, audience or variation makes that step yield no variation. It
//! is logged as a warning and reported in the decision reasons.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with structured key-values,
//! under the `decision_core` target. Every decision reason is logged at debug level; problems with
//! the configuration or the user profile store are logged as warnings.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod audience;
pub mod bucketer;
pub mod condition_tree;
pub mod configuration_store;
pub mod decision;
pub mod forced_decisions;
pub mod project_config;
pub mod sharder;
pub mod user_profile;

mod attributes;
mod client;
mod config;
mod decision_service;
mod error;
mod user_context;

pub use attributes::{AttributeValue, Attributes, BUCKETING_ID_ATTRIBUTE};
pub use client::Client;
pub use config::ClientConfig;
pub use decision::{DecideOptions, Decision};
pub use decision_service::DecisionService;
pub use error::{Error, Result};
pub use user_context::UserContext;
