//! Audience evaluation: leaf condition matching against user attributes, and resolution of an
//! experiment's audience tree.
use std::cmp::Ordering;

use semver::Version;
use serde::Deserialize;

use crate::{
    condition_tree::{ConditionTree, LeafEvaluator, LogicalOperator, Ternary},
    decision::DecisionReasons,
    project_config::{Experiment, ProjectConfig},
    AttributeValue, Attributes,
};

/// Only this condition type is evaluated; leaves of any other type are unknown.
pub const CUSTOM_ATTRIBUTE_CONDITION_TYPE: &str = "custom_attribute";

/// Largest integer magnitude that survives a round trip through `f64`.
const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0;

/// A single leaf of an audience condition tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserCondition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub condition_type: String,
    /// Absent match type means [`MatchType::Exact`].
    #[serde(rename = "match", default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A leaf of an audience condition tree as found in the configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConditionLeaf {
    Condition(UserCondition),
    /// A leaf that is not a readable condition. It evaluates to unknown without affecting its
    /// siblings.
    Malformed(serde_json::Value),
}

impl ConditionLeaf {
    pub fn eval(&self, attributes: &Attributes) -> Ternary {
        match self {
            ConditionLeaf::Condition(condition) => condition.eval(attributes),
            ConditionLeaf::Malformed(value) => {
                log::warn!(target: "decision_core",
                           condition:serde = value;
                           "malformed audience condition, evaluating to unknown");
                Ternary::Unknown
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum MatchType {
    Exact,
    Exists,
    Substring,
    Gt,
    Ge,
    Lt,
    Le,
    SemverEq,
    SemverGt,
    SemverGe,
    SemverLt,
    SemverLe,
    /// Match type this version does not know about. Always evaluates to unknown.
    Unknown,
}

impl From<String> for MatchType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "exact" => MatchType::Exact,
            "exists" => MatchType::Exists,
            "substring" => MatchType::Substring,
            "gt" => MatchType::Gt,
            "ge" => MatchType::Ge,
            "lt" => MatchType::Lt,
            "le" => MatchType::Le,
            "semver_eq" => MatchType::SemverEq,
            "semver_gt" => MatchType::SemverGt,
            "semver_ge" => MatchType::SemverGe,
            "semver_lt" => MatchType::SemverLt,
            "semver_le" => MatchType::SemverLe,
            _ => MatchType::Unknown,
        }
    }
}

impl UserCondition {
    pub fn eval(&self, attributes: &Attributes) -> Ternary {
        if self.condition_type != CUSTOM_ATTRIBUTE_CONDITION_TYPE {
            log::warn!(target: "decision_core",
                       condition_name:display = self.name,
                       condition_type:display = self.condition_type;
                       "unknown condition type, evaluating to unknown");
            return Ternary::Unknown;
        }
        let match_type = self.match_type.unwrap_or(MatchType::Exact);
        match_type
            .try_eval(attributes.get(&self.name), &self.value)
            .into()
    }
}

impl MatchType {
    /// Try applying the match to the values, returning `None` if the match cannot be evaluated
    /// (missing attribute, type mismatch, or misconfiguration).
    fn try_eval(
        self,
        attribute: Option<&AttributeValue>,
        condition_value: &serde_json::Value,
    ) -> Option<bool> {
        use serde_json::Value;

        match self {
            MatchType::Exists => Some(attribute.is_some_and(|v| !v.is_null())),

            MatchType::Exact => match (condition_value, attribute?) {
                (Value::String(expected), AttributeValue::String(s)) => Some(s == expected),
                (Value::Bool(expected), AttributeValue::Boolean(b)) => Some(b == expected),
                (Value::Number(expected), AttributeValue::Number(n)) => {
                    let expected = valid_number(expected.as_f64()?)?;
                    Some(valid_number(*n)? == expected)
                }
                _ => None,
            },

            MatchType::Substring => match (condition_value, attribute?) {
                (Value::String(expected), AttributeValue::String(s)) => {
                    Some(s.contains(expected.as_str()))
                }
                _ => None,
            },

            MatchType::Gt | MatchType::Ge | MatchType::Lt | MatchType::Le => {
                let expected = valid_number(condition_value.as_f64()?)?;
                let actual = match attribute? {
                    AttributeValue::Number(n) => valid_number(*n)?,
                    _ => return None,
                };
                let ordering = actual.partial_cmp(&expected)?;
                Some(self.accepts(ordering))
            }

            MatchType::SemverEq
            | MatchType::SemverGt
            | MatchType::SemverGe
            | MatchType::SemverLt
            | MatchType::SemverLe => {
                let target = condition_value.as_str()?;
                let actual = attribute?.as_str()?;
                let ordering = compare_versions(actual, target)?;
                Some(self.accepts(ordering))
            }

            MatchType::Unknown => None,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            MatchType::Gt | MatchType::SemverGt => ordering == Ordering::Greater,
            MatchType::Ge | MatchType::SemverGe => ordering != Ordering::Less,
            MatchType::Lt | MatchType::SemverLt => ordering == Ordering::Less,
            MatchType::Le | MatchType::SemverLe => ordering != Ordering::Greater,
            MatchType::SemverEq => ordering == Ordering::Equal,
            _ => false,
        }
    }
}

fn valid_number(n: f64) -> Option<f64> {
    (n.is_finite() && n.abs() <= MAX_SAFE_NUMBER).then_some(n)
}

/// Compare `actual` against `target`. When `target` omits minor or patch components, only the
/// components present in `target` are compared, so `"2.1.7"` equals target `"2.1"`.
fn compare_versions(actual: &str, target: &str) -> Option<Ordering> {
    let target_core = target.split(['-', '+']).next()?;
    let target_components = target_core.split('.').count();
    if target_components > 3 {
        return None;
    }

    let actual = parse_version(actual)?;
    let target = parse_version(target)?;

    if target_components < 3 {
        let actual = [actual.major, actual.minor, actual.patch];
        let target = [target.major, target.minor, target.patch];
        return Some(actual[..target_components].cmp(&target[..target_components]));
    }
    Some(actual.cmp(&target))
}

/// Parse a possibly partial version (`"2"`, `"2.1"`), ignoring build metadata.
fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    let without_build = s.split('+').next()?;
    let (core, pre) = match without_build.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (without_build, None),
    };
    let mut padded = core.to_owned();
    for _ in core.split('.').count()..3 {
        padded.push_str(".0");
    }
    if let Some(pre) = pre {
        padded.push('-');
        padded.push_str(pre);
    }
    Version::parse(&padded).ok()
}

/// Leaf evaluator over audience condition leaves for a fixed set of attributes.
pub struct AttributeMatcher<'a> {
    attributes: &'a Attributes,
}

impl<'a> AttributeMatcher<'a> {
    pub fn new(attributes: &'a Attributes) -> Self {
        AttributeMatcher { attributes }
    }
}

impl LeafEvaluator<ConditionLeaf> for AttributeMatcher<'_> {
    fn evaluate_leaf(&self, leaf: &ConditionLeaf) -> Ternary {
        leaf.eval(self.attributes)
    }
}

/// Leaf evaluator over audience ids: resolves each id to an audience of the configuration and
/// evaluates its conditions with the injected condition evaluator.
pub struct AudienceIdEvaluator<'a, E> {
    config: &'a ProjectConfig,
    conditions: E,
}

impl<'a, E: LeafEvaluator<ConditionLeaf>> AudienceIdEvaluator<'a, E> {
    pub fn new(config: &'a ProjectConfig, conditions: E) -> Self {
        AudienceIdEvaluator { config, conditions }
    }
}

impl<E: LeafEvaluator<ConditionLeaf>> LeafEvaluator<String> for AudienceIdEvaluator<'_, E> {
    fn evaluate_leaf(&self, audience_id: &String) -> Ternary {
        let Some(audience) = self.config.audience_by_id(audience_id) else {
            log::warn!(target: "decision_core",
                       audience_id:display = audience_id;
                       "audience is not in the configuration");
            return Ternary::Unknown;
        };
        let result = match &audience.conditions {
            Some(conditions) => conditions.evaluate(&self.conditions),
            None => Ternary::Unknown,
        };
        log::debug!(target: "decision_core",
                    audience_id:display = audience_id;
                    "audience evaluated to {result}");
        result
    }
}

/// What an audience tree guards. Only used to phrase decision reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AudienceScope {
    Experiment,
    Rule,
}

/// Evaluate the audience tree of an experiment or rollout rule against `attributes`.
///
/// `audience_conditions` take precedence over `audience_ids` (an implicit `or`). No audiences at
/// all means everyone matches.
pub(crate) fn evaluate_audiences(
    config: &ProjectConfig,
    experiment: &Experiment,
    attributes: &Attributes,
    scope: AudienceScope,
    reasons: &mut DecisionReasons,
) -> Ternary {
    let implicit_or;
    let tree = match &experiment.audience_conditions {
        Some(tree) => tree,
        None => {
            implicit_or = ConditionTree::Node {
                operator: LogicalOperator::Or,
                children: experiment
                    .audience_ids
                    .iter()
                    .cloned()
                    .map(ConditionTree::Leaf)
                    .collect(),
            };
            &implicit_or
        }
    };

    let label = match scope {
        AudienceScope::Experiment => "experiment",
        AudienceScope::Rule => "rule",
    };

    if tree.is_empty() {
        reasons.info(format!(
            "Audiences for {label} \"{}\" collectively evaluated to TRUE.",
            experiment.key
        ));
        return Ternary::True;
    }

    let evaluator = AudienceIdEvaluator::new(config, AttributeMatcher::new(attributes));
    let result = tree.evaluate(&evaluator);
    reasons.info(format!(
        "Audiences for {label} \"{}\" collectively evaluated to {result}.",
        experiment.key
    ));
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::{
        compare_versions, evaluate_audiences, AttributeMatcher, AudienceScope, ConditionLeaf,
        MatchType, UserCondition,
    };
    use crate::{
        condition_tree::{ConditionTree, Ternary},
        decision::{DecideOptions, DecisionReasons},
        project_config::{Datafile, ProjectConfig},
        Attributes,
    };

    fn condition(match_type: Option<&str>, value: serde_json::Value) -> UserCondition {
        serde_json::from_value(json!({
            "name": "attr",
            "type": "custom_attribute",
            "match": match_type,
            "value": value,
        }))
        .unwrap()
    }

    fn attrs(value: impl Into<crate::AttributeValue>) -> Attributes {
        HashMap::from([("attr".to_owned(), value.into())])
    }

    #[test]
    fn exact_defaults_when_match_absent() {
        let c = condition(None, json!("firefox"));
        assert_eq!(c.match_type, None);
        assert_eq!(c.eval(&attrs("firefox")), Ternary::True);
        assert_eq!(c.eval(&attrs("chrome")), Ternary::False);
    }

    #[test]
    fn exact_type_mismatch_is_unknown() {
        let c = condition(Some("exact"), json!("42"));
        assert_eq!(c.eval(&attrs(42.0)), Ternary::Unknown);
        let c = condition(Some("exact"), json!(42));
        assert_eq!(c.eval(&attrs(42.0)), Ternary::True);
        assert_eq!(c.eval(&attrs("42")), Ternary::Unknown);
        let c = condition(Some("exact"), json!(true));
        assert_eq!(c.eval(&attrs(false)), Ternary::False);
    }

    #[test]
    fn missing_attribute_is_unknown() {
        let c = condition(Some("exact"), json!("firefox"));
        assert_eq!(c.eval(&HashMap::new()), Ternary::Unknown);
        let c = condition(Some("gt"), json!(10));
        assert_eq!(c.eval(&HashMap::new()), Ternary::Unknown);
    }

    #[test]
    fn exists_is_always_definite() {
        let c = condition(Some("exists"), serde_json::Value::Null);
        assert_eq!(c.eval(&attrs("anything")), Ternary::True);
        assert_eq!(c.eval(&HashMap::new()), Ternary::False);
        assert_eq!(
            c.eval(&attrs(crate::AttributeValue::Null)),
            Ternary::False
        );
    }

    #[test]
    fn substring() {
        let c = condition(Some("substring"), json!("fox"));
        assert_eq!(c.eval(&attrs("firefox")), Ternary::True);
        assert_eq!(c.eval(&attrs("chrome")), Ternary::False);
        assert_eq!(c.eval(&attrs(1.0)), Ternary::Unknown);
    }

    #[test]
    fn numeric_comparisons() {
        assert_eq!(condition(Some("gt"), json!(18)).eval(&attrs(19.0)), Ternary::True);
        assert_eq!(condition(Some("gt"), json!(18)).eval(&attrs(18.0)), Ternary::False);
        assert_eq!(condition(Some("ge"), json!(18)).eval(&attrs(18.0)), Ternary::True);
        assert_eq!(condition(Some("lt"), json!(18)).eval(&attrs(17.5)), Ternary::True);
        assert_eq!(condition(Some("le"), json!(18)).eval(&attrs(18.5)), Ternary::False);
        assert_eq!(condition(Some("lt"), json!(18)).eval(&attrs("17")), Ternary::Unknown);
        assert_eq!(
            condition(Some("gt"), json!(18)).eval(&attrs(f64::INFINITY)),
            Ternary::Unknown
        );
        assert_eq!(
            condition(Some("gt"), json!(18)).eval(&attrs(1e300)),
            Ternary::Unknown
        );
    }

    #[test]
    fn semver_comparisons() {
        assert_eq!(
            condition(Some("semver_eq"), json!("2.1")).eval(&attrs("2.1.7")),
            Ternary::True
        );
        assert_eq!(
            condition(Some("semver_gt"), json!("2.1.0")).eval(&attrs("2.10.0")),
            Ternary::True
        );
        assert_eq!(
            condition(Some("semver_lt"), json!("2.0.0")).eval(&attrs("2.0.0-beta")),
            Ternary::True
        );
        assert_eq!(
            condition(Some("semver_ge"), json!("3")).eval(&attrs("2.9.9")),
            Ternary::False
        );
        assert_eq!(
            condition(Some("semver_le"), json!("1.2.3")).eval(&attrs("1.2.3+build")),
            Ternary::True
        );
        assert_eq!(
            condition(Some("semver_eq"), json!("1.2.3")).eval(&attrs("not a version")),
            Ternary::Unknown
        );
        assert_eq!(
            condition(Some("semver_eq"), json!("1.2.3")).eval(&attrs(1.0)),
            Ternary::Unknown
        );
    }

    #[test]
    fn partial_versions() {
        assert_eq!(compare_versions("2", "2.0.0"), Some(std::cmp::Ordering::Equal));
        assert_eq!(compare_versions("2.5.1", "2"), Some(std::cmp::Ordering::Equal));
        assert_eq!(compare_versions("1.9", "2"), Some(std::cmp::Ordering::Less));
        assert_eq!(compare_versions("1.2.3", "1.2.3.4"), None);
    }

    #[test]
    fn unknown_match_or_type_is_unknown() {
        let c = condition(Some("regex"), json!(".*"));
        assert_eq!(c.match_type, Some(MatchType::Unknown));
        assert_eq!(c.eval(&attrs("x")), Ternary::Unknown);

        let c: UserCondition = serde_json::from_value(json!({
            "name": "attr",
            "type": "third_party_dimension",
            "value": "x",
        }))
        .unwrap();
        assert_eq!(c.eval(&attrs("x")), Ternary::Unknown);
    }

    #[test]
    fn malformed_leaf_is_unknown_only_for_itself() {
        let tree: ConditionTree<ConditionLeaf> = serde_json::from_value(json!([
            "or",
            {"type": "custom_attribute", "value": "x"},
            {"name": "attr", "type": "custom_attribute", "match": "exact", "value": "us"}
        ]))
        .unwrap();
        let ConditionTree::Node { children, .. } = &tree else {
            panic!("expected a node");
        };
        assert!(matches!(children[0], ConditionTree::Leaf(ConditionLeaf::Malformed(_))));
        assert!(matches!(children[1], ConditionTree::Leaf(ConditionLeaf::Condition(_))));

        let us = attrs("us");
        assert_eq!(tree.evaluate(&AttributeMatcher::new(&us)), Ternary::True);
        let ca = attrs("ca");
        assert_eq!(tree.evaluate(&AttributeMatcher::new(&ca)), Ternary::Unknown);

        let tree: ConditionTree<ConditionLeaf> = serde_json::from_value(json!([
            "and",
            42,
            {"name": "attr", "type": "custom_attribute", "match": "exact", "value": "us"}
        ]))
        .unwrap();
        assert_eq!(tree.evaluate(&AttributeMatcher::new(&us)), Ternary::Unknown);
        assert_eq!(tree.evaluate(&AttributeMatcher::new(&ca)), Ternary::False);
    }

    #[test]
    fn audience_with_malformed_leaf_still_matches() {
        let datafile: Datafile = serde_json::from_value(json!({
            "audiences": [{
                "id": "1",
                "name": "partly broken",
                "conditions": "[\"or\", {\"type\": \"custom_attribute\", \"value\": \"x\"}, {\"name\": \"country\", \"type\": \"custom_attribute\", \"match\": \"exact\", \"value\": \"us\"}]"
            }],
            "experiments": [{
                "id": "e", "key": "exp", "status": "Running", "audienceIds": ["1"]
            }]
        }))
        .unwrap();
        let config = ProjectConfig::new(datafile);
        assert!(config.audience_by_id("1").unwrap().conditions.is_some());

        let experiment = config.experiment_by_key("exp").unwrap();
        let attributes = HashMap::from([("country".to_owned(), "us".into())]);
        let mut reasons = DecisionReasons::new(&DecideOptions::default());
        assert_eq!(
            evaluate_audiences(
                &config,
                experiment,
                &attributes,
                AudienceScope::Experiment,
                &mut reasons
            ),
            Ternary::True
        );
    }
}
