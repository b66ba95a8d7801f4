//! Deterministic placement of a bucketing id into traffic allocation tables.
use crate::{
    decision::DecisionReasons,
    project_config::{Experiment, GroupPolicy, ProjectConfig, TrafficAllocation, Variation},
    sharder::Sharder,
};

/// Size of the bucket space. Allocation boundaries are expressed in this space.
pub const TOTAL_BUCKETS: u64 = 10_000;

/// Bucket value of `bucketing_id` for the given entity (experiment, group, or rule id).
pub fn bucket(sharder: &impl Sharder, bucketing_id: &str, entity_id: &str) -> u64 {
    sharder.get_shard(format!("{bucketing_id}{entity_id}"), TOTAL_BUCKETS)
}

/// Return the entity whose range contains `bucket_value`.
///
/// Returns `None` if the value falls past the last range, or into a range with an empty entity id
/// (a deliberate hole in the allocation).
pub fn resolve(bucket_value: u64, traffic_allocation: &[TrafficAllocation]) -> Option<&str> {
    traffic_allocation
        .iter()
        .find(|allocation| bucket_value < allocation.end_of_range)
        .map(|allocation| allocation.entity_id.as_str())
        .filter(|entity_id| !entity_id.is_empty())
}

/// Bucket into `experiment`, honoring mutually exclusive groups.
///
/// For an experiment in a `random` group, the user is first placed in the group's allocation;
/// they proceed to the experiment's own allocation only if the group selects this experiment.
pub(crate) fn bucket_experiment<'a>(
    sharder: &impl Sharder,
    config: &ProjectConfig,
    experiment: &'a Experiment,
    bucketing_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    if let (Some(group_id), Some(GroupPolicy::Random)) =
        (&experiment.group_id, experiment.group_policy)
    {
        let Some(group) = config.group_by_id(group_id) else {
            reasons.error(format!(
                "Group \"{group_id}\" of experiment \"{}\" is not in the configuration.",
                experiment.key
            ));
            return None;
        };

        let group_bucket = bucket(sharder, bucketing_id, &group.id);
        match resolve(group_bucket, &group.traffic_allocation) {
            None => {
                reasons.info(format!(
                    "User with bucketing ID \"{bucketing_id}\" is not in any experiment of group {group_id}."
                ));
                return None;
            }
            Some(selected) if selected != experiment.id => {
                reasons.info(format!(
                    "User with bucketing ID \"{bucketing_id}\" is not in experiment \"{}\" of group {group_id}.",
                    experiment.key
                ));
                return None;
            }
            Some(_) => {
                reasons.info(format!(
                    "User with bucketing ID \"{bucketing_id}\" is in experiment \"{}\" of group {group_id}.",
                    experiment.key
                ));
            }
        }
    }

    bucket_rule(sharder, experiment, bucketing_id, reasons)
}

/// Bucket into the experiment's (or rollout rule's) own variation allocation.
pub(crate) fn bucket_rule<'a>(
    sharder: &impl Sharder,
    experiment: &'a Experiment,
    bucketing_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'a Variation> {
    let bucket_value = bucket(sharder, bucketing_id, &experiment.id);
    log::trace!(target: "decision_core",
                bucketing_id,
                experiment_key:display = experiment.key,
                bucket_value;
                "assigned bucket");

    let variation_id = resolve(bucket_value, &experiment.traffic_allocation)?;
    let variation = experiment.variation_by_id(variation_id);
    if variation.is_none() {
        reasons.error(format!(
            "Variation ID \"{variation_id}\" of experiment \"{}\" is not in the configuration.",
            experiment.key
        ));
    }
    variation
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{bucket, bucket_experiment, resolve, TOTAL_BUCKETS};
    use crate::{
        decision::{DecideOptions, DecisionReasons},
        project_config::{Datafile, ProjectConfig, TrafficAllocation},
        sharder::Murmur3Sharder,
    };

    fn table(entries: &[(&str, u64)]) -> Vec<TrafficAllocation> {
        entries
            .iter()
            .map(|(entity_id, end_of_range)| TrafficAllocation {
                entity_id: entity_id.to_string(),
                end_of_range: *end_of_range,
            })
            .collect()
    }

    #[test]
    fn bucket_reference_values() {
        assert_eq!(bucket(&Murmur3Sharder, "ppid1", "1886780721"), 5254);
        assert_eq!(bucket(&Murmur3Sharder, "ppid2", "1886780721"), 4299);
        assert_eq!(bucket(&Murmur3Sharder, "ppid2", "1886780722"), 2434);
        assert_eq!(bucket(&Murmur3Sharder, "ppid3", "1886780721"), 5439);
        assert_eq!(
            bucket(
                &Murmur3Sharder,
                "a very very very very very very very very very very very very very very very long ppd string",
                "1886780721"
            ),
            6128
        );
    }

    #[test]
    fn bucket_is_within_space() {
        for i in 0..1000 {
            assert!(bucket(&Murmur3Sharder, &format!("user{i}"), "exp") < TOTAL_BUCKETS);
        }
    }

    #[test]
    fn resolve_picks_containing_range() {
        let table = table(&[("a", 2500), ("b", 5000), ("c", 10_000)]);
        assert_eq!(resolve(0, &table), Some("a"));
        assert_eq!(resolve(2499, &table), Some("a"));
        assert_eq!(resolve(2500, &table), Some("b"));
        assert_eq!(resolve(9999, &table), Some("c"));
    }

    #[test]
    fn resolve_past_last_boundary_is_none() {
        let table = table(&[("a", 4000)]);
        assert_eq!(resolve(4000, &table), None);
        assert_eq!(resolve(9999, &table), None);
        assert_eq!(resolve(0, &[]), None);
    }

    #[test]
    fn resolve_empty_entity_is_none() {
        let table = table(&[("", 5000), ("b", 10_000)]);
        assert_eq!(resolve(100, &table), None);
        assert_eq!(resolve(5000, &table), Some("b"));
    }

    fn group_config() -> ProjectConfig {
        // Group allocation: "exp_a" for [0, 5000), "exp_b" for [5000, 10000).
        // bucket("ppid1", "group") decides group membership.
        let datafile: Datafile = serde_json::from_value(json!({
            "groups": [{
                "id": "group",
                "policy": "random",
                "trafficAllocation": [
                    {"entityId": "exp_a", "endOfRange": 5000},
                    {"entityId": "exp_b", "endOfRange": 10000}
                ],
                "experiments": [
                    {
                        "id": "exp_a", "key": "a", "status": "Running",
                        "variations": [{"id": "va", "key": "va"}],
                        "trafficAllocation": [{"entityId": "va", "endOfRange": 10000}]
                    },
                    {
                        "id": "exp_b", "key": "b", "status": "Running",
                        "variations": [{"id": "vb", "key": "vb"}],
                        "trafficAllocation": [{"entityId": "vb", "endOfRange": 10000}]
                    }
                ]
            }]
        }))
        .unwrap();
        ProjectConfig::new(datafile)
    }

    #[test]
    fn mutually_exclusive_group_selects_at_most_one_experiment() {
        let config = group_config();
        let a = config.experiment_by_key("a").unwrap();
        let b = config.experiment_by_key("b").unwrap();

        for i in 0..200 {
            let bucketing_id = format!("user{i}");
            let mut reasons = DecisionReasons::new(&DecideOptions::default());
            let in_a = bucket_experiment(&Murmur3Sharder, &config, a, &bucketing_id, &mut reasons);
            let in_b = bucket_experiment(&Murmur3Sharder, &config, b, &bucketing_id, &mut reasons);
            assert!(in_a.is_some() != in_b.is_some(), "user{i} must be in exactly one");

            let group_bucket = bucket(&Murmur3Sharder, &bucketing_id, "group");
            assert_eq!(in_a.is_some(), group_bucket < 5000);
        }
    }

    #[test]
    fn group_miss_skips_experiment_allocation() {
        // Empty group allocation: nobody is selected.
        let datafile: Datafile = serde_json::from_value(json!({
            "groups": [{
                "id": "group",
                "policy": "random",
                "trafficAllocation": [],
                "experiments": [{
                    "id": "exp_a", "key": "a", "status": "Running",
                    "variations": [{"id": "va", "key": "va"}],
                    "trafficAllocation": [{"entityId": "va", "endOfRange": 10000}]
                }]
            }]
        }))
        .unwrap();
        let config = ProjectConfig::new(datafile);
        let a = config.experiment_by_key("a").unwrap();

        let mut reasons = DecisionReasons::new(&DecideOptions {
            include_reasons: true,
            ..Default::default()
        });
        assert!(bucket_experiment(&Murmur3Sharder, &config, a, "ppid1", &mut reasons).is_none());
        assert!(reasons.as_slice()[0].contains("is not in any experiment of group"));
    }

    #[test]
    fn overlapping_group_ignores_group_allocation() {
        let datafile: Datafile = serde_json::from_value(json!({
            "groups": [{
                "id": "group",
                "policy": "overlapping",
                "trafficAllocation": [],
                "experiments": [{
                    "id": "exp_a", "key": "a", "status": "Running",
                    "variations": [{"id": "va", "key": "va"}],
                    "trafficAllocation": [{"entityId": "va", "endOfRange": 10000}]
                }]
            }]
        }))
        .unwrap();
        let config = ProjectConfig::new(datafile);
        let a = config.experiment_by_key("a").unwrap();
        let mut reasons = DecisionReasons::new(&DecideOptions::default());
        let variation = bucket_experiment(&Murmur3Sharder, &config, a, "ppid1", &mut reasons);
        assert_eq!(variation.unwrap().key, "va");
    }

    #[test]
    fn unknown_variation_id_is_no_variation() {
        let datafile: Datafile = serde_json::from_value(json!({
            "experiments": [{
                "id": "exp", "key": "e", "status": "Running",
                "variations": [{"id": "v", "key": "v"}],
                "trafficAllocation": [{"entityId": "ghost", "endOfRange": 10000}]
            }]
        }))
        .unwrap();
        let config = ProjectConfig::new(datafile);
        let e = config.experiment_by_key("e").unwrap();
        let mut reasons = DecisionReasons::new(&DecideOptions::default());
        assert!(bucket_experiment(&Murmur3Sharder, &config, e, "user", &mut reasons).is_none());
        // Configuration errors are always reported.
        assert_eq!(reasons.as_slice().len(), 1);
    }
}
