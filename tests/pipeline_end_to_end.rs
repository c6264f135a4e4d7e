//! End-to-end pipeline scenarios: attribution, bottleneck identification,
//! issue passes, and the on-disk cache.

use std::fs;

use phaseprof::attribution::{
    AttributionSettings, BlockingRule, CachePolicy, ConsumableRule, RuleTable, SamplingStrategy,
};
use phaseprof::bottlenecks::{
    identify_bottlenecks, BottleneckSettings, BottleneckSource, BottleneckStatus,
};
use phaseprof::cache::{read_attribution_cache, ATTRIBUTION_CACHE_FILENAME};
use phaseprof::metrics::RateObservations;
use phaseprof::model::{
    ExecutionModel, ExecutionModelBuilder, MetricClass, MetricId, MetricKind, MetricTypeId,
    PhaseId, PhaseToResourceMapping, Repeatability, ResourceModel, ResourceModelBuilder,
};
use phaseprof::perfissues::{identify_performance_issues, PerfIssueSettings};
use phaseprof::run_attribution;
use phaseprof::timeslice::NANOSECONDS_PER_SLICE;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Scenario {
    execution_model: ExecutionModel,
    resource_model: ResourceModel,
    leaf: PhaseId,
    cpu_metric: MetricId,
    cpu_type: MetricTypeId,
}

/// One 10-slice leaf phase driving one consumable metric.
fn scenario(rate: f64, capacity: f64) -> Scenario {
    let mut builder = ExecutionModelBuilder::new();
    let work = builder
        .add_phase_type(builder.root_phase_type(), "work", Repeatability::NonRepeated)
        .unwrap();
    let root = builder.add_root_phase(0, 9).unwrap();
    let leaf = builder.add_phase(root, work, "", 0, 9).unwrap();
    let execution_model = builder.build().unwrap();

    let mut builder = ResourceModelBuilder::new();
    let machine = builder
        .add_resource_type(
            builder.root_resource_type(),
            "machine",
            Repeatability::NonRepeated,
        )
        .unwrap();
    let cpu_type = builder
        .add_metric_type(machine, "cpu", MetricClass::Consumable)
        .unwrap();
    let machine_0 = builder
        .add_resource(builder.root_resource(), machine, "")
        .unwrap();
    let cpu_metric = builder
        .add_metric(
            machine_0,
            cpu_type,
            MetricKind::Consumable {
                observations: RateObservations::new(
                    vec![0, 10 * NANOSECONDS_PER_SLICE],
                    vec![rate],
                )
                .unwrap(),
                capacity,
            },
        )
        .unwrap();
    let resource_model = builder.build().unwrap();

    Scenario {
        execution_model,
        resource_model,
        leaf,
        cpu_metric,
        cpu_type,
    }
}

fn run(s: &Scenario, rules: &RuleTable, cache_policy: CachePolicy, cache_dir: Option<&std::path::Path>) -> phaseprof::AttributionResult {
    let mapping =
        PhaseToResourceMapping::new(&s.execution_model, &s.resource_model, Vec::new()).unwrap();
    let settings = AttributionSettings {
        mapping: &mapping,
        rules,
        sampling: SamplingStrategy::Uninformed,
        cache_policy,
    };
    run_attribution(&s.execution_model, &s.resource_model, &settings, cache_dir)
}

#[test]
fn saturated_greedy_metric_is_a_global_bottleneck_every_slice() {
    init_tracing();
    let s = scenario(1.0, 1.0);
    let rules = RuleTable::with_defaults(ConsumableRule::greedy(1.0), BlockingRule::None);
    let attribution = run(&s, &rules, CachePolicy::Disabled, None);

    let mut iter = attribution.consumable_iterator(
        &s.execution_model,
        &s.resource_model,
        s.leaf,
        s.cpu_metric,
    );
    let mut slices = 0;
    while iter.has_next() {
        iter.compute_next();
        assert_eq!(iter.attributed_usage, 1.0);
        assert_eq!(iter.available_capacity, 1.0);
        slices += 1;
    }
    assert_eq!(slices, 10);

    let bottlenecks = identify_bottlenecks(
        &s.execution_model,
        &s.resource_model,
        &attribution,
        &BottleneckSettings::default(),
    );
    let leaf_result = bottlenecks.metric_bottlenecks.get(s.leaf);
    assert!(leaf_result
        .statuses(s.cpu_metric)
        .iter()
        .all(|&status| status == BottleneckStatus::Global));
    assert_eq!(leaf_result.time_bottlenecked_on(s.cpu_metric), 10);
    assert_eq!(leaf_result.time_not_bottlenecked(), 0);

    // The per-type fold sees the same saturation, and the issue pass turns
    // it into a full-duration bottleneck issue.
    let leaf_types = bottlenecks.metric_type_bottlenecks.get(s.leaf);
    assert_eq!(leaf_types.time_bottlenecked_on(s.cpu_type), 10);

    let issues = identify_performance_issues(
        &s.execution_model,
        &PerfIssueSettings::default(),
        &bottlenecks,
    );
    let bottleneck_issue = issues
        .issues_for_pass("bottleneck-duration")
        .iter()
        .find(|issue| {
            issue.phase == s.leaf
                && issue.source == Some(BottleneckSource::MetricType(s.cpu_type))
        })
        .expect("a bottleneck-duration issue for the saturated leaf");
    assert_eq!(bottleneck_issue.estimated_impact, 10.0);
}

#[test]
fn global_threshold_is_inclusive() {
    let rules = RuleTable::with_defaults(ConsumableRule::greedy(10.0), BlockingRule::None);

    // Sampled usage exactly at 0.95 * capacity.
    let s = scenario(9.5, 10.0);
    let attribution = run(&s, &rules, CachePolicy::Disabled, None);
    let bottlenecks = identify_bottlenecks(
        &s.execution_model,
        &s.resource_model,
        &attribution,
        &BottleneckSettings::default(),
    );
    assert!(bottlenecks
        .metric_bottlenecks
        .get(s.leaf)
        .statuses(s.cpu_metric)
        .iter()
        .all(|&status| status == BottleneckStatus::Global));

    // Just below the threshold: no global bottleneck. The single greedy
    // phase also stays below its local threshold (9.4 of 10 available).
    let s = scenario(9.4, 10.0);
    let attribution = run(&s, &rules, CachePolicy::Disabled, None);
    let bottlenecks = identify_bottlenecks(
        &s.execution_model,
        &s.resource_model,
        &attribution,
        &BottleneckSettings::default(),
    );
    assert!(bottlenecks
        .metric_bottlenecks
        .get(s.leaf)
        .statuses(s.cpu_metric)
        .iter()
        .all(|&status| status != BottleneckStatus::Global));
}

#[test]
fn duration_imbalance_distinguishes_sequential_from_concurrent() {
    // Same durations {2, 3, 4}, once back to back and once overlapping.
    let cases = [
        (Repeatability::sequential("i"), [(0, 1), (2, 4), (5, 8)], (0i64, 8i64), 0.0),
        (Repeatability::concurrent("i"), [(0, 1), (0, 2), (0, 3)], (0, 3), 1.0),
    ];
    for (repeatability, ranges, root_range, expected_impact) in cases {
        let mut builder = ExecutionModelBuilder::new();
        let work = builder
            .add_phase_type(builder.root_phase_type(), "work", repeatability)
            .unwrap();
        let root = builder.add_root_phase(root_range.0, root_range.1).unwrap();
        for (index, (first, last)) in ranges.into_iter().enumerate() {
            builder
                .add_phase(root, work, &index.to_string(), first, last)
                .unwrap();
        }
        let execution_model = builder.build().unwrap();
        let resource_model = ResourceModelBuilder::new().build().unwrap();

        let mapping =
            PhaseToResourceMapping::new(&execution_model, &resource_model, Vec::new()).unwrap();
        let rules = RuleTable::new();
        let settings = AttributionSettings {
            mapping: &mapping,
            rules: &rules,
            sampling: SamplingStrategy::Uninformed,
            cache_policy: CachePolicy::Disabled,
        };
        let attribution = run_attribution(&execution_model, &resource_model, &settings, None);
        let bottlenecks = identify_bottlenecks(
            &execution_model,
            &resource_model,
            &attribution,
            &BottleneckSettings::default(),
        );
        let issues = identify_performance_issues(
            &execution_model,
            &PerfIssueSettings::default(),
            &bottlenecks,
        );

        let root_phase = execution_model.root_phase();
        let imbalance = issues
            .issues_for_pass("phase-duration-imbalance")
            .iter()
            .find(|issue| issue.phase == root_phase && issue.phase_type == Some(work))
            .expect("an imbalance issue for the repeated type");
        assert_eq!(imbalance.estimated_impact, expected_impact);
    }
}

#[test]
fn corrupt_cache_is_recomputed_and_rewritten() {
    init_tracing();
    let s = scenario(2.0, 4.0);
    let rules = RuleTable::with_defaults(ConsumableRule::greedy(1.0), BlockingRule::None);
    let cache_dir = tempfile::tempdir().unwrap();
    let cache_file = cache_dir.path().join(ATTRIBUTION_CACHE_FILENAME);

    run(&s, &rules, CachePolicy::Refresh, Some(cache_dir.path()));
    assert!(cache_file.is_file());
    fs::write(&cache_file, b"not a cache").unwrap();

    // The unreadable cache falls back to recomputation and the file ends up
    // valid again.
    let recomputed = run(&s, &rules, CachePolicy::UseOrRefresh, Some(cache_dir.path()));
    let restored = read_attribution_cache(&cache_file, &s.execution_model, &s.resource_model)
        .expect("rewritten cache is readable");

    let mut expected = recomputed.consumable_iterator(
        &s.execution_model,
        &s.resource_model,
        s.leaf,
        s.cpu_metric,
    );
    let mut actual = restored.consumable_iterator(
        &s.execution_model,
        &s.resource_model,
        s.leaf,
        s.cpu_metric,
    );
    while expected.has_next() {
        expected.compute_next();
        actual.compute_next();
        assert_eq!(actual.attributed_usage, expected.attributed_usage);
        assert_eq!(actual.available_capacity, expected.available_capacity);
    }
    assert!(!actual.has_next());
}
