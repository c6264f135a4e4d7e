//! Whole-job analysis: resource attribution, bottleneck identification, and
//! performance-issue passes over one traced job.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::attribution::{run_attribution, AttributionResult, AttributionSettings};
use crate::bottlenecks::{
    identify_bottlenecks, BottleneckIdentificationResult, BottleneckSettings,
};
use crate::model::{ExecutionModel, ResourceModel};
use crate::perfissues::{
    identify_performance_issues, PerfIssueSettings, PerformanceIssueReport,
};
use crate::report::JsonReport;

/// Settings for all three pipeline stages.
pub struct JobAnalysisSettings<'a> {
    pub attribution: AttributionSettings<'a>,
    pub bottlenecks: BottleneckSettings,
    pub issues: PerfIssueSettings,
}

/// Complete analysis of one job: the models plus every derived result.
pub struct JobAnalysis {
    execution_model: ExecutionModel,
    resource_model: ResourceModel,
    attribution: AttributionResult,
    bottlenecks: BottleneckIdentificationResult,
    issues: PerformanceIssueReport,
}

impl JobAnalysis {
    /// Runs the full pipeline. When `cache_directory` is given it is created
    /// if missing and used for the attribution cache according to the
    /// settings' cache policy.
    pub fn analyze(
        execution_model: ExecutionModel,
        resource_model: ResourceModel,
        settings: &JobAnalysisSettings<'_>,
        cache_directory: Option<&Path>,
    ) -> anyhow::Result<JobAnalysis> {
        if let Some(dir) = cache_directory {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating cache directory {}", dir.display()))?;
        }

        info!(
            phases = execution_model.num_phases(),
            metrics = resource_model.num_metrics(),
            "attributing resource usage to phases"
        );
        let attribution = run_attribution(
            &execution_model,
            &resource_model,
            &settings.attribution,
            cache_directory,
        );

        info!("identifying bottlenecks");
        let bottlenecks = identify_bottlenecks(
            &execution_model,
            &resource_model,
            &attribution,
            &settings.bottlenecks,
        );

        info!(
            passes = settings.issues.passes.len(),
            "running performance-issue passes"
        );
        let issues = identify_performance_issues(&execution_model, &settings.issues, &bottlenecks);

        Ok(JobAnalysis {
            execution_model,
            resource_model,
            attribution,
            bottlenecks,
            issues,
        })
    }

    pub fn execution_model(&self) -> &ExecutionModel {
        &self.execution_model
    }

    pub fn resource_model(&self) -> &ResourceModel {
        &self.resource_model
    }

    pub fn attribution(&self) -> &AttributionResult {
        &self.attribution
    }

    pub fn bottlenecks(&self) -> &BottleneckIdentificationResult {
        &self.bottlenecks
    }

    pub fn issues(&self) -> &PerformanceIssueReport {
        &self.issues
    }

    /// Flat JSON view of the ranked issues.
    pub fn report(&self) -> JsonReport {
        JsonReport::from_issues(&self.execution_model, &self.resource_model, &self.issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::{BlockingRule, CachePolicy, ConsumableRule, RuleTable, SamplingStrategy};
    use crate::cache::ATTRIBUTION_CACHE_FILENAME;
    use crate::metrics::RateObservations;
    use crate::model::{
        ExecutionModelBuilder, MetricClass, MetricKind, PhaseToResourceMapping, Repeatability,
        ResourceModelBuilder,
    };

    fn job_models() -> (ExecutionModel, ResourceModel) {
        let mut builder = ExecutionModelBuilder::new();
        let work = builder
            .add_phase_type(
                builder.root_phase_type(),
                "work",
                Repeatability::concurrent("worker"),
            )
            .unwrap();
        let root = builder.add_root_phase(0, 9).unwrap();
        builder.add_phase(root, work, "0", 0, 4).unwrap();
        builder.add_phase(root, work, "1", 0, 9).unwrap();
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
        builder
            .add_metric(
                machine_0,
                cpu_type,
                MetricKind::Consumable {
                    observations: RateObservations::new(vec![0, 10_000_000], vec![2.0]).unwrap(),
                    capacity: 4.0,
                },
            )
            .unwrap();
        let resource_model = builder.build().unwrap();

        (execution_model, resource_model)
    }

    #[test]
    fn analyze_runs_all_stages_and_writes_the_cache() {
        let (execution_model, resource_model) = job_models();
        let mapping =
            PhaseToResourceMapping::new(&execution_model, &resource_model, Vec::new()).unwrap();
        let rules = RuleTable::with_defaults(ConsumableRule::greedy(1.0), BlockingRule::None);
        let cache_dir = tempfile::tempdir().unwrap();

        let settings = JobAnalysisSettings {
            attribution: AttributionSettings {
                mapping: &mapping,
                rules: &rules,
                sampling: SamplingStrategy::Uninformed,
                cache_policy: CachePolicy::UseOrRefresh,
            },
            bottlenecks: BottleneckSettings::default(),
            issues: PerfIssueSettings::default(),
        };
        let analysis = JobAnalysis::analyze(
            execution_model,
            resource_model,
            &settings,
            Some(cache_dir.path()),
        )
        .unwrap();

        assert!(cache_dir.path().join(ATTRIBUTION_CACHE_FILENAME).is_file());
        assert!(analysis.issues().issues().count() > 0);

        let report = analysis.report();
        assert_eq!(report.format, "phaseprof-json-v1");
        assert!(report.to_json().unwrap().contains("phase-duration-imbalance"));
    }
}
