//! Performance-issue identification passes over the bottleneck results.

pub mod bottleneck_duration;
pub mod critical_path;
pub mod imbalance;

pub use bottleneck_duration::BottleneckDurationStats;
pub use imbalance::ImbalanceStatistics;

use fnv::FnvHashMap;

use crate::bottlenecks::{BottleneckIdentificationResult, BottleneckSource};
use crate::model::{ExecutionModel, PhaseId, PhaseTypeId, ResourceModel};
use crate::timeslice::FractionalSliceCount;

/// A pass over the analysis results producing ranked performance issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuePass {
    /// Duration imbalance among repeated phases of one type.
    DurationImbalance,
    /// Time each phase (type) spent bottlenecked, per source.
    BottleneckDuration { include_metric_bottlenecks: bool },
    /// Bottleneck impact along the critical path through phase-type
    /// dependencies.
    CriticalPathBottleneckDuration { include_metric_bottlenecks: bool },
}

impl IssuePass {
    pub fn name(&self) -> &'static str {
        match self {
            IssuePass::DurationImbalance => "phase-duration-imbalance",
            IssuePass::BottleneckDuration { .. } => "bottleneck-duration",
            IssuePass::CriticalPathBottleneckDuration { .. } => {
                "critical-path-bottleneck-duration"
            }
        }
    }
}

/// One identified performance issue, attributed to a phase and optionally a
/// phase type and bottleneck source.
#[derive(Debug, Clone)]
pub struct PerformanceIssue {
    pub pass: &'static str,
    pub phase: PhaseId,
    pub phase_type: Option<PhaseTypeId>,
    pub source: Option<BottleneckSource>,
    /// Estimated runtime impact in (fractional) time slices.
    pub estimated_impact: FractionalSliceCount,
}

impl PerformanceIssue {
    /// Whether reports anchored at `phase` should show this issue.
    pub fn displayed_at(&self, model: &ExecutionModel, phase: PhaseId) -> bool {
        self.phase == phase
            || self
                .phase_type
                .is_some_and(|t| model.phase(phase).phase_type() == t)
    }

    pub fn summary(&self, model: &ExecutionModel, resource_model: &ResourceModel) -> String {
        let phase_path = model.phase(self.phase).path();
        let source = match self.source {
            Some(BottleneckSource::Metric(m)) => {
                format!(" on metric \"{}\"", resource_model.metric(m).path())
            }
            Some(BottleneckSource::MetricType(t)) => {
                format!(" on metric type \"{}\"", resource_model.metric_type(t).path())
            }
            Some(BottleneckSource::NoBottleneck) => " without bottleneck".to_string(),
            None => String::new(),
        };
        match self.phase_type {
            Some(t) => format!(
                "{}{source} for phases of type \"{}\" under \"{phase_path}\"",
                self.pass,
                model.phase_type(t).path()
            ),
            None => format!("{}{source} for phase \"{phase_path}\"", self.pass),
        }
    }
}

/// Issues produced by each executed pass.
pub struct PerformanceIssueReport {
    issues_by_pass: FnvHashMap<&'static str, Vec<PerformanceIssue>>,
}

impl PerformanceIssueReport {
    pub fn passes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.issues_by_pass.keys().copied()
    }

    pub fn issues(&self) -> impl Iterator<Item = &PerformanceIssue> {
        self.issues_by_pass.values().flatten()
    }

    pub fn issues_for_pass(&self, pass: &str) -> &[PerformanceIssue] {
        self.issues_by_pass
            .get(pass)
            .map(Vec::as_slice)
            .unwrap_or_else(|| panic!("no results for pass \"{pass}\""))
    }

    /// Issues relevant to one phase, highest estimated impact first.
    pub fn issues_displayed_at(
        &self,
        model: &ExecutionModel,
        phase: PhaseId,
    ) -> Vec<&PerformanceIssue> {
        let mut issues: Vec<&PerformanceIssue> = self
            .issues()
            .filter(|issue| issue.displayed_at(model, phase))
            .collect();
        issues.sort_by(|a, b| {
            b.estimated_impact
                .partial_cmp(&a.estimated_impact)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        issues
    }
}

/// Which passes to run.
#[derive(Debug, Clone)]
pub struct PerfIssueSettings {
    pub passes: Vec<IssuePass>,
}

impl Default for PerfIssueSettings {
    fn default() -> Self {
        PerfIssueSettings {
            passes: vec![
                IssuePass::DurationImbalance,
                IssuePass::BottleneckDuration {
                    include_metric_bottlenecks: false,
                },
                IssuePass::CriticalPathBottleneckDuration {
                    include_metric_bottlenecks: false,
                },
            ],
        }
    }
}

/// Runs the configured passes over one bottleneck identification result.
pub fn identify_performance_issues(
    execution_model: &ExecutionModel,
    settings: &PerfIssueSettings,
    bottlenecks: &BottleneckIdentificationResult,
) -> PerformanceIssueReport {
    let mut issues_by_pass = FnvHashMap::default();
    for &pass in &settings.passes {
        let issues = match pass {
            IssuePass::DurationImbalance => imbalance::execute(execution_model),
            IssuePass::BottleneckDuration {
                include_metric_bottlenecks,
            } => bottleneck_duration::execute(
                execution_model,
                bottlenecks,
                include_metric_bottlenecks,
            ),
            IssuePass::CriticalPathBottleneckDuration {
                include_metric_bottlenecks,
            } => critical_path::execute(
                execution_model,
                bottlenecks,
                include_metric_bottlenecks,
            ),
        };
        issues_by_pass.insert(pass.name(), issues);
    }
    PerformanceIssueReport { issues_by_pass }
}
