//! JSON report of ranked performance issues.

use serde::{Deserialize, Serialize};

use crate::bottlenecks::BottleneckSource;
use crate::model::{ExecutionModel, ResourceModel};
use crate::perfissues::{PerformanceIssue, PerformanceIssueReport};

/// A single issue, with model references flattened to paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonIssue {
    /// Name of the pass that produced the issue
    pub pass: String,
    /// Path of the affected phase
    pub phase: String,
    /// Path of the affected phase type, if the issue targets one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_type: Option<String>,
    /// Path of the bottleneck metric, if the source is a metric
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Path of the bottleneck metric type, if the source is a metric type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    /// True when the issue measures time without any bottleneck
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_bottleneck: bool,
    /// Estimated runtime impact in time slices
    pub estimated_impact: f64,
    /// Human-readable description
    pub description: String,
}

/// Root JSON report structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    /// Issues sorted by descending estimated impact
    pub issues: Vec<JsonIssue>,
}

impl JsonReport {
    /// Flattens a pass result into the report, sorted by descending impact.
    pub fn from_issues(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        issues: &PerformanceIssueReport,
    ) -> Self {
        let mut records: Vec<JsonIssue> = issues
            .issues()
            .map(|issue| JsonIssue::from_issue(execution_model, resource_model, issue))
            .collect();
        records.sort_by(|a, b| {
            b.estimated_impact
                .partial_cmp(&a.estimated_impact)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        JsonReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "phaseprof-json-v1".to_string(),
            issues: records,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl JsonIssue {
    fn from_issue(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        issue: &PerformanceIssue,
    ) -> Self {
        let (metric, metric_type, no_bottleneck) = match issue.source {
            Some(BottleneckSource::Metric(m)) => {
                (Some(resource_model.metric(m).path().to_string()), None, false)
            }
            Some(BottleneckSource::MetricType(t)) => (
                None,
                Some(resource_model.metric_type(t).path().to_string()),
                false,
            ),
            Some(BottleneckSource::NoBottleneck) => (None, None, true),
            None => (None, None, false),
        };
        JsonIssue {
            pass: issue.pass.to_string(),
            phase: execution_model.phase(issue.phase).path().to_string(),
            phase_type: issue
                .phase_type
                .map(|t| execution_model.phase_type(t).path().to_string()),
            metric,
            metric_type,
            no_bottleneck,
            estimated_impact: issue.estimated_impact,
            description: issue.summary(execution_model, resource_model),
        }
    }
}
