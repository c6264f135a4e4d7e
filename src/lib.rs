//! phaseprof - Phase-oriented performance analysis of distributed-job traces
//!
//! The crate models a traced job as two trees: an execution model of typed,
//! possibly repeated phases, and a resource model of monitored metrics. On
//! top of those it attributes observed resource usage to the leaf phases,
//! identifies per-slice bottlenecks, and runs ranked performance-issue
//! passes (duration imbalance, bottleneck duration, critical-path impact).
//! Attribution results can be cached on disk and reused across analyses.

pub mod attribution;
pub mod bottlenecks;
pub mod cache;
pub mod hierarchy;
pub mod job;
pub mod metrics;
pub mod model;
pub mod path;
pub mod perfissues;
pub mod period;
pub mod report;
pub mod timeslice;
pub mod util;

pub use attribution::{run_attribution, AttributionResult, AttributionSettings, CachePolicy};
pub use bottlenecks::{identify_bottlenecks, BottleneckIdentificationResult, BottleneckSettings};
pub use job::{JobAnalysis, JobAnalysisSettings};
pub use model::{ExecutionModel, ResourceModel};
pub use perfissues::{identify_performance_issues, PerfIssueSettings, PerformanceIssueReport};
pub use report::JsonReport;
