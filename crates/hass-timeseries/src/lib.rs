pub mod ingest;
pub mod line_protocol;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod query;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod transformer;

pub use ingest::{IngestPipeline, IngestSummary};
pub use line_protocol::{encode_point, encode_points, parse_line, parse_lines, LineProtocolError};
pub use memory::MemoryStore;
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use model::{FieldValue, PointError, TelemetryPoint, TelemetryPointBuilder};
pub use optimizer::{
    AnalysisOutcome, CardinalityTracker, FieldOptimizer, OptimizationReport, OptimizerConfig,
    SchemaAnalysis, SchemaEvolutionAnalyzer, SchemaOptimizer, TagOptimizer,
};
pub use query::{TimeRange, TimeSeriesQuery};
pub use retention::{
    CleanupReport, CompressionLevel, PolicyDefinition, RetentionError, RetentionPolicy,
    RetentionPolicyManager, RetentionSettings, RetentionTier, RetentionViolation,
};
pub use scheduler::{RetentionScheduler, ScheduledTask, SharedRetentionManager, TaskType};
pub use store::{SharedStore, TimeSeriesStore, TimescaleStore};
pub use transformer::{
    EventToPointTransformer, TransformError, TransformerConfig, TransformerStats,
    CANONICAL_MEASUREMENTS,
};
