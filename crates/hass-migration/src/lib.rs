pub mod backup;
pub mod config;
pub mod error;
pub mod etl;
pub mod orchestrator;
pub mod phase;
pub mod report;
pub mod router;

pub use backup::{export_store, load_backup, restore_backup, BackupSummary};
pub use config::{MigrationConfig, MigrationStrategy};
pub use error::{MigrationError, Result};
pub use etl::{
    canonical_to_legacy_point, legacy_point_to_event, BatchLoader, BatchTransformer, BatchValidation, DataExtractor,
    DataStatistics, MigrationBatch, MigrationRunner, MigrationValidator, RunSummary,
};
pub use orchestrator::{
    MigrationMetrics, MigrationOrchestrator, MigrationOutcome, MigrationReport, MigrationStatus,
    ValidationResults,
};
pub use phase::MigrationPhase;
pub use router::{RouterState, SchemaTarget, TrafficRouter};
