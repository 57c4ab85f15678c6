pub mod commands;
pub mod logging;
pub mod stores;

pub use commands::{
    run_analyze, run_etl, run_ingest, run_migrate, run_retention_cleanup, run_retention_schedule,
    AnalyzeReport, IngestReport,
};
pub use stores::{build_store, read_events, read_points, seed_store};
