// ABOUTME: Change-tracking synchronization engine
// ABOUTME: Schema mapping, paging, change fetching, loading, checkpoints and the orchestrator

pub mod changes;
pub mod checkpoint;
pub mod loader;
pub mod orchestrator;
pub mod pager;
pub mod schema;

pub use changes::ChangeSetFetcher;
pub use checkpoint::{CheckpointStore, TableCheckpoint};
pub use loader::Loader;
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncStats, TableOutcome};
pub use pager::{Pager, PagingMode};
pub use schema::{map_schema, TargetSchema};
