pub mod batch_writer;
pub mod blob_writer;
pub mod ddl_applier;
pub mod events;
pub mod merge_engine;

pub use batch_writer::{BatchWriter, BatchWriterConfig};
pub use blob_writer::{staging_schema, BlobWriter, BlobWriterError};
pub use ddl_applier::DdlApplier;
pub use events::{DeltaEvent, DeltaEventBus};
pub use merge_engine::{MergeDryRunReport, MergeEngine, MergeJob};
