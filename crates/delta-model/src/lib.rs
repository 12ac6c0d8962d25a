pub mod events;
pub mod ordering;
pub mod schema;
pub mod table;
pub mod value;

pub use events::{ChangeEvent, DdlEvent, DdlOperation, DmlEvent, DmlOperation, Offset, SequenceNumber};
pub use ordering::{MergeMode, RowIdSupport, SourceOrdering};
pub use schema::{ColumnSchema, TableSchema};
pub use table::{BatchShard, BlobFormat, BlobType, SequenceCounters, TableBlob, TableId, TargetTableState};
pub use value::{DataType, Value};
