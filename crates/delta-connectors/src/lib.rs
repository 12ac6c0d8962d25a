pub mod blob_store;
pub mod error;
pub mod warehouse;

pub use blob_store::{BlobStore, GcsBlobStore, InMemoryBlobStore};
pub use error::{BlobStoreError, WarehouseError};
pub use warehouse::{BigQueryWarehouse, InMemoryWarehouse, JobHandle, JobStatus, LoadJobSpec, Warehouse};
