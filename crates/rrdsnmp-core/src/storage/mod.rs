pub mod archive;
pub mod descriptor;
pub mod model;
pub mod store;

pub use archive::{RoundRobinArchive, Row};
pub use descriptor::{ArchiveDef, ArchiveDescriptor, ConsolidationFn, DataSource, DsKind};
pub use model::Snapshot;
pub use store::{FetchResult, Store, StoreError, StoreInfo};
