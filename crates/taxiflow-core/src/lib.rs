pub mod blocks;
pub mod dataset;
pub mod db;
pub mod error;
pub mod extract;
pub mod flows;
pub mod frame;
pub mod object_store;
pub mod parquet_io;
pub mod sql_load;
pub mod tasks;
pub mod transform;
pub mod warehouse;

pub use blocks::BlockRegistry;
pub use dataset::{DatasetRef, TaxiColor};
pub use error::{PipelineError, Result};
pub use flows::FlowContext;
pub use object_store::ObjectStore;
