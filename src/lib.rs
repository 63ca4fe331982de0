pub mod algo;
pub mod config;
pub mod error;
pub mod ops;
pub mod protocol;
pub mod worker;

pub use algo::aggregate::AggregationEngine;
pub use algo::sparse::SparseColumnMatrix;
pub use config::EngineConfig;
pub use error::EngineError;
pub use ops::Session;
pub use protocol::{Request, Response, Status};
pub use worker::{Dispatcher, WorkerClient};
