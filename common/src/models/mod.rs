//! Shared data models for the collector.

pub mod probe;
pub mod result;

// Re-export commonly used types
pub use probe::{Config, Database, Driver, InfluxV1, InfluxV2, InfluxV3, Test};
pub use result::{FetchResult, FieldValue, TestResult};
