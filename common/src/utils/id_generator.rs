//! Unique ID generator.
//!
//! IDs correlate the log records of one scheduling pass or one dispatch.

use uuid::Uuid;

/// Generates unique identifiers for log correlation.
pub struct IdGenerator;

impl IdGenerator {
    /// Generates an ID for a scheduling pass.
    pub fn pass_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates a short ID (first 8 characters of a UUID) for one test dispatch.
    pub fn dispatch_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}
