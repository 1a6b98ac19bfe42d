//! Utility functions and helpers.

pub mod id_generator;
pub mod identifier;
pub mod template;

// Re-export commonly used types
pub use id_generator::IdGenerator;
pub use identifier::IdentifierValidator;
pub use template::{Expansion, MarkerStyle, SqlParam};
