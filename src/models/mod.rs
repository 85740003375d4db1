//! Data Models
//!
//! Configuration and transcript data structures.

pub mod settings;
pub mod transcript;

pub use settings::*;
pub use transcript::*;
