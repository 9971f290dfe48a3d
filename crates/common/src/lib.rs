//! Shared types, error definitions, and utilities used by both the edge
//! server and the central router.

pub mod error;
pub mod ids;

pub use error::{Error, FromMessage, Result};
pub use ids::IdAllocator;
