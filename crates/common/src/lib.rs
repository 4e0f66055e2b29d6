//! Shared value types used across the renderer core, backends and scene glue.

mod types;

pub use types::{ClearColor, EntityId, Extent2D};
