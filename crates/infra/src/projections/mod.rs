//! Projection implementations (read model builders).

mod chat;

pub use chat::{ChatProjector, ProjectionError, RebuildSummary};
