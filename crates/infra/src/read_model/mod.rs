//! Read models: disposable, query-optimized projections of current state.

mod chat;
mod store;

pub use chat::{ChatDocument, ParticipantView};
pub use store::{DocumentStore, InMemoryDocumentStore};
