//! Application layer: command and query use-cases over the chat domain, plus
//! the external collaborator interfaces (group directory, user repository)
//! consumed by workspace membership use-cases.

pub mod commands;
pub mod directory;
pub mod error;
pub mod queries;

pub use commands::{ChatCommandService, CommandOutcome, CreateChatInput};
pub use directory::{
    DirectoryError, GroupDirectory, GroupId, UserRecord, UserRepository, WorkspaceService,
};
pub use error::AppError;
pub use queries::{ChatListFilter, ChatPage, ChatQueryService, ChatView};
