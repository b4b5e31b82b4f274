//! Chat domain: the event-sourced aggregate behind conversations that can
//! morph into typed work items (task, bug, epic) without losing history.

pub mod chat;
pub mod workflow;

pub use chat::{
    AddParticipant, AssignUser, Chat, ChatCommand, ChatEvent, ChatId, ChangeStatus, Close,
    ConvertChat, CreateChat, Delete, Participant, RemoveParticipant, Rename, Reopen, SetDueDate,
    SetPriority, SetSeverity, AGGREGATE_TYPE, EVENT_TYPES, MAX_TITLE_LEN, is_known_event_type,
};
pub use workflow::{ChatType, ParticipantRole, Priority, Severity};
