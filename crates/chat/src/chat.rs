use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowra_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, WorkspaceId};
use flowra_events::Event;

use crate::workflow::{
    ChatType, ParticipantRole, Priority, Severity, default_status, is_valid_status,
};

/// Aggregate type discriminator for chat streams.
pub const AGGREGATE_TYPE: &str = "chat";

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Stable event type registry for chat streams.
pub const EVENT_TYPES: [&str; 15] = [
    "chat.created",
    "chat.participant_added",
    "chat.participant_removed",
    "chat.type_changed",
    "chat.status_changed",
    "chat.user_assigned",
    "chat.assignee_removed",
    "chat.priority_set",
    "chat.due_date_set",
    "chat.due_date_removed",
    "chat.renamed",
    "chat.severity_set",
    "chat.closed",
    "chat.reopened",
    "chat.deleted",
];

/// Whether this build knows the given stored event type. Unknown types are
/// skipped on replay for forward compatibility.
pub fn is_known_event_type(event_type: &str) -> bool {
    EVENT_TYPES.contains(&event_type)
}

/// Chat identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub AggregateId);

impl ChatId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl core::fmt::Display for ChatId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Chat participant (value object, unique by user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

/// Aggregate root: Chat.
///
/// A chat starts as a discussion and may convert exactly once into a typed
/// work item (task, bug, epic), gaining workflow fields while keeping its
/// history. State is rebuilt by applying events in version order from v1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    id: ChatId,
    workspace_id: WorkspaceId,
    chat_type: ChatType,
    is_public: bool,
    created_by: UserId,
    created_at: Option<DateTime<Utc>>,
    participants: Vec<Participant>,
    title: String,
    status: String,
    priority: Option<Priority>,
    assignee: Option<UserId>,
    due_date: Option<DateTime<Utc>>,
    severity: Option<Severity>,
    closed: bool,
    deleted: bool,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<UserId>,
    version: u64,
    created: bool,
}

impl Chat {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ChatId) -> Self {
        Self {
            id,
            workspace_id: WorkspaceId::nil(),
            chat_type: ChatType::Discussion,
            is_public: false,
            created_by: UserId::nil(),
            created_at: None,
            participants: Vec::new(),
            title: String::new(),
            status: String::new(),
            priority: None,
            assignee: None,
            due_date: None,
            severity: None,
            closed: false,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ChatId {
        self.id
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn chat_type(&self) -> ChatType {
        self.chat_type
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participant(user_id).is_some()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Workflow status; empty while the chat is a discussion.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn assignee(&self) -> Option<UserId> {
        self.assignee
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn severity(&self) -> Option<Severity> {
        self.severity
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn deleted_by(&self) -> Option<UserId> {
        self.deleted_by
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Chat {
    type Id = ChatId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateChat.
///
/// Creates a discussion. Typed work items are created by converting right
/// after creation (the command use-case issues both in one transaction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChat {
    pub chat_id: ChatId,
    pub workspace_id: WorkspaceId,
    pub is_public: bool,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddParticipant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddParticipant {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub added_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveParticipant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveParticipant {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConvertChat (discussion → task/bug/epic, one-shot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertChat {
    pub chat_id: ChatId,
    pub target: ChatType,
    pub title: String,
    pub converted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub chat_id: ChatId,
    pub status: String,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignUser (`None` clears the assignee).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignUser {
    pub chat_id: ChatId,
    pub assignee: Option<UserId>,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetPriority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPriority {
    pub chat_id: ChatId,
    pub priority: Priority,
    pub set_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetDueDate (`None` clears the due date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDueDate {
    pub chat_id: ChatId,
    pub due_date: Option<DateTime<Utc>>,
    pub set_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub chat_id: ChatId,
    pub title: String,
    pub renamed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetSeverity (bugs only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSeverity {
    pub chat_id: ChatId,
    pub severity: Severity,
    pub set_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    pub chat_id: ChatId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reopen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reopen {
    pub chat_id: ChatId,
    pub reopened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Delete (soft delete; terminal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delete {
    pub chat_id: ChatId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatCommand {
    CreateChat(CreateChat),
    AddParticipant(AddParticipant),
    RemoveParticipant(RemoveParticipant),
    ConvertChat(ConvertChat),
    ChangeStatus(ChangeStatus),
    AssignUser(AssignUser),
    SetPriority(SetPriority),
    SetDueDate(SetDueDate),
    Rename(Rename),
    SetSeverity(SetSeverity),
    Close(Close),
    Reopen(Reopen),
    Delete(Delete),
}

/// Event: Created. Always creates a discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub chat_id: ChatId,
    pub workspace_id: WorkspaceId,
    pub is_public: bool,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ParticipantAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantAdded {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ParticipantRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRemoved {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TypeChanged (one-shot conversion; sets the default status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChanged {
    pub chat_id: ChatId,
    pub from: ChatType,
    pub to: ChatType,
    pub title: String,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub chat_id: ChatId,
    pub from: String,
    pub to: String,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UserAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAssigned {
    pub chat_id: ChatId,
    pub assignee: UserId,
    pub assigned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AssigneeRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssigneeRemoved {
    pub chat_id: ChatId,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrioritySet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrioritySet {
    pub chat_id: ChatId,
    pub priority: Priority,
    pub set_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DueDateSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDateSet {
    pub chat_id: ChatId,
    pub due_date: DateTime<Utc>,
    pub set_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DueDateRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDateRemoved {
    pub chat_id: ChatId,
    pub removed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renamed {
    pub chat_id: ChatId,
    pub title: String,
    pub renamed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SeveritySet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySet {
    pub chat_id: ChatId,
    pub severity: Severity,
    pub set_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closed {
    pub chat_id: ChatId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Reopened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reopened {
    pub chat_id: ChatId,
    pub reopened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: Deleted (soft delete; state preserved for audit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub chat_id: ChatId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatEvent {
    Created(Created),
    ParticipantAdded(ParticipantAdded),
    ParticipantRemoved(ParticipantRemoved),
    TypeChanged(TypeChanged),
    StatusChanged(StatusChanged),
    UserAssigned(UserAssigned),
    AssigneeRemoved(AssigneeRemoved),
    PrioritySet(PrioritySet),
    DueDateSet(DueDateSet),
    DueDateRemoved(DueDateRemoved),
    Renamed(Renamed),
    SeveritySet(SeveritySet),
    Closed(Closed),
    Reopened(Reopened),
    Deleted(Deleted),
}

impl Event for ChatEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::Created(_) => "chat.created",
            ChatEvent::ParticipantAdded(_) => "chat.participant_added",
            ChatEvent::ParticipantRemoved(_) => "chat.participant_removed",
            ChatEvent::TypeChanged(_) => "chat.type_changed",
            ChatEvent::StatusChanged(_) => "chat.status_changed",
            ChatEvent::UserAssigned(_) => "chat.user_assigned",
            ChatEvent::AssigneeRemoved(_) => "chat.assignee_removed",
            ChatEvent::PrioritySet(_) => "chat.priority_set",
            ChatEvent::DueDateSet(_) => "chat.due_date_set",
            ChatEvent::DueDateRemoved(_) => "chat.due_date_removed",
            ChatEvent::Renamed(_) => "chat.renamed",
            ChatEvent::SeveritySet(_) => "chat.severity_set",
            ChatEvent::Closed(_) => "chat.closed",
            ChatEvent::Reopened(_) => "chat.reopened",
            ChatEvent::Deleted(_) => "chat.deleted",
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ChatEvent::Created(e) => e.occurred_at,
            ChatEvent::ParticipantAdded(e) => e.occurred_at,
            ChatEvent::ParticipantRemoved(e) => e.occurred_at,
            ChatEvent::TypeChanged(e) => e.occurred_at,
            ChatEvent::StatusChanged(e) => e.occurred_at,
            ChatEvent::UserAssigned(e) => e.occurred_at,
            ChatEvent::AssigneeRemoved(e) => e.occurred_at,
            ChatEvent::PrioritySet(e) => e.occurred_at,
            ChatEvent::DueDateSet(e) => e.occurred_at,
            ChatEvent::DueDateRemoved(e) => e.occurred_at,
            ChatEvent::Renamed(e) => e.occurred_at,
            ChatEvent::SeveritySet(e) => e.occurred_at,
            ChatEvent::Closed(e) => e.occurred_at,
            ChatEvent::Reopened(e) => e.occurred_at,
            ChatEvent::Deleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Chat {
    type Command = ChatCommand;
    type Event = ChatEvent;
    type Error = DomainError;

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ChatCommand::CreateChat(cmd) => self.handle_create(cmd),
            ChatCommand::AddParticipant(cmd) => self.handle_add_participant(cmd),
            ChatCommand::RemoveParticipant(cmd) => self.handle_remove_participant(cmd),
            ChatCommand::ConvertChat(cmd) => self.handle_convert(cmd),
            ChatCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
            ChatCommand::AssignUser(cmd) => self.handle_assign(cmd),
            ChatCommand::SetPriority(cmd) => self.handle_set_priority(cmd),
            ChatCommand::SetDueDate(cmd) => self.handle_set_due_date(cmd),
            ChatCommand::Rename(cmd) => self.handle_rename(cmd),
            ChatCommand::SetSeverity(cmd) => self.handle_set_severity(cmd),
            ChatCommand::Close(cmd) => self.handle_close(cmd),
            ChatCommand::Reopen(cmd) => self.handle_reopen(cmd),
            ChatCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ChatEvent::Created(e) => {
                self.id = e.chat_id;
                self.workspace_id = e.workspace_id;
                self.chat_type = ChatType::Discussion;
                self.is_public = e.is_public;
                self.created_by = e.created_by;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ChatEvent::ParticipantAdded(e) => {
                // Idempotent per event: a replayed add never duplicates.
                if !self.is_participant(e.user_id) {
                    self.participants.push(Participant {
                        user_id: e.user_id,
                        role: e.role,
                        joined_at: e.occurred_at,
                    });
                }
            }
            ChatEvent::ParticipantRemoved(e) => {
                self.participants.retain(|p| p.user_id != e.user_id);
            }
            ChatEvent::TypeChanged(e) => {
                self.chat_type = e.to;
                self.title = e.title.clone();
                self.status = default_status(e.to).to_string();
            }
            ChatEvent::StatusChanged(e) => {
                self.status = e.to.clone();
            }
            ChatEvent::UserAssigned(e) => {
                self.assignee = Some(e.assignee);
            }
            ChatEvent::AssigneeRemoved(_) => {
                self.assignee = None;
            }
            ChatEvent::PrioritySet(e) => {
                self.priority = Some(e.priority);
            }
            ChatEvent::DueDateSet(e) => {
                self.due_date = Some(e.due_date);
            }
            ChatEvent::DueDateRemoved(_) => {
                self.due_date = None;
            }
            ChatEvent::Renamed(e) => {
                self.title = e.title.clone();
            }
            ChatEvent::SeveritySet(e) => {
                self.severity = Some(e.severity);
            }
            ChatEvent::Closed(_) => {
                self.closed = true;
            }
            ChatEvent::Reopened(_) => {
                self.closed = false;
            }
            ChatEvent::Deleted(e) => {
                self.deleted = true;
                self.deleted_at = Some(e.occurred_at);
                self.deleted_by = Some(e.deleted_by);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }
}

impl Chat {
    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("chat does not exist"));
        }
        Ok(())
    }

    fn ensure_not_deleted(&self) -> Result<(), DomainError> {
        if self.deleted {
            return Err(DomainError::invalid_state("chat is deleted"));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.closed {
            return Err(DomainError::invalid_state("chat is closed"));
        }
        Ok(())
    }

    fn ensure_typed(&self) -> Result<(), DomainError> {
        if !self.chat_type.is_typed() {
            return Err(DomainError::invalid_state(
                "operation requires a typed chat (task, bug or epic)",
            ));
        }
        Ok(())
    }

    fn ensure_actor(&self, user_id: UserId) -> Result<(), DomainError> {
        if user_id.is_nil() {
            return Err(DomainError::validation("acting user id must not be nil"));
        }
        Ok(())
    }

    fn validate_title(title: &str) -> Result<(), DomainError> {
        if title.trim().is_empty() {
            return Err(DomainError::validation("title must not be empty"));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::validation(format!(
                "title must be at most {MAX_TITLE_LEN} characters"
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateChat) -> Result<Vec<ChatEvent>, DomainError> {
        if self.created {
            return Err(DomainError::already_exists("chat already exists"));
        }
        if cmd.chat_id.is_nil() {
            return Err(DomainError::validation("chat id must not be nil"));
        }
        if cmd.workspace_id.is_nil() {
            return Err(DomainError::validation("workspace id must not be nil"));
        }
        if cmd.created_by.is_nil() {
            return Err(DomainError::validation("creator id must not be nil"));
        }

        // The creator always joins as admin in the same transaction.
        Ok(vec![
            ChatEvent::Created(Created {
                chat_id: cmd.chat_id,
                workspace_id: cmd.workspace_id,
                is_public: cmd.is_public,
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            }),
            ChatEvent::ParticipantAdded(ParticipantAdded {
                chat_id: cmd.chat_id,
                user_id: cmd.created_by,
                role: ParticipantRole::Admin,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_add_participant(&self, cmd: &AddParticipant) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_actor(cmd.added_by)?;
        if cmd.user_id.is_nil() {
            return Err(DomainError::validation("participant user id must not be nil"));
        }
        if self.is_participant(cmd.user_id) {
            return Err(DomainError::already_exists("user is already a participant"));
        }

        Ok(vec![ChatEvent::ParticipantAdded(ParticipantAdded {
            chat_id: cmd.chat_id,
            user_id: cmd.user_id,
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_participant(
        &self,
        cmd: &RemoveParticipant,
    ) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_actor(cmd.removed_by)?;
        if cmd.user_id == self.created_by {
            return Err(DomainError::validation("the creator cannot be removed"));
        }
        if !self.is_participant(cmd.user_id) {
            return Err(DomainError::not_found("user is not a participant"));
        }

        Ok(vec![ChatEvent::ParticipantRemoved(ParticipantRemoved {
            chat_id: cmd.chat_id,
            user_id: cmd.user_id,
            removed_by: cmd.removed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_convert(&self, cmd: &ConvertChat) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_open()?;
        self.ensure_actor(cmd.converted_by)?;
        if !cmd.target.is_typed() {
            return Err(DomainError::validation(
                "conversion target must be task, bug or epic",
            ));
        }
        if self.chat_type.is_typed() {
            return Err(DomainError::invalid_state(
                "chat has already been converted; the type never reverts",
            ));
        }
        Self::validate_title(&cmd.title)?;

        Ok(vec![ChatEvent::TypeChanged(TypeChanged {
            chat_id: cmd.chat_id,
            from: self.chat_type,
            to: cmd.target,
            title: cmd.title.clone(),
            changed_by: cmd.converted_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_open()?;
        self.ensure_typed()?;
        self.ensure_actor(cmd.changed_by)?;
        if !is_valid_status(self.chat_type, &cmd.status) {
            return Err(DomainError::validation(format!(
                "status '{}' is not valid for a {}",
                cmd.status, self.chat_type
            )));
        }
        if self.status == cmd.status {
            return Ok(vec![]);
        }

        Ok(vec![ChatEvent::StatusChanged(StatusChanged {
            chat_id: cmd.chat_id,
            from: self.status.clone(),
            to: cmd.status.clone(),
            changed_by: cmd.changed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignUser) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_open()?;
        self.ensure_typed()?;
        self.ensure_actor(cmd.assigned_by)?;

        match cmd.assignee {
            Some(user_id) => {
                if user_id.is_nil() {
                    return Err(DomainError::validation("assignee id must not be nil"));
                }
                if self.assignee == Some(user_id) {
                    return Ok(vec![]);
                }
                Ok(vec![ChatEvent::UserAssigned(UserAssigned {
                    chat_id: cmd.chat_id,
                    assignee: user_id,
                    assigned_by: cmd.assigned_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            None => {
                if self.assignee.is_none() {
                    return Ok(vec![]);
                }
                Ok(vec![ChatEvent::AssigneeRemoved(AssigneeRemoved {
                    chat_id: cmd.chat_id,
                    removed_by: cmd.assigned_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }

    fn handle_set_priority(&self, cmd: &SetPriority) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_open()?;
        self.ensure_typed()?;
        self.ensure_actor(cmd.set_by)?;
        if self.priority == Some(cmd.priority) {
            return Ok(vec![]);
        }

        Ok(vec![ChatEvent::PrioritySet(PrioritySet {
            chat_id: cmd.chat_id,
            priority: cmd.priority,
            set_by: cmd.set_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_due_date(&self, cmd: &SetDueDate) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_open()?;
        self.ensure_typed()?;
        self.ensure_actor(cmd.set_by)?;

        match cmd.due_date {
            Some(due) => {
                if self.due_date == Some(due) {
                    return Ok(vec![]);
                }
                Ok(vec![ChatEvent::DueDateSet(DueDateSet {
                    chat_id: cmd.chat_id,
                    due_date: due,
                    set_by: cmd.set_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            None => {
                if self.due_date.is_none() {
                    return Ok(vec![]);
                }
                Ok(vec![ChatEvent::DueDateRemoved(DueDateRemoved {
                    chat_id: cmd.chat_id,
                    removed_by: cmd.set_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }

    fn handle_rename(&self, cmd: &Rename) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_open()?;
        self.ensure_actor(cmd.renamed_by)?;
        Self::validate_title(&cmd.title)?;
        if self.title == cmd.title {
            return Ok(vec![]);
        }

        // Renaming a discussion is allowed (cosmetic titles).
        Ok(vec![ChatEvent::Renamed(Renamed {
            chat_id: cmd.chat_id,
            title: cmd.title.clone(),
            renamed_by: cmd.renamed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_severity(&self, cmd: &SetSeverity) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_open()?;
        self.ensure_actor(cmd.set_by)?;
        if self.chat_type != ChatType::Bug {
            return Err(DomainError::invalid_state("severity applies to bugs only"));
        }
        if self.severity == Some(cmd.severity) {
            return Ok(vec![]);
        }

        Ok(vec![ChatEvent::SeveritySet(SeveritySet {
            chat_id: cmd.chat_id,
            severity: cmd.severity,
            set_by: cmd.set_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &Close) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_actor(cmd.closed_by)?;
        if self.closed {
            return Err(DomainError::invalid_state("chat is already closed"));
        }

        Ok(vec![ChatEvent::Closed(Closed {
            chat_id: cmd.chat_id,
            closed_by: cmd.closed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reopen(&self, cmd: &Reopen) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_actor(cmd.reopened_by)?;
        if !self.closed {
            return Err(DomainError::invalid_state("chat is not closed"));
        }

        Ok(vec![ChatEvent::Reopened(Reopened {
            chat_id: cmd.chat_id,
            reopened_by: cmd.reopened_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &Delete) -> Result<Vec<ChatEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_deleted()?;
        self.ensure_actor(cmd.deleted_by)?;

        Ok(vec![ChatEvent::Deleted(Deleted {
            chat_id: cmd.chat_id,
            deleted_by: cmd.deleted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
