//! Command use-cases.
//!
//! Every write follows the same skeleton: validate input, check the context is
//! still live, load the aggregate by replay, invoke one domain operation, save
//! the decided events (append + outbox atomically) and return the outcome.
//! Use-cases never touch read models; the projector catches up asynchronously.

use chrono::Utc;

use flowra_chat::{
    AddParticipant, AssignUser, Chat, ChatCommand, ChatEvent, ChatId, ChatType, ChangeStatus,
    Close, ConvertChat, CreateChat, Delete, MAX_TITLE_LEN, ParticipantRole, Priority,
    RemoveParticipant, Rename, Reopen, SetDueDate, SetPriority, SetSeverity, Severity,
};
use flowra_core::{
    Aggregate, AggregateId, RequestContext, UserId, ValidationErrors, WorkspaceId,
};
use flowra_infra::event_store::EventStore;
use flowra_infra::repository::ChatRepository;

use crate::error::AppError;

/// Result of a successful command: the aggregate id, the stream version after
/// the append, and the events that were committed (empty for no-ops).
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub chat_id: ChatId,
    pub version: u64,
    pub events: Vec<ChatEvent>,
}

/// Input for chat creation.
///
/// A typed chat is created and converted in one transaction; the title is
/// required for typed kinds and optional (cosmetic) for discussions.
#[derive(Debug, Clone)]
pub struct CreateChatInput {
    pub workspace_id: WorkspaceId,
    pub chat_type: ChatType,
    pub title: Option<String>,
    pub is_public: bool,
}

/// Write-side service for the chat aggregate.
#[derive(Debug)]
pub struct ChatCommandService<S> {
    repo: ChatRepository<S>,
}

impl<S> ChatCommandService<S>
where
    S: EventStore,
{
    pub fn new(store: S) -> Self {
        Self {
            repo: ChatRepository::new(store),
        }
    }

    pub fn create_chat(
        &self,
        ctx: &RequestContext,
        input: CreateChatInput,
    ) -> Result<CommandOutcome, AppError> {
        const OP: &str = "create_chat";

        let mut errors = ValidationErrors::new();
        if input.workspace_id.is_nil() {
            errors.push("workspace_id", "must not be nil");
        }
        let title = input.title.as_deref().map(str::trim).unwrap_or_default();
        if input.chat_type.is_typed() && title.is_empty() {
            errors.push("title", "required for typed chats");
        }
        if title.chars().count() > MAX_TITLE_LEN {
            errors.push("title", format!("must be at most {MAX_TITLE_LEN} characters"));
        }
        errors.into_result()?;

        ctx.ensure_active()?;
        let created_by = actor(OP, ctx)?;
        let chat_id = ChatId::new(AggregateId::new());
        let now = Utc::now();

        let mut chat = Chat::empty(chat_id);
        let mut events = run(OP, &mut chat, ChatCommand::CreateChat(CreateChat {
            chat_id,
            workspace_id: input.workspace_id,
            is_public: input.is_public,
            created_by,
            occurred_at: now,
        }))?;

        if input.chat_type.is_typed() {
            events.extend(run(OP, &mut chat, ChatCommand::ConvertChat(ConvertChat {
                chat_id,
                target: input.chat_type,
                title: title.to_string(),
                converted_by: created_by,
                occurred_at: now,
            }))?);
        } else if !title.is_empty() {
            // Cosmetic title on a discussion.
            events.extend(run(OP, &mut chat, ChatCommand::Rename(Rename {
                chat_id,
                title: title.to_string(),
                renamed_by: created_by,
                occurred_at: now,
            }))?);
        }

        ctx.ensure_active()?;
        let stored = self
            .repo
            .save(ctx, chat_id, &events, 0)
            .map_err(|e| AppError::from_repository(OP, e))?;

        Ok(CommandOutcome {
            chat_id,
            version: stored.last().map(|e| e.version).unwrap_or(0),
            events,
        })
    }

    pub fn add_participant(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        user_id: UserId,
        role: ParticipantRole,
    ) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "add_participant", chat_id, |_, by| {
            ChatCommand::AddParticipant(AddParticipant {
                chat_id,
                user_id,
                role,
                added_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn remove_participant(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "remove_participant", chat_id, |_, by| {
            ChatCommand::RemoveParticipant(RemoveParticipant {
                chat_id,
                user_id,
                removed_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn convert_to_task(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        title: impl Into<String>,
    ) -> Result<CommandOutcome, AppError> {
        self.convert(ctx, "convert_to_task", chat_id, ChatType::Task, title.into())
    }

    pub fn convert_to_bug(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        title: impl Into<String>,
    ) -> Result<CommandOutcome, AppError> {
        self.convert(ctx, "convert_to_bug", chat_id, ChatType::Bug, title.into())
    }

    pub fn convert_to_epic(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        title: impl Into<String>,
    ) -> Result<CommandOutcome, AppError> {
        self.convert(ctx, "convert_to_epic", chat_id, ChatType::Epic, title.into())
    }

    fn convert(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        chat_id: ChatId,
        target: ChatType,
        title: String,
    ) -> Result<CommandOutcome, AppError> {
        validate_title(&title)?;
        self.mutate(ctx, operation, chat_id, |_, by| {
            ChatCommand::ConvertChat(ConvertChat {
                chat_id,
                target,
                title,
                converted_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn change_status(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        status: impl Into<String>,
    ) -> Result<CommandOutcome, AppError> {
        let status = status.into();
        if status.trim().is_empty() {
            let mut errors = ValidationErrors::new();
            errors.push("status", "must not be empty");
            return Err(AppError::Validation(errors));
        }
        self.mutate(ctx, "change_status", chat_id, |_, by| {
            ChatCommand::ChangeStatus(ChangeStatus {
                chat_id,
                status,
                changed_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn assign_user(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        assignee: Option<UserId>,
    ) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "assign_user", chat_id, |_, by| {
            ChatCommand::AssignUser(AssignUser {
                chat_id,
                assignee,
                assigned_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn set_priority(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        priority: Priority,
    ) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "set_priority", chat_id, |_, by| {
            ChatCommand::SetPriority(SetPriority {
                chat_id,
                priority,
                set_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn set_due_date(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        due_date: Option<chrono::DateTime<Utc>>,
    ) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "set_due_date", chat_id, |_, by| {
            ChatCommand::SetDueDate(SetDueDate {
                chat_id,
                due_date,
                set_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn rename(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        title: impl Into<String>,
    ) -> Result<CommandOutcome, AppError> {
        let title = title.into();
        validate_title(&title)?;
        self.mutate(ctx, "rename", chat_id, |_, by| {
            ChatCommand::Rename(Rename {
                chat_id,
                title,
                renamed_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn set_severity(
        &self,
        ctx: &RequestContext,
        chat_id: ChatId,
        severity: Severity,
    ) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "set_severity", chat_id, |_, by| {
            ChatCommand::SetSeverity(SetSeverity {
                chat_id,
                severity,
                set_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn close(&self, ctx: &RequestContext, chat_id: ChatId) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "close_chat", chat_id, |_, by| {
            ChatCommand::Close(Close {
                chat_id,
                closed_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn reopen(&self, ctx: &RequestContext, chat_id: ChatId) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "reopen_chat", chat_id, |_, by| {
            ChatCommand::Reopen(Reopen {
                chat_id,
                reopened_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    pub fn delete(&self, ctx: &RequestContext, chat_id: ChatId) -> Result<CommandOutcome, AppError> {
        self.mutate(ctx, "delete_chat", chat_id, |_, by| {
            ChatCommand::Delete(Delete {
                chat_id,
                deleted_by: by,
                occurred_at: Utc::now(),
            })
        })
    }

    /// Shared load → decide → save skeleton for single-command mutations.
    fn mutate(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        chat_id: ChatId,
        make_command: impl FnOnce(&Chat, UserId) -> ChatCommand,
    ) -> Result<CommandOutcome, AppError> {
        ctx.ensure_active()?;
        let by = actor(operation, ctx)?;

        let loaded = self
            .repo
            .load(chat_id)
            .map_err(|e| AppError::from_repository(operation, e))?;

        let command = make_command(&loaded.chat, by);
        let events = loaded
            .chat
            .handle(&command)
            .map_err(|e| AppError::domain(operation, e))?;

        if events.is_empty() {
            // Idempotent no-op: nothing to persist.
            return Ok(CommandOutcome {
                chat_id,
                version: loaded.version,
                events,
            });
        }

        // Last chance to bail before committing.
        ctx.ensure_active()?;
        let stored = self
            .repo
            .save(ctx, chat_id, &events, loaded.version)
            .map_err(|e| AppError::from_repository(operation, e))?;

        Ok(CommandOutcome {
            chat_id,
            version: stored.last().map(|e| e.version).unwrap_or(loaded.version),
            events,
        })
    }
}

fn actor(operation: &'static str, ctx: &RequestContext) -> Result<UserId, AppError> {
    ctx.user_id()
        .map_err(|_| AppError::Unauthorized { operation })
}

fn validate_title(title: &str) -> Result<(), AppError> {
    let mut errors = ValidationErrors::new();
    if title.trim().is_empty() {
        errors.push("title", "must not be empty");
    } else if title.chars().count() > MAX_TITLE_LEN {
        errors.push("title", format!("must be at most {MAX_TITLE_LEN} characters"));
    }
    Ok(errors.into_result()?)
}

/// Decide and evolve on a fresh aggregate during creation.
fn run(
    operation: &'static str,
    chat: &mut Chat,
    command: ChatCommand,
) -> Result<Vec<ChatEvent>, AppError> {
    flowra_events::execute(chat, &command).map_err(|e| AppError::domain(operation, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowra_core::{ContextError, DomainError};
    use flowra_infra::event_store::InMemoryEventStore;
    use flowra_infra::outbox::{InMemoryOutbox, Outbox};
    use std::sync::Arc;

    fn service() -> (Arc<InMemoryOutbox>, ChatCommandService<Arc<InMemoryEventStore>>) {
        let outbox = Arc::new(InMemoryOutbox::new());
        let store = Arc::new(InMemoryEventStore::with_outbox(outbox.clone()));
        (outbox, ChatCommandService::new(store))
    }

    fn ctx() -> RequestContext {
        RequestContext::new().with_user(UserId::new())
    }

    fn discussion_input() -> CreateChatInput {
        CreateChatInput {
            workspace_id: WorkspaceId::new(),
            chat_type: ChatType::Discussion,
            title: None,
            is_public: true,
        }
    }

    #[test]
    fn create_discussion_commits_two_events() {
        let (outbox, service) = service();
        let ctx = ctx();

        let outcome = service.create_chat(&ctx, discussion_input()).unwrap();
        assert_eq!(outcome.version, 2);
        assert_eq!(outcome.events.len(), 2);
        assert!(matches!(outcome.events[0], ChatEvent::Created(_)));
        assert!(matches!(outcome.events[1], ChatEvent::ParticipantAdded(_)));
        assert_eq!(outbox.pending_count().unwrap(), 2);
    }

    #[test]
    fn create_typed_chat_converts_in_the_same_transaction() {
        let (_, service) = service();
        let ctx = ctx();

        let outcome = service
            .create_chat(
                &ctx,
                CreateChatInput {
                    workspace_id: WorkspaceId::new(),
                    chat_type: ChatType::Task,
                    title: Some("Ship v1".to_string()),
                    is_public: true,
                },
            )
            .unwrap();

        assert_eq!(outcome.version, 3);
        assert_eq!(outcome.events.len(), 3);
        assert!(matches!(&outcome.events[2], ChatEvent::TypeChanged(e) if e.title == "Ship v1"));
    }

    #[test]
    fn create_typed_chat_without_title_is_a_validation_error() {
        let (outbox, service) = service();
        let ctx = ctx();

        let err = service
            .create_chat(
                &ctx,
                CreateChatInput {
                    workspace_id: WorkspaceId::new(),
                    chat_type: ChatType::Bug,
                    title: Some("".to_string()),
                    is_public: false,
                },
            )
            .unwrap_err();

        match err {
            AppError::Validation(errors) => {
                assert_eq!(errors.errors()[0].field, "title");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        // Nothing was committed.
        assert_eq!(outbox.pending_count().unwrap(), 0);
    }

    #[test]
    fn commands_require_an_authenticated_user() {
        let (_, service) = service();
        let anonymous = RequestContext::new();

        let err = service.create_chat(&anonymous, discussion_input()).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[test]
    fn cancelled_context_aborts_before_any_write() {
        let (outbox, service) = service();
        let ctx = ctx();
        ctx.cancel();

        let err = service.create_chat(&ctx, discussion_input()).unwrap_err();
        assert!(matches!(err, AppError::Aborted(ContextError::Cancelled)));
        assert_eq!(outbox.pending_count().unwrap(), 0);
    }

    #[test]
    fn mutations_on_unknown_chats_map_to_not_found() {
        let (_, service) = service();
        let ctx = ctx();

        let err = service
            .rename(&ctx, ChatId::new(AggregateId::new()), "New title")
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { operation: "rename" }));
    }

    #[test]
    fn domain_errors_keep_their_kind() {
        let (_, service) = service();
        let ctx = ctx();

        let outcome = service.create_chat(&ctx, discussion_input()).unwrap();
        let err = service
            .change_status(&ctx, outcome.chat_id, "To Do")
            .unwrap_err();

        match err {
            AppError::Domain {
                operation: "change_status",
                source: DomainError::InvalidState(_),
            } => {}
            other => panic!("expected invalid-state domain error, got {other:?}"),
        }
    }

    #[test]
    fn idempotent_assign_commits_nothing_new() {
        let (outbox, service) = service();
        let ctx = ctx();

        let outcome = service
            .create_chat(
                &ctx,
                CreateChatInput {
                    workspace_id: WorkspaceId::new(),
                    chat_type: ChatType::Task,
                    title: Some("Ship v1".to_string()),
                    is_public: true,
                },
            )
            .unwrap();
        let assignee = UserId::new();

        let first = service
            .assign_user(&ctx, outcome.chat_id, Some(assignee))
            .unwrap();
        assert_eq!(first.version, 4);
        assert_eq!(first.events.len(), 1);

        let second = service
            .assign_user(&ctx, outcome.chat_id, Some(assignee))
            .unwrap();
        assert_eq!(second.version, 4);
        assert!(second.events.is_empty());

        assert_eq!(outbox.pending_count().unwrap(), 4);
    }

    #[test]
    fn full_workflow_through_the_service() {
        let (_, service) = service();
        let ctx = ctx();

        let outcome = service.create_chat(&ctx, discussion_input()).unwrap();
        let chat_id = outcome.chat_id;

        service.convert_to_bug(&ctx, chat_id, "Crash on save").unwrap();
        service.set_severity(&ctx, chat_id, Severity::Critical).unwrap();
        service.set_priority(&ctx, chat_id, Priority::High).unwrap();
        service.change_status(&ctx, chat_id, "Investigating").unwrap();
        let member = UserId::new();
        service
            .add_participant(&ctx, chat_id, member, ParticipantRole::Member)
            .unwrap();
        service.assign_user(&ctx, chat_id, Some(member)).unwrap();
        service.close(&ctx, chat_id).unwrap();
        service.reopen(&ctx, chat_id).unwrap();
        let last = service.delete(&ctx, chat_id).unwrap();

        assert_eq!(last.version, 11);
        let err = service.rename(&ctx, chat_id, "Too late").unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain {
                source: DomainError::InvalidState(_),
                ..
            }
        ));
    }
}
