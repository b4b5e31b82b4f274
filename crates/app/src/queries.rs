//! Query use-cases over the projected chat collection.
//!
//! Access control is enforced at this boundary: a public chat is readable by
//! any member of its workspace, a private chat only by listed participants.
//! Queries never touch the event store.

use flowra_chat::{ChatId, ChatType, ParticipantRole};
use flowra_core::{RequestContext, UserId, WorkspaceId};
use flowra_infra::read_model::{ChatDocument, DocumentStore};

use crate::error::AppError;

/// Default page size for list queries.
pub const DEFAULT_LIMIT: usize = 20;

/// Upper bound for page size.
pub const MAX_LIMIT: usize = 100;

/// A chat document plus the caller's management rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    pub chat: ChatDocument,
    /// Creator or admin participant.
    pub can_manage: bool,
}

/// Filter for chat listing.
#[derive(Debug, Clone)]
pub struct ChatListFilter {
    pub workspace_id: WorkspaceId,
    pub chat_type: Option<ChatType>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ChatListFilter {
    pub fn for_workspace(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            chat_type: None,
            limit: None,
            offset: 0,
        }
    }
}

/// One page of chat views.
#[derive(Debug, Clone)]
pub struct ChatPage {
    pub items: Vec<ChatView>,
    /// Total matching documents before paging.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Read-side service over the chat document collection.
#[derive(Debug)]
pub struct ChatQueryService<D> {
    documents: D,
}

impl<D> ChatQueryService<D>
where
    D: DocumentStore<ChatId, ChatDocument>,
{
    pub fn new(documents: D) -> Self {
        Self { documents }
    }

    /// Single-document read with the access-control law applied:
    /// data is returned iff the chat is public (same workspace) or the caller
    /// is a listed participant. Deleted chats stay readable for audit.
    pub fn get_chat(&self, ctx: &RequestContext, chat_id: ChatId) -> Result<ChatView, AppError> {
        const OP: &str = "get_chat";

        ctx.ensure_active()?;
        let user_id = ctx.user_id().map_err(|_| AppError::Unauthorized { operation: OP })?;

        let document = self
            .documents
            .get(&chat_id)
            .ok_or(AppError::NotFound { operation: OP })?;

        if !may_read(&document, user_id, ctx.workspace_id().ok()) {
            return Err(AppError::Forbidden { operation: OP });
        }

        Ok(view(document, user_id))
    }

    /// Page through the chats visible to the caller in a workspace.
    ///
    /// `limit` defaults to 20 and is capped at 100; results are ordered by
    /// creation time, newest first. Deleted chats are excluded.
    pub fn list_chats(
        &self,
        ctx: &RequestContext,
        filter: ChatListFilter,
    ) -> Result<ChatPage, AppError> {
        const OP: &str = "list_chats";

        ctx.ensure_active()?;
        let user_id = ctx.user_id().map_err(|_| AppError::Unauthorized { operation: OP })?;

        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let mut matching: Vec<ChatDocument> = self
            .documents
            .list()
            .into_iter()
            .filter(|doc| doc.workspace_id == filter.workspace_id)
            .filter(|doc| !doc.deleted)
            .filter(|doc| filter.chat_type.is_none_or(|t| doc.chat_type == t))
            .filter(|doc| may_read(doc, user_id, Some(filter.workspace_id)))
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .map(|doc| view(doc, user_id))
            .collect();

        Ok(ChatPage {
            items,
            total,
            limit,
            offset: filter.offset,
        })
    }
}

fn may_read(document: &ChatDocument, user_id: UserId, workspace_id: Option<WorkspaceId>) -> bool {
    if document.participants.iter().any(|p| p.user_id == user_id) {
        return true;
    }
    document.is_public && workspace_id == Some(document.workspace_id)
}

fn view(document: ChatDocument, user_id: UserId) -> ChatView {
    let can_manage = document.created_by == user_id
        || document
            .participants
            .iter()
            .any(|p| p.user_id == user_id && p.role == ParticipantRole::Admin);
    ChatView {
        chat: document,
        can_manage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use flowra_core::AggregateId;
    use flowra_infra::read_model::{InMemoryDocumentStore, ParticipantView};
    use std::sync::Arc;

    fn document(workspace_id: WorkspaceId, is_public: bool, creator: UserId) -> ChatDocument {
        ChatDocument {
            chat_id: ChatId::new(AggregateId::new()),
            workspace_id,
            chat_type: ChatType::Discussion,
            title: None,
            is_public,
            created_by: creator,
            created_at: Utc::now(),
            participants: vec![ParticipantView {
                user_id: creator,
                role: ParticipantRole::Admin,
                joined_at: Utc::now(),
            }],
            status: None,
            priority: None,
            assigned_to: None,
            due_date: None,
            severity: None,
            closed: false,
            deleted: false,
            version: 2,
            last_message_at: None,
            message_count: 0,
        }
    }

    fn service() -> (
        Arc<InMemoryDocumentStore<ChatId, ChatDocument>>,
        ChatQueryService<Arc<InMemoryDocumentStore<ChatId, ChatDocument>>>,
    ) {
        let documents = Arc::new(InMemoryDocumentStore::new());
        (documents.clone(), ChatQueryService::new(documents))
    }

    fn ctx(user: UserId, workspace: WorkspaceId) -> RequestContext {
        RequestContext::new().with_user(user).with_workspace(workspace)
    }

    #[test]
    fn public_chats_are_visible_to_workspace_members() {
        let (documents, service) = service();
        let workspace = WorkspaceId::new();
        let creator = UserId::new();
        let doc = document(workspace, true, creator);
        documents.upsert(doc.chat_id, doc.clone());

        let member = UserId::new();
        let found = service.get_chat(&ctx(member, workspace), doc.chat_id).unwrap();
        assert!(!found.can_manage);

        // A member of a different workspace is rejected.
        let outsider = ctx(UserId::new(), WorkspaceId::new());
        let err = service.get_chat(&outsider, doc.chat_id).unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[test]
    fn private_chats_are_participant_only() {
        let (documents, service) = service();
        let workspace = WorkspaceId::new();
        let creator = UserId::new();
        let doc = document(workspace, false, creator);
        documents.upsert(doc.chat_id, doc.clone());

        // Workspace membership alone is not enough.
        let err = service
            .get_chat(&ctx(UserId::new(), workspace), doc.chat_id)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let found = service.get_chat(&ctx(creator, workspace), doc.chat_id).unwrap();
        assert!(found.can_manage);
    }

    #[test]
    fn admin_participants_can_manage() {
        let (documents, service) = service();
        let workspace = WorkspaceId::new();
        let creator = UserId::new();
        let admin = UserId::new();
        let member = UserId::new();

        let mut doc = document(workspace, false, creator);
        doc.participants.push(ParticipantView {
            user_id: admin,
            role: ParticipantRole::Admin,
            joined_at: Utc::now(),
        });
        doc.participants.push(ParticipantView {
            user_id: member,
            role: ParticipantRole::Member,
            joined_at: Utc::now(),
        });
        documents.upsert(doc.chat_id, doc.clone());

        assert!(service.get_chat(&ctx(admin, workspace), doc.chat_id).unwrap().can_manage);
        assert!(!service.get_chat(&ctx(member, workspace), doc.chat_id).unwrap().can_manage);
    }

    #[test]
    fn missing_document_is_not_found() {
        let (_, service) = service();
        let err = service
            .get_chat(
                &ctx(UserId::new(), WorkspaceId::new()),
                ChatId::new(AggregateId::new()),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn list_filters_by_workspace_type_and_visibility() {
        let (documents, service) = service();
        let workspace = WorkspaceId::new();
        let user = UserId::new();

        // Visible: public in the same workspace.
        let public = document(workspace, true, UserId::new());
        documents.upsert(public.chat_id, public.clone());
        // Hidden: private, user not a participant.
        let private = document(workspace, false, UserId::new());
        documents.upsert(private.chat_id, private.clone());
        // Hidden: other workspace.
        let elsewhere = document(WorkspaceId::new(), true, UserId::new());
        documents.upsert(elsewhere.chat_id, elsewhere.clone());
        // Visible: typed, user participates.
        let mut task = document(workspace, false, user);
        task.chat_type = ChatType::Task;
        task.title = Some("Ship v1".to_string());
        documents.upsert(task.chat_id, task.clone());
        // Hidden: deleted.
        let mut deleted = document(workspace, true, UserId::new());
        deleted.deleted = true;
        documents.upsert(deleted.chat_id, deleted.clone());

        let page = service
            .list_chats(&ctx(user, workspace), ChatListFilter::for_workspace(workspace))
            .unwrap();
        assert_eq!(page.total, 2);

        let page = service
            .list_chats(
                &ctx(user, workspace),
                ChatListFilter {
                    chat_type: Some(ChatType::Task),
                    ..ChatListFilter::for_workspace(workspace)
                },
            )
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].chat.chat_id, task.chat_id);
    }

    #[test]
    fn list_pages_newest_first_with_clamped_limit() {
        let (documents, service) = service();
        let workspace = WorkspaceId::new();
        let user = UserId::new();

        for i in 0..30 {
            let mut doc = document(workspace, true, UserId::new());
            doc.created_at = Utc::now() - Duration::minutes(i);
            documents.upsert(doc.chat_id, doc.clone());
        }

        let page = service
            .list_chats(&ctx(user, workspace), ChatListFilter::for_workspace(workspace))
            .unwrap();
        assert_eq!(page.limit, DEFAULT_LIMIT);
        assert_eq!(page.items.len(), DEFAULT_LIMIT);
        assert_eq!(page.total, 30);

        // Newest first.
        let newest = page.items.first().unwrap().chat.created_at;
        assert!(page.items.iter().all(|v| v.chat.created_at <= newest));

        let page = service
            .list_chats(
                &ctx(user, workspace),
                ChatListFilter {
                    limit: Some(1000),
                    offset: 25,
                    ..ChatListFilter::for_workspace(workspace)
                },
            )
            .unwrap();
        assert_eq!(page.limit, MAX_LIMIT);
        assert_eq!(page.items.len(), 5);
    }

    #[test]
    fn queries_require_an_authenticated_user() {
        let (_, service) = service();
        let err = service
            .list_chats(
                &RequestContext::new(),
                ChatListFilter::for_workspace(WorkspaceId::new()),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }
}
