use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowra_chat::{Chat, ChatId, ChatType, ParticipantRole, Priority, Severity};
use flowra_core::{UserId, WorkspaceId};

/// Participant entry as projected into the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

/// Denormalized chat document, keyed by chat id.
///
/// Designed for single-document reads; absent optional fields mean "not set".
/// `last_message_at` and `message_count` are placeholders maintained by the
/// message projections, preserved across chat rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDocument {
    pub chat_id: ChatId,
    pub workspace_id: WorkspaceId,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub is_public: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<ParticipantView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub closed: bool,
    pub deleted: bool,

    /// Stream version this document was projected at.
    pub version: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: u64,
}

impl ChatDocument {
    /// Project the aggregate into a fresh document at the given stream version.
    pub fn project(chat: &Chat, version: u64) -> Self {
        Self {
            chat_id: chat.id_typed(),
            workspace_id: chat.workspace_id(),
            chat_type: chat.chat_type(),
            title: if chat.title().is_empty() {
                None
            } else {
                Some(chat.title().to_string())
            },
            is_public: chat.is_public(),
            created_by: chat.created_by(),
            created_at: chat.created_at().unwrap_or_default(),
            participants: chat
                .participants()
                .iter()
                .map(|p| ParticipantView {
                    user_id: p.user_id,
                    role: p.role,
                    joined_at: p.joined_at,
                })
                .collect(),
            status: if chat.status().is_empty() {
                None
            } else {
                Some(chat.status().to_string())
            },
            priority: chat.priority(),
            assigned_to: chat.assignee(),
            due_date: chat.due_date(),
            severity: chat.severity(),
            closed: chat.is_closed(),
            deleted: chat.is_deleted(),
            version,
            last_message_at: None,
            message_count: 0,
        }
    }

    /// Compare the fields owned by the chat projection.
    ///
    /// Message counters are excluded: they belong to the message projections
    /// and differ legitimately from a fresh rebuild.
    pub fn matches_projection(&self, other: &ChatDocument) -> bool {
        self.chat_id == other.chat_id
            && self.workspace_id == other.workspace_id
            && self.chat_type == other.chat_type
            && self.title == other.title
            && self.is_public == other.is_public
            && self.created_by == other.created_by
            && self.created_at == other.created_at
            && self.participants == other.participants
            && self.status == other.status
            && self.priority == other.priority
            && self.assigned_to == other.assigned_to
            && self.due_date == other.due_date
            && self.severity == other.severity
            && self.closed == other.closed
            && self.deleted == other.deleted
            && self.version == other.version
    }
}
