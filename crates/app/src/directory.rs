//! External collaborator interfaces and the workspace membership use-case.
//!
//! The identity provider is opaque behind `GroupDirectory` (workspace → group,
//! user → group membership) and `UserRepository`. Workspace use-cases consume
//! these interfaces; they are not part of the event-sourced core.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use flowra_core::{RequestContext, UserId, WorkspaceId};

use crate::error::AppError;

/// Identifier of a directory group backing a workspace.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub Uuid);

impl core::fmt::Display for GroupId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("directory entry not found: {0}")]
    NotFound(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Opaque group directory of the identity provider.
pub trait GroupDirectory: Send + Sync {
    fn create_group(&self, workspace_id: WorkspaceId) -> Result<GroupId, DirectoryError>;

    fn add_user_to_group(&self, group_id: GroupId, user_id: UserId) -> Result<(), DirectoryError>;

    fn remove_user_from_group(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<(), DirectoryError>;

    fn list_group_members(&self, group_id: GroupId) -> Result<Vec<UserId>, DirectoryError>;
}

impl<G> GroupDirectory for std::sync::Arc<G>
where
    G: GroupDirectory + ?Sized,
{
    fn create_group(&self, workspace_id: WorkspaceId) -> Result<GroupId, DirectoryError> {
        (**self).create_group(workspace_id)
    }

    fn add_user_to_group(&self, group_id: GroupId, user_id: UserId) -> Result<(), DirectoryError> {
        (**self).add_user_to_group(group_id, user_id)
    }

    fn remove_user_from_group(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<(), DirectoryError> {
        (**self).remove_user_from_group(group_id, user_id)
    }

    fn list_group_members(&self, group_id: GroupId) -> Result<Vec<UserId>, DirectoryError> {
        (**self).list_group_members(group_id)
    }
}

/// User lookup record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
}

/// Read-only user lookups against the identity provider.
pub trait UserRepository: Send + Sync {
    fn exists(&self, id: UserId) -> Result<bool, DirectoryError>;

    fn by_id(&self, id: UserId) -> Result<Option<UserRecord>, DirectoryError>;

    fn by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError>;
}

/// Workspace membership use-cases over the directory interfaces.
///
/// Keeps the workspace → group mapping internally so the directory stays the
/// four-method interface the identity provider actually exposes.
pub struct WorkspaceService<G, U> {
    directory: G,
    users: U,
    groups: RwLock<HashMap<WorkspaceId, GroupId>>,
}

impl<G, U> WorkspaceService<G, U>
where
    G: GroupDirectory,
    U: UserRepository,
{
    pub fn new(directory: G, users: U) -> Self {
        Self {
            directory,
            users,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Invite a user into a workspace: verify the user exists, then add them
    /// to the workspace's backing group.
    pub fn invite_user(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<(), AppError> {
        const OP: &str = "invite_user";

        ctx.ensure_active()?;
        let exists = self
            .users
            .exists(user_id)
            .map_err(|e| dependency(OP, e))?;
        if !exists {
            return Err(AppError::NotFound { operation: OP });
        }

        let group_id = self.group_for(OP, workspace_id)?;
        self.directory
            .add_user_to_group(group_id, user_id)
            .map_err(|e| dependency(OP, e))
    }

    pub fn remove_user(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> Result<(), AppError> {
        const OP: &str = "remove_user";

        ctx.ensure_active()?;
        let group_id = self.group_for(OP, workspace_id)?;
        self.directory
            .remove_user_from_group(group_id, user_id)
            .map_err(|e| dependency(OP, e))
    }

    pub fn list_members(
        &self,
        ctx: &RequestContext,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<UserId>, AppError> {
        const OP: &str = "list_members";

        ctx.ensure_active()?;
        let group_id = self.group_for(OP, workspace_id)?;
        self.directory
            .list_group_members(group_id)
            .map_err(|e| dependency(OP, e))
    }

    fn group_for(
        &self,
        operation: &'static str,
        workspace_id: WorkspaceId,
    ) -> Result<GroupId, AppError> {
        if let Some(group_id) = self
            .groups
            .read()
            .ok()
            .and_then(|g| g.get(&workspace_id).copied())
        {
            return Ok(group_id);
        }

        let group_id = self
            .directory
            .create_group(workspace_id)
            .map_err(|e| dependency(operation, e))?;

        if let Ok(mut groups) = self.groups.write() {
            groups.insert(workspace_id, group_id);
        }
        Ok(group_id)
    }
}

fn dependency(operation: &'static str, err: DirectoryError) -> AppError {
    AppError::Dependency {
        operation,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// In-memory fakes standing in for the identity provider.
    #[derive(Default)]
    struct FakeDirectory {
        groups: RwLock<HashMap<GroupId, Vec<UserId>>>,
    }

    impl GroupDirectory for FakeDirectory {
        fn create_group(&self, _workspace_id: WorkspaceId) -> Result<GroupId, DirectoryError> {
            let group_id = GroupId(Uuid::now_v7());
            self.groups.write().unwrap().insert(group_id, Vec::new());
            Ok(group_id)
        }

        fn add_user_to_group(
            &self,
            group_id: GroupId,
            user_id: UserId,
        ) -> Result<(), DirectoryError> {
            let mut groups = self.groups.write().unwrap();
            let members = groups
                .get_mut(&group_id)
                .ok_or_else(|| DirectoryError::NotFound(group_id.to_string()))?;
            if !members.contains(&user_id) {
                members.push(user_id);
            }
            Ok(())
        }

        fn remove_user_from_group(
            &self,
            group_id: GroupId,
            user_id: UserId,
        ) -> Result<(), DirectoryError> {
            let mut groups = self.groups.write().unwrap();
            let members = groups
                .get_mut(&group_id)
                .ok_or_else(|| DirectoryError::NotFound(group_id.to_string()))?;
            members.retain(|m| *m != user_id);
            Ok(())
        }

        fn list_group_members(&self, group_id: GroupId) -> Result<Vec<UserId>, DirectoryError> {
            self.groups
                .read()
                .unwrap()
                .get(&group_id)
                .cloned()
                .ok_or_else(|| DirectoryError::NotFound(group_id.to_string()))
        }
    }

    #[derive(Default)]
    struct FakeUsers {
        records: Vec<UserRecord>,
    }

    impl UserRepository for FakeUsers {
        fn exists(&self, id: UserId) -> Result<bool, DirectoryError> {
            Ok(self.records.iter().any(|r| r.id == id))
        }

        fn by_id(&self, id: UserId) -> Result<Option<UserRecord>, DirectoryError> {
            Ok(self.records.iter().find(|r| r.id == id).cloned())
        }

        fn by_username(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
            Ok(self.records.iter().find(|r| r.username == username).cloned())
        }
    }

    fn user(username: &str) -> UserRecord {
        UserRecord {
            id: UserId::new(),
            username: username.to_string(),
            display_name: username.to_uppercase(),
        }
    }

    #[test]
    fn invite_verifies_user_then_adds_to_group() {
        let alex = user("alex");
        let users = FakeUsers {
            records: vec![alex.clone()],
        };
        let service = WorkspaceService::new(Arc::new(FakeDirectory::default()), users);
        let ctx = RequestContext::new().with_user(UserId::new());
        let workspace = WorkspaceId::new();

        service.invite_user(&ctx, workspace, alex.id).unwrap();
        assert_eq!(service.list_members(&ctx, workspace).unwrap(), vec![alex.id]);

        // Unknown users are rejected before the directory is touched.
        let err = service.invite_user(&ctx, workspace, UserId::new()).unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn remove_user_updates_the_group() {
        let alex = user("alex");
        let sam = user("sam");
        let users = FakeUsers {
            records: vec![alex.clone(), sam.clone()],
        };
        let service = WorkspaceService::new(Arc::new(FakeDirectory::default()), users);
        let ctx = RequestContext::new().with_user(UserId::new());
        let workspace = WorkspaceId::new();

        service.invite_user(&ctx, workspace, alex.id).unwrap();
        service.invite_user(&ctx, workspace, sam.id).unwrap();
        service.remove_user(&ctx, workspace, alex.id).unwrap();

        assert_eq!(service.list_members(&ctx, workspace).unwrap(), vec![sam.id]);
    }

    #[test]
    fn workspace_group_mapping_is_stable() {
        let alex = user("alex");
        let users = FakeUsers {
            records: vec![alex.clone()],
        };
        let directory = Arc::new(FakeDirectory::default());
        let service = WorkspaceService::new(directory.clone(), users);
        let ctx = RequestContext::new().with_user(UserId::new());
        let workspace = WorkspaceId::new();

        service.invite_user(&ctx, workspace, alex.id).unwrap();
        service.invite_user(&ctx, workspace, alex.id).unwrap();

        // One workspace maps to exactly one group.
        assert_eq!(directory.groups.read().unwrap().len(), 1);
    }

    #[test]
    fn user_lookup_by_username() {
        let alex = user("alex");
        let users = FakeUsers {
            records: vec![alex.clone()],
        };

        assert_eq!(users.by_username("alex").unwrap().unwrap().id, alex.id);
        assert!(users.by_username("nobody").unwrap().is_none());
        assert_eq!(users.by_id(alex.id).unwrap().unwrap().username, "alex");
    }
}
