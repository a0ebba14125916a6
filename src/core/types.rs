/*!
 * Core Types
 * Identifiers, cache keys and permission values shared by every component
 */

use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(SmartString);

        impl $name {
            #[inline]
            pub fn new(value: impl AsRef<str>) -> Self {
                Self(SmartString::from(value.as_ref()))
            }

            #[inline(always)]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.0.as_str())
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(SmartString::from(value))
            }
        }
    };
}

string_id!(
    /// Identity of a user, supplied by the session provider
    UserId
);

string_id!(
    /// Identity of a workspace
    WorkspaceId
);

string_id!(
    /// Name of a single permission, e.g. `members:invite`
    PermissionName
);

/// Shape of the query a cache key answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Every workspace the user can reach, with the permission set of each
    UserContext,
    /// Permission set of the user inside one workspace
    WorkspacePermissions,
    /// A single yes/no permission check
    PermissionCheck,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserContext => "user_context",
            Self::WorkspacePermissions => "workspace_permissions",
            Self::PermissionCheck => "permission_check",
        }
    }
}

/// Identifies one cached authorization fact.
///
/// Uniqueness is per full `(user, workspace, permission)` tuple; the same tuple
/// also serves as the in-flight key for preloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<PermissionName>,
}

impl CacheKey {
    /// Context-wide key covering every workspace of the user
    pub fn user_context(user_id: UserId) -> Self {
        Self {
            user_id,
            workspace_id: None,
            permission: None,
        }
    }

    /// Key for the full permission set inside one workspace
    pub fn workspace(user_id: UserId, workspace_id: WorkspaceId) -> Self {
        Self {
            user_id,
            workspace_id: Some(workspace_id),
            permission: None,
        }
    }

    /// Key for one permission check, optionally workspace-scoped
    pub fn permission(
        user_id: UserId,
        workspace_id: Option<WorkspaceId>,
        permission: PermissionName,
    ) -> Self {
        Self {
            user_id,
            workspace_id,
            permission: Some(permission),
        }
    }

    pub fn kind(&self) -> QueryKind {
        match (&self.workspace_id, &self.permission) {
            (_, Some(_)) => QueryKind::PermissionCheck,
            (Some(_), None) => QueryKind::WorkspacePermissions,
            (None, None) => QueryKind::UserContext,
        }
    }

    /// Does this key belong to the given user?
    #[inline]
    pub fn is_user(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// Does this key belong to the given user inside the given workspace?
    #[inline]
    pub fn is_workspace(&self, user_id: &UserId, workspace_id: &WorkspaceId) -> bool {
        self.is_user(user_id) && self.workspace_id.as_ref() == Some(workspace_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permissions:{}:{}", self.kind().as_str(), self.user_id)?;
        if let Some(workspace) = &self.workspace_id {
            write!(f, ":{}", workspace)?;
        }
        if let Some(permission) = &self.permission {
            write!(f, ":{}", permission)?;
        }
        Ok(())
    }
}

/// Cached authorization fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PermissionValue {
    /// Permission sets for every reachable workspace
    Context(BTreeMap<WorkspaceId, BTreeSet<PermissionName>>),
    /// Permission set inside one workspace
    Set(BTreeSet<PermissionName>),
    /// Result of a single check
    Allowed(bool),
}

impl PermissionValue {
    /// Does this value grant `permission` (inside `workspace` for context values)?
    pub fn grants(&self, workspace: Option<&WorkspaceId>, permission: &PermissionName) -> bool {
        match self {
            Self::Allowed(allowed) => *allowed,
            Self::Set(set) => set.contains(permission),
            Self::Context(map) => match workspace {
                Some(ws) => map.get(ws).is_some_and(|set| set.contains(permission)),
                None => map.values().any(|set| set.contains(permission)),
            },
        }
    }

    /// Serialized size in bytes, used for cache size accounting
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
