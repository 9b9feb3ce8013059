//! Identity of the acting user.
//!
//! Authentication happens outside this crate; callers hand in an [`Actor`]
//! describing who is making the request. Checks run before any mutation.

use crate::error::{AppResult, LabError};
use crate::model::{Design, GroupId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub groups: Vec<GroupId>,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            groups: Vec::new(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            groups: Vec::new(),
            is_admin: true,
        }
    }

    pub fn with_groups(mut self, groups: Vec<GroupId>) -> Self {
        self.groups = groups;
        self
    }

    /// Catalog and station administration.
    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(LabError::Unauthorized(format!(
                "user {} lacks the administrator role",
                self.user_id
            )))
        }
    }

    /// Mutations of a design, its stages and its runs.
    pub fn require_owner(&self, design: &Design) -> AppResult<()> {
        if design.owner == self.user_id {
            Ok(())
        } else {
            Err(LabError::Unauthorized(format!(
                "user {} does not own design '{}'",
                self.user_id, design.name
            )))
        }
    }

    /// Owners, directly shared users and members of shared groups may read.
    pub fn can_read(&self, design: &Design) -> bool {
        design.owner == self.user_id
            || design.shared_users.contains(&self.user_id)
            || self.groups.iter().any(|g| design.shared_groups.contains(g))
    }

    pub fn require_read(&self, design: &Design) -> AppResult<()> {
        if self.can_read(design) {
            Ok(())
        } else {
            Err(LabError::Unauthorized(format!(
                "user {} cannot access design '{}'",
                self.user_id, design.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DesignId, StationId};
    use chrono::Utc;

    fn design() -> Design {
        Design {
            id: DesignId(1),
            name: "Buffers".into(),
            owner: UserId(1),
            station_id: StationId(1),
            created_at: Utc::now(),
            shared_users: vec![UserId(2)],
            shared_groups: vec![GroupId(9)],
        }
    }

    #[test]
    fn test_read_access() {
        let design = design();
        assert!(Actor::user(UserId(1)).can_read(&design));
        assert!(Actor::user(UserId(2)).can_read(&design));
        assert!(Actor::user(UserId(3))
            .with_groups(vec![GroupId(9)])
            .can_read(&design));
        assert!(!Actor::user(UserId(3)).can_read(&design));
    }

    #[test]
    fn test_shared_user_cannot_mutate() {
        let design = design();
        let err = Actor::user(UserId(2)).require_owner(&design).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(Actor::user(UserId(1)).require_owner(&design).is_ok());
    }
}
