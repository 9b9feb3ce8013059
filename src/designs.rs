//! Designs, their stages and read-only sharing.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::auth::Actor;
use crate::error::{AppResult, LabError};
use crate::model::{
    sanitize_name, Design, DesignId, GroupId, RoutineId, Stage, StageId, StationId, UserId,
};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct Designs {
    store: Arc<Store>,
}

fn clean_name(raw: &str, what: &str) -> AppResult<String> {
    let name = sanitize_name(raw);
    if name.trim().is_empty() {
        return Err(LabError::validation(format!("{what} name must not be empty")));
    }
    Ok(name)
}

impl Designs {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn add_design(&self, actor: &Actor, name: &str, station_id: StationId) -> AppResult<Design> {
        let name = clean_name(name, "Design")?;
        let design = self.store.write(|t| {
            t.station(station_id)?;
            let id = DesignId(t.allocate_id());
            let design = Design {
                id,
                name,
                owner: actor.user_id,
                station_id,
                created_at: Utc::now(),
                shared_users: Vec::new(),
                shared_groups: Vec::new(),
            };
            t.designs.insert(id, design.clone());
            Ok(design)
        })?;
        info!(design = %design.id, owner = %actor.user_id, "design created");
        Ok(design)
    }

    /// Add a stage bound to a routine of the design's station.
    pub fn add_stage(
        &self,
        actor: &Actor,
        design_id: DesignId,
        name: &str,
        routine_id: RoutineId,
    ) -> AppResult<Stage> {
        let name = clean_name(name, "Stage")?;
        self.store.write(|t| {
            let design = t.design(design_id)?;
            actor.require_owner(design)?;
            let routine = t.routine(routine_id)?;
            let station = t.station(design.station_id)?;
            if !station.routine_ids.contains(&routine_id) {
                return Err(LabError::validation(format!(
                    "Routine '{}' is not available on station '{}'",
                    routine.name, station.name
                )));
            }
            let id = StageId(t.allocate_id());
            let stage = Stage {
                id,
                name,
                owner: actor.user_id,
                design_id,
                routine_id,
                created_at: Utc::now(),
            };
            t.stages.insert(id, stage.clone());
            Ok(stage)
        })
    }

    pub fn delete_design(&self, actor: &Actor, design_id: DesignId) -> AppResult<()> {
        self.store.write(|t| {
            actor.require_owner(t.design(design_id)?)?;
            t.remove_design(design_id)
        })?;
        info!(design = %design_id, "design deleted");
        Ok(())
    }

    pub fn delete_stage(&self, actor: &Actor, stage_id: StageId) -> AppResult<()> {
        self.store.write(|t| {
            let design_id = t.stage(stage_id)?.design_id;
            actor.require_owner(t.design(design_id)?)?;
            t.remove_stage(stage_id)
        })?;
        info!(stage = %stage_id, "stage deleted");
        Ok(())
    }

    /// Design visible to the actor.
    pub fn design(&self, actor: &Actor, design_id: DesignId) -> AppResult<Design> {
        self.store.read(|t| {
            let design = t.design(design_id)?;
            actor.require_read(design)?;
            Ok(design.clone())
        })
    }

    /// Stages of a design visible to the actor, in creation order.
    pub fn stages(&self, actor: &Actor, design_id: DesignId) -> AppResult<Vec<Stage>> {
        self.store.read(|t| {
            actor.require_read(t.design(design_id)?)?;
            Ok(t.design_stages(design_id).into_iter().cloned().collect())
        })
    }

    /// Owned designs followed by designs shared with the actor or its groups.
    pub fn designs_for_user(&self, actor: &Actor) -> AppResult<Vec<Design>> {
        self.store.read(|t| {
            let (mut owned, shared): (Vec<Design>, Vec<Design>) = t
                .designs
                .values()
                .filter(|d| actor.can_read(d))
                .cloned()
                .partition(|d| d.owner == actor.user_id);
            owned.extend(shared);
            Ok(owned)
        })
    }

    // -------------------------------------------------------------------------
    // Sharing
    // -------------------------------------------------------------------------

    fn update_sharing(
        &self,
        actor: &Actor,
        design_id: DesignId,
        f: impl FnOnce(&mut Design),
    ) -> AppResult<Design> {
        self.store.write(|t| {
            actor.require_owner(t.design(design_id)?)?;
            let design = t.design_mut(design_id)?;
            f(design);
            Ok(design.clone())
        })
    }

    pub fn share_with_user(&self, actor: &Actor, design_id: DesignId, user: UserId) -> AppResult<Design> {
        if user == actor.user_id {
            return Err(LabError::validation("A design cannot be shared with its owner"));
        }
        self.update_sharing(actor, design_id, |d| {
            if !d.shared_users.contains(&user) {
                d.shared_users.push(user);
            }
        })
    }

    pub fn unshare_user(&self, actor: &Actor, design_id: DesignId, user: UserId) -> AppResult<Design> {
        self.update_sharing(actor, design_id, |d| d.shared_users.retain(|u| *u != user))
    }

    pub fn share_with_group(&self, actor: &Actor, design_id: DesignId, group: GroupId) -> AppResult<Design> {
        self.update_sharing(actor, design_id, |d| {
            if !d.shared_groups.contains(&group) {
                d.shared_groups.push(group);
            }
        })
    }

    pub fn unshare_group(&self, actor: &Actor, design_id: DesignId, group: GroupId) -> AppResult<Design> {
        self.update_sharing(actor, design_id, |d| d.shared_groups.retain(|g| *g != group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, RoutineDefinition};
    use crate::registry::{StationRegistry, StationSpec};

    fn setup() -> (Designs, StationId, RoutineId, RoutineId) {
        let store = Arc::new(Store::new());
        let registry = StationRegistry::new(store.clone());
        let spec = |addr: &str| StationSpec {
            name: addr.into(),
            address: addr.into(),
            api_key: None,
            location: None,
        };
        let a = registry.add_station(spec("10.0.0.1:80")).unwrap();
        let b = registry.add_station(spec("10.0.0.2:80")).unwrap();
        let catalog = Catalog::new(store.clone());
        let routine = |name: &str| RoutineDefinition {
            name: name.into(),
            parameters: vec![],
        };
        let on_a = catalog.import_routines(a.id, &[routine("Mix")]).unwrap();
        let on_b = catalog.import_routines(b.id, &[routine("Mix")]).unwrap();
        (
            Designs::new(store),
            a.id,
            on_a.created[0].0,
            on_b.created[0].0,
        )
    }

    #[test]
    fn test_stage_routine_must_belong_to_station() {
        let (designs, station, local, foreign) = setup();
        let owner = Actor::user(UserId(1));
        let design = designs.add_design(&owner, "Buffer\tA", station).unwrap();
        assert_eq!(design.name, "Buffer A");

        assert!(designs.add_stage(&owner, design.id, "s1", local).is_ok());
        let err = designs
            .add_stage(&owner, design.id, "s2", foreign)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_sharing_grants_read_only() {
        let (designs, station, local, _) = setup();
        let owner = Actor::user(UserId(1));
        let guest = Actor::user(UserId(2));
        let member = Actor::user(UserId(3)).with_groups(vec![GroupId(7)]);
        let design = designs.add_design(&owner, "Shared", station).unwrap();

        assert!(designs.design(&guest, design.id).is_err());
        designs.share_with_user(&owner, design.id, UserId(2)).unwrap();
        designs.share_with_group(&owner, design.id, GroupId(7)).unwrap();

        assert_eq!(designs.designs_for_user(&guest).unwrap().len(), 1);
        assert_eq!(designs.designs_for_user(&member).unwrap().len(), 1);
        let err = designs
            .add_stage(&guest, design.id, "nope", local)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        designs.unshare_user(&owner, design.id, UserId(2)).unwrap();
        assert!(designs.designs_for_user(&guest).unwrap().is_empty());
    }

    #[test]
    fn test_delete_design_requires_owner() {
        let (designs, station, _, _) = setup();
        let owner = Actor::user(UserId(1));
        let design = designs.add_design(&owner, "Mine", station).unwrap();
        assert!(designs
            .delete_design(&Actor::user(UserId(2)), design.id)
            .is_err());
        designs.delete_design(&owner, design.id).unwrap();
        assert!(designs.designs_for_user(&owner).unwrap().is_empty());
    }
}
