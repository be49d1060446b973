use async_trait::async_trait;
use scenedeck_model::{DuplicateGroup, DuplicateGroupMember, GroupId, MatchType, SceneId};

use crate::error::Result;

/// Member parameters before a group id is assigned.
#[derive(Debug, Clone, Copy)]
pub struct NewGroupMember {
    pub scene_id: SceneId,
    pub confidence: f64,
    pub match_type: MatchType,
}

/// Persistence for duplicate groups. Mutating operations that touch
/// several rows (`create_group`, `merge_groups`) run inside one database
/// transaction; a failure rolls the whole mutation back.
#[async_trait]
pub trait DuplicateGroupStore: Send + Sync {
    /// Groups (any status) containing at least one of the scenes.
    async fn groups_containing(&self, scene_ids: &[SceneId]) -> Result<Vec<DuplicateGroup>>;

    async fn members(&self, group_id: GroupId) -> Result<Vec<DuplicateGroupMember>>;

    /// Creates a fresh unresolved group with the given members.
    async fn create_group(&self, members: &[NewGroupMember]) -> Result<GroupId>;

    /// Adds one member, refreshing the member count. Returns false when
    /// the scene is already in the group.
    async fn add_member(&self, group_id: GroupId, member: &NewGroupMember) -> Result<bool>;

    /// Moves every member of `sources` into `target`, deletes the source
    /// groups and refreshes the target's member count.
    async fn merge_groups(&self, target: GroupId, sources: &[GroupId]) -> Result<()>;

    async fn set_best_scene(&self, group_id: GroupId, best: SceneId) -> Result<()>;
}
