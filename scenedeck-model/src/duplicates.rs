use crate::error::ModelError;
use crate::ids::{GroupId, SceneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resolution state of a duplicate group. `Resolved` and `Dismissed`
/// record an operator decision; matches against their members spawn a
/// fresh unresolved group instead of reopening them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Unresolved,
    Resolved,
    Dismissed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Unresolved => "unresolved",
            GroupStatus::Resolved => "resolved",
            GroupStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unresolved" => Ok(GroupStatus::Unresolved),
            "resolved" => Ok(GroupStatus::Resolved),
            "dismissed" => Ok(GroupStatus::Dismissed),
            other => Err(ModelError::InvalidValue(format!(
                "unknown group status: {other}"
            ))),
        }
    }
}

/// Which fingerprint kind produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Audio,
    Visual,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Audio => "audio",
            MatchType::Visual => "visual",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(MatchType::Audio),
            "visual" => Ok(MatchType::Visual),
            other => Err(ModelError::InvalidValue(format!(
                "unknown match type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: GroupId,
    pub status: GroupStatus,
    pub member_count: i32,
    pub best_scene_id: Option<SceneId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroupMember {
    pub group_id: GroupId,
    pub scene_id: SceneId,
    /// In `[0, 1]`.
    pub confidence_score: f64,
    pub match_type: MatchType,
}

/// A confirmed fingerprint match between the query scene and another
/// scene, produced by the matching engine before grouping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneMatch {
    pub scene_id: SceneId,
    pub confidence: f64,
    pub match_type: MatchType,
}
