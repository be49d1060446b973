use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One named step in a scene's processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Metadata,
    Thumbnail,
    Sprites,
    AnimatedThumbnails,
}

impl Phase {
    /// All phases, in pipeline order. Feeders and status aggregation
    /// iterate this rather than hard-coding variants.
    pub const ALL: [Phase; 4] = [
        Phase::Metadata,
        Phase::Thumbnail,
        Phase::Sprites,
        Phase::AnimatedThumbnails,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Metadata => "metadata",
            Phase::Thumbnail => "thumbnail",
            Phase::Sprites => "sprites",
            Phase::AnimatedThumbnails => "animated_thumbnails",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata" => Ok(Phase::Metadata),
            "thumbnail" => Ok(Phase::Thumbnail),
            "sprites" => Ok(Phase::Sprites),
            "animated_thumbnails" => Ok(Phase::AnimatedThumbnails),
            other => Err(ModelError::InvalidValue(format!("unknown phase: {other}"))),
        }
    }
}
