use crate::error::ModelError;
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a trigger config fires. Only `Scheduled` entries register cron
/// jobs; other kinds are reserved for future trigger sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerKind::Scheduled),
            "manual" => Ok(TriggerKind::Manual),
            other => Err(ModelError::InvalidValue(format!(
                "unknown trigger kind: {other}"
            ))),
        }
    }
}

/// Operator-defined rule for enqueueing "phase X needed" jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub id: i32,
    pub phase: Phase,
    pub kind: TriggerKind,
    /// Required when `kind` is `Scheduled`.
    pub cron_expression: Option<String>,
    pub enabled: bool,
}
