//! Bootstrap stages and the progress board that tracks them.
//!
//! A [`StageBoard`] is write-once per stage: a stage flips to complete at
//! most one time and never reverts. The board refuses to complete a stage
//! whose prerequisites are still pending, so completion order always
//! respects the dependency graph.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// One logical unit of the bootstrap dependency graph, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Identity,
    Menu,
    Notifications,
    Roster,
    Energy,
    Characteristics,
    Scene,
    Interactions,
}

static FAN_OUT_A: [StageId; 5] = [
    StageId::Identity,
    StageId::Menu,
    StageId::Notifications,
    StageId::Roster,
    StageId::Energy,
];

impl StageId {
    /// All stages in declared order.
    pub const ALL: [StageId; 8] = [
        StageId::Identity,
        StageId::Menu,
        StageId::Notifications,
        StageId::Roster,
        StageId::Energy,
        StageId::Characteristics,
        StageId::Scene,
        StageId::Interactions,
    ];

    /// Short label used in progress output and terminal errors.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            StageId::Identity => "identity",
            StageId::Menu => "menu",
            StageId::Notifications => "notifications",
            StageId::Roster => "roster",
            StageId::Energy => "energy",
            StageId::Characteristics => "characteristics",
            StageId::Scene => "scene",
            StageId::Interactions => "interactions",
        }
    }

    /// Zero-based position in declared order.
    #[must_use]
    pub const fn position(self) -> usize {
        match self {
            StageId::Identity => 0,
            StageId::Menu => 1,
            StageId::Notifications => 2,
            StageId::Roster => 3,
            StageId::Energy => 4,
            StageId::Characteristics => 5,
            StageId::Scene => 6,
            StageId::Interactions => 7,
        }
    }

    /// Stages that must be complete before this one may complete.
    ///
    /// The selected-entity stages wait on the whole first fan-out because the
    /// orchestrator only resolves a selection after that fan-in.
    #[must_use]
    pub fn prerequisites(self) -> &'static [StageId] {
        match self {
            StageId::Identity => &[],
            StageId::Menu | StageId::Notifications | StageId::Roster | StageId::Energy => {
                &FAN_OUT_A[..1]
            }
            StageId::Characteristics | StageId::Scene | StageId::Interactions => &FAN_OUT_A,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Progress record for a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub id: StageId,
    pub label: &'static str,
    pub complete: bool,
    pub position: usize,
}

impl Stage {
    fn pending(id: StageId) -> Self {
        Self {
            id,
            label: id.label(),
            complete: false,
            position: id.position(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stage '{stage}' cannot complete before prerequisite '{missing}'")]
pub struct StageOrderError {
    pub stage: StageId,
    pub missing: StageId,
}

/// Result of a successful [`StageBoard::complete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTransition {
    /// The stage flipped from pending to complete.
    Completed,
    /// The stage was already complete; nothing changed.
    AlreadyComplete,
}

/// Monotonic completion flags for every bootstrap stage.
#[derive(Debug, Clone)]
pub struct StageBoard {
    stages: [Stage; 8],
    completion_log: Vec<StageId>,
}

impl Default for StageBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StageBoard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: StageId::ALL.map(Stage::pending),
            completion_log: Vec::with_capacity(StageId::ALL.len()),
        }
    }

    pub fn complete(&mut self, id: StageId) -> Result<StageTransition, StageOrderError> {
        if self.is_complete(id) {
            return Ok(StageTransition::AlreadyComplete);
        }
        if let Some(&missing) = id
            .prerequisites()
            .iter()
            .find(|prereq| !self.is_complete(**prereq))
        {
            return Err(StageOrderError { stage: id, missing });
        }
        self.stages[id.position()].complete = true;
        self.completion_log.push(id);
        Ok(StageTransition::Completed)
    }

    #[must_use]
    pub fn is_complete(&self, id: StageId) -> bool {
        self.stages[id.position()].complete
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completion_log.len()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn all_complete(&self) -> bool {
        self.completed() == self.total()
    }

    /// Stages in the order they were completed.
    #[must_use]
    pub fn completion_log(&self) -> &[StageId] {
        &self.completion_log
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }
}
