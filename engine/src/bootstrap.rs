//! Staged session bootstrap.
//!
//! # Stages
//!
//! 1. Identity, retried without limit
//! 2. Menu, notification count, roster and energy, concurrently
//! 3. Selection of the active entity from the roster (not a tracked stage)
//! 4. Characteristics, scene assets and interactions of that entity,
//!    concurrently
//!
//! Any bounded stage running out of attempts halts the whole bootstrap; there
//! is no partially booted session.
//!
//! # Teardown
//!
//! The [`Teardown`] flag is checked before every commit and between retry
//! attempts. Once it is set nothing else is committed or reported and
//! [`Bootstrap::run`] returns [`BootOutcome::TornDown`]. A call already on the
//! wire is left to finish; only its result is dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tavern_net::{GameApi, RetryError, RetryPolicy, TransportError, run_with_retry_while};
use tavern_types::{
    AccountState, BootSession, DeviceProfile, EntityId, EntityState, StageBoard, StageId,
    StageOrderError, StageTransition,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::selection::{SelectionError, resolve_selection};
use crate::{Teardown, payload};

/// Retry policies for the two kinds of stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPolicies {
    /// Must be unbounded: the session cannot exist without an identity.
    pub identity: RetryPolicy,
    /// Shared by every stage after identity.
    pub calls: RetryPolicy,
}

impl Default for BootPolicies {
    fn default() -> Self {
        Self {
            identity: RetryPolicy::unbounded(Duration::from_secs(10), Duration::from_secs(2)),
            calls: RetryPolicy::default(),
        }
    }
}

/// Progress notifications for whoever renders the loading screen.
#[derive(Debug, Clone, PartialEq)]
pub enum BootEvent {
    StageCompleted {
        stage: StageId,
        attempts: u32,
        completed: usize,
        total: usize,
    },
    SelectionResolved {
        entity: EntityId,
    },
    Ready,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("bootstrap halted at {stage}: {source}")]
    Terminal {
        stage: StageId,
        #[source]
        source: RetryError,
    },
    #[error("cannot select an entity: {0}")]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Ordering(#[from] StageOrderError),
}

impl BootError {
    /// The stage the failure is attributed to, if any.
    #[must_use]
    pub const fn stage(&self) -> Option<StageId> {
        match self {
            Self::Terminal { stage, .. } | Self::Ordering(StageOrderError { stage, .. }) => {
                Some(*stage)
            }
            Self::Selection(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BootOutcome {
    Ready(Box<BootSession>),
    /// Teardown was signalled before the bootstrap finished.
    TornDown,
}

/// Consumer-facing view of a bootstrap: never partially ready.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BootState {
    #[default]
    Loading,
    Ready(Box<BootSession>),
    Failed(BootError),
}

impl BootState {
    /// The state a finished bootstrap leaves behind. `None` after teardown,
    /// when there is no view left to update.
    #[must_use]
    pub fn settle(result: Result<BootOutcome, BootError>) -> Option<Self> {
        match result {
            Ok(BootOutcome::Ready(session)) => Some(Self::Ready(session)),
            Ok(BootOutcome::TornDown) => None,
            Err(err) => Some(Self::Failed(err)),
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&BootSession> {
        match self {
            Self::Ready(session) => Some(session),
            Self::Loading | Self::Failed(_) => None,
        }
    }
}

/// Why the stage pipeline stopped short of a session.
enum Halt {
    TornDown,
    Failed(BootError),
}

impl From<BootError> for Halt {
    fn from(err: BootError) -> Self {
        Self::Failed(err)
    }
}

/// Stage flags plus the teardown check, shared by every stage of one run.
struct Progress {
    board: Mutex<StageBoard>,
    teardown: Teardown,
    events: Option<mpsc::UnboundedSender<BootEvent>>,
}

impl Progress {
    fn new(teardown: Teardown, events: Option<mpsc::UnboundedSender<BootEvent>>) -> Self {
        Self {
            board: Mutex::new(StageBoard::new()),
            teardown,
            events,
        }
    }

    fn is_live(&self) -> bool {
        !self.teardown.is_fired()
    }

    fn ensure_live(&self) -> Result<(), Halt> {
        if self.is_live() {
            Ok(())
        } else {
            Err(Halt::TornDown)
        }
    }

    fn emit(&self, event: BootEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching any more.
            let _ = events.send(event);
        }
    }

    fn commit(&self, stage: StageId, attempts: u32) -> Result<(), Halt> {
        self.ensure_live()?;

        let (completed, total) = {
            let mut board = self.board.lock().unwrap_or_else(PoisonError::into_inner);
            match board.complete(stage).map_err(BootError::from)? {
                StageTransition::AlreadyComplete => return Ok(()),
                StageTransition::Completed => (board.completed(), board.total()),
            }
        };

        tracing::info!(stage = %stage, attempts, completed, total, "Stage complete");
        self.emit(BootEvent::StageCompleted {
            stage,
            attempts,
            completed,
            total,
        });
        Ok(())
    }
}

/// Orchestrates the staged bootstrap against a [`GameApi`].
pub struct Bootstrap {
    api: Arc<dyn GameApi>,
    device: DeviceProfile,
    policies: BootPolicies,
    clock: fn() -> i64,
}

fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Bootstrap {
    #[must_use]
    pub fn new(api: Arc<dyn GameApi>, device: DeviceProfile, policies: BootPolicies) -> Self {
        Self {
            api,
            device,
            policies,
            clock: unix_millis,
        }
    }

    /// Replace the millisecond clock used to cache-bust scene image URLs.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn policies(&self) -> &BootPolicies {
        &self.policies
    }

    /// Run every stage to completion, to the first terminal failure, or until
    /// `teardown` fires.
    ///
    /// Progress is reported on `events` when given. Nothing is sent after
    /// teardown.
    pub async fn run(
        &self,
        teardown: &Teardown,
        events: Option<mpsc::UnboundedSender<BootEvent>>,
    ) -> Result<BootOutcome, BootError> {
        let progress = Progress::new(teardown.clone(), events);
        tracing::info!(device = %self.device.device_user_id, "Bootstrap starting");

        let result = self
            .drive(&progress)
            .await
            .and_then(|session| progress.ensure_live().map(|()| session));

        match result {
            Ok(session) => {
                tracing::info!(
                    user = %session.user_id(),
                    entity = %session.selected_entity(),
                    "Bootstrap ready"
                );
                progress.emit(BootEvent::Ready);
                Ok(BootOutcome::Ready(Box::new(session)))
            }
            Err(Halt::TornDown) => {
                tracing::info!("Bootstrap torn down, discarding results");
                Ok(BootOutcome::TornDown)
            }
            Err(Halt::Failed(err)) if !progress.is_live() => {
                tracing::info!(error = %err, "Bootstrap torn down, discarding failure");
                Ok(BootOutcome::TornDown)
            }
            Err(Halt::Failed(err)) => {
                tracing::error!(error = %err, "Bootstrap failed");
                progress.emit(BootEvent::Failed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn drive(&self, progress: &Progress) -> Result<BootSession, Halt> {
        let api = self.api.as_ref();
        let calls = &self.policies.calls;

        let identity = self
            .stage(
                progress,
                StageId::Identity,
                &self.policies.identity,
                || api.identify(&self.device),
                payload::identity,
            )
            .await?;
        let user = identity.user_id;
        tracing::debug!(
            user = %user,
            entities = identity.entity_ids.len(),
            new_user = identity.is_new_user,
            "Identity established"
        );

        let (menu, notification_count, roster, energy) = tokio::try_join!(
            self.stage(progress, StageId::Menu, calls, || api.menu(user), payload::menu),
            self.stage(
                progress,
                StageId::Notifications,
                calls,
                || api.notification_count(user),
                payload::notification_count,
            ),
            self.stage(progress, StageId::Roster, calls, || api.roster(user), payload::roster),
            self.stage(progress, StageId::Energy, calls, || api.energy(user), payload::energy),
        )?;

        let entity = resolve_selection(&roster).map_err(BootError::from)?;
        progress.ensure_live()?;
        tracing::info!(entity = %entity, roster = roster.len(), "Entity selected");
        progress.emit(BootEvent::SelectionResolved { entity });

        let clock = self.clock;
        let (characteristics, scene, interactions) = tokio::try_join!(
            self.stage(
                progress,
                StageId::Characteristics,
                calls,
                || api.characteristics(entity),
                payload::characteristics,
            ),
            self.stage(
                progress,
                StageId::Scene,
                calls,
                || api.scene_assets(entity),
                |value| payload::scene_assets(value).map(|scene| scene.cache_busted(clock())),
            ),
            self.stage(
                progress,
                StageId::Interactions,
                calls,
                || api.interactions(entity),
                payload::interactions,
            ),
        )?;

        Ok(BootSession {
            identity,
            account: AccountState {
                menu,
                notification_count,
                roster,
                energy,
            },
            selected: EntityState {
                entity,
                characteristics,
                scene,
                interactions,
            },
        })
    }

    /// One tracked stage: retry until validated, then commit.
    async fn stage<U, Op, Fut, V>(
        &self,
        progress: &Progress,
        stage: StageId,
        policy: &RetryPolicy,
        operation: Op,
        validate: V,
    ) -> Result<U, Halt>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, TransportError>>,
        V: Fn(Value) -> Result<U, String>,
    {
        progress.ensure_live()?;

        let validated = run_with_retry_while(
            stage.label(),
            policy,
            || progress.is_live(),
            operation,
            validate,
        )
        .await
        .map_err(|source| match source {
            RetryError::Stopped { .. } => Halt::TornDown,
            source @ RetryError::Exhausted { .. } => {
                Halt::Failed(BootError::Terminal { stage, source })
            }
        })?;

        progress.commit(stage, validated.attempts)?;
        Ok(validated.value)
    }
}
