//! Load-shape driver: maps elapsed run time to the target the engine should
//! converge towards.

use std::time::Duration;

use tracing::info;

use crate::priority::UserKind;
use crate::stage::{Stage, StageSchedule};

/// Target load emitted on a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    /// Desired number of concurrent users.
    pub users: u32,

    /// Users started or stopped per second while converging.
    pub spawn_rate: u32,

    /// Kinds allowed to run; `None` leaves the kind mix unrestricted.
    pub user_kinds: Option<Vec<UserKind>>,
}

impl LoadTarget {
    /// Spawn rate used while draining users between stages.
    pub const DRAIN_SPAWN_RATE: u32 = 100;

    /// Throttle target that stops every running user.
    #[must_use]
    pub fn drain() -> Self {
        Self {
            users: 0,
            spawn_rate: Self::DRAIN_SPAWN_RATE,
            user_kinds: None,
        }
    }

    pub fn from_stage(stage: &Stage) -> Self {
        Self {
            users: stage.users,
            spawn_rate: stage.spawn_rate,
            user_kinds: Some(stage.user_kinds.clone()),
        }
    }

    pub fn is_drain(&self) -> bool {
        self.users == 0 && self.user_kinds.is_none()
    }
}

/// Result of polling a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeTick {
    /// Converge towards this target.
    Target(LoadTarget),
    /// The run is over; the engine should stop.
    Complete,
}

/// Decision function polled by the load engine on a fixed cadence.
pub trait LoadShape: Send {
    /// Target for the given elapsed run time.
    fn tick(&mut self, elapsed: Duration) -> ShapeTick;

    /// Human-readable summary for logs.
    fn description(&self) -> String;
}

/// Shape driven by a [`StageSchedule`].
///
/// Crossing into a new stage yields one [`LoadTarget::drain`] poll before the
/// new stage's own target, so users of kinds the new stage excludes are gone
/// before the new mix ramps up.
#[derive(Debug, Clone)]
pub struct StagesShape {
    schedule: StageSchedule,
    current: usize,
}

impl StagesShape {
    pub fn new(schedule: StageSchedule) -> Self {
        Self {
            schedule,
            current: 0,
        }
    }

    /// Index of the stage currently considered active.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_stage(&self) -> &Stage {
        &self.schedule.stages()[self.current]
    }

    pub fn schedule(&self) -> &StageSchedule {
        &self.schedule
    }
}

impl LoadShape for StagesShape {
    fn tick(&mut self, elapsed: Duration) -> ShapeTick {
        let Some(index) = self.schedule.index_at(elapsed) else {
            return ShapeTick::Complete;
        };

        if index != self.current {
            info!(
                "Stage transition {} -> {} at {}s, draining users",
                self.current + 1,
                index + 1,
                elapsed.as_secs()
            );
            self.current = index;
            return ShapeTick::Target(LoadTarget::drain());
        }

        ShapeTick::Target(LoadTarget::from_stage(self.current_stage()))
    }

    fn description(&self) -> String {
        let stages: Vec<String> = self
            .schedule
            .stages()
            .iter()
            .map(|s| {
                let kinds: Vec<&str> = s.user_kinds.iter().map(|k| k.name()).collect();
                format!(
                    "<{}s: {} users @{}/s [{}]",
                    s.duration.as_secs(),
                    s.users,
                    s.spawn_rate,
                    kinds.join(", ")
                )
            })
            .collect();
        format!("{} stage(s): {}", stages.len(), stages.join("; "))
    }
}
