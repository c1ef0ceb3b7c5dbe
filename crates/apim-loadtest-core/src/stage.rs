//! Stage schedules: time-boxed segments of load with fixed composition.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LoadTestError, LoadTestResult};
use crate::priority::UserKind;

/// One segment of a load test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Elapsed run time at which this stage ends (cumulative, not incremental).
    pub duration: Duration,

    /// Target number of concurrent simulated users.
    pub users: u32,

    /// Users started (or stopped) per second while converging.
    pub spawn_rate: u32,

    /// User kinds allowed to run during this stage.
    pub user_kinds: Vec<UserKind>,
}

impl Stage {
    pub fn new(duration_secs: u64, users: u32, spawn_rate: u32, user_kinds: Vec<UserKind>) -> Self {
        Self {
            duration: Duration::from_secs(duration_secs),
            users,
            spawn_rate,
            user_kinds,
        }
    }
}

/// Ordered, non-empty list of stages with strictly increasing durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSchedule {
    stages: Vec<Stage>,
}

impl StageSchedule {
    /// Builds a schedule, rejecting empty lists and non-increasing durations.
    pub fn new(stages: Vec<Stage>) -> LoadTestResult<Self> {
        if stages.is_empty() {
            return Err(LoadTestError::config("stage schedule must not be empty"));
        }

        for pair in stages.windows(2) {
            if pair[1].duration <= pair[0].duration {
                return Err(LoadTestError::config(format!(
                    "stage durations must be strictly increasing ({}s followed by {}s)",
                    pair[0].duration.as_secs(),
                    pair[1].duration.as_secs()
                )));
            }
        }

        if let Some(stage) = stages.iter().find(|s| s.user_kinds.is_empty()) {
            return Err(LoadTestError::config(format!(
                "stage ending at {}s has no user kinds",
                stage.duration.as_secs()
            )));
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Total run time covered by the schedule.
    pub fn total_duration(&self) -> Duration {
        self.stages
            .last()
            .map(|s| s.duration)
            .unwrap_or(Duration::ZERO)
    }

    /// Index of the first stage whose duration exceeds `elapsed`.
    pub fn index_at(&self, elapsed: Duration) -> Option<usize> {
        self.stages.iter().position(|s| elapsed < s.duration)
    }
}

/// Named schedule selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPattern {
    /// Alternate low-only, mixed and high-only traffic over ten minutes.
    Cycle,
    /// Constant low-priority load for five minutes.
    LowPriority,
}

impl LoadPattern {
    /// Builds the stage list for this pattern, using `ramp_rate` as every
    /// stage's spawn rate.
    pub fn schedule(self, ramp_rate: u32) -> StageSchedule {
        let stages = match self {
            Self::Cycle => vec![
                // Start with low priority
                Stage::new(120, 9, ramp_rate, vec![UserKind::LowPriority]),
                // Add high priority
                Stage::new(240, 18, ramp_rate, vec![UserKind::Mixed]),
                // Stop low priority
                Stage::new(360, 9, ramp_rate, vec![UserKind::HighPriority]),
                // Add low priority back in
                Stage::new(480, 18, ramp_rate, vec![UserKind::Mixed]),
                // Switch to only low priority
                Stage::new(600, 9, ramp_rate, vec![UserKind::LowPriority]),
            ],
            Self::LowPriority => vec![Stage::new(300, 9, ramp_rate, vec![UserKind::LowPriority])],
        };

        StageSchedule { stages }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cycle => "cycle",
            Self::LowPriority => "low-priority",
        }
    }
}

impl FromStr for LoadPattern {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cycle" => Ok(Self::Cycle),
            "low-priority" => Ok(Self::LowPriority),
            other => Err(LoadTestError::UnknownLoadPattern(other.to_string())),
        }
    }
}

impl fmt::Display for LoadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_pattern_stages() {
        let schedule = LoadPattern::Cycle.schedule(1);
        let durations: Vec<u64> = schedule.stages().iter().map(|s| s.duration.as_secs()).collect();
        let users: Vec<u32> = schedule.stages().iter().map(|s| s.users).collect();

        assert_eq!(durations, vec![120, 240, 360, 480, 600]);
        assert_eq!(users, vec![9, 18, 9, 18, 9]);
        assert_eq!(schedule.stages()[0].user_kinds, vec![UserKind::LowPriority]);
        assert_eq!(schedule.stages()[1].user_kinds, vec![UserKind::Mixed]);
        assert_eq!(schedule.stages()[2].user_kinds, vec![UserKind::HighPriority]);
        assert_eq!(schedule.total_duration(), Duration::from_secs(600));
    }

    #[test]
    fn test_low_priority_pattern_stages() {
        let schedule = LoadPattern::LowPriority.schedule(2);

        assert_eq!(schedule.len(), 1);
        let stage = &schedule.stages()[0];
        assert_eq!(stage.duration, Duration::from_secs(300));
        assert_eq!(stage.users, 9);
        assert_eq!(stage.spawn_rate, 2);
        assert_eq!(stage.user_kinds, vec![UserKind::LowPriority]);
    }

    #[test]
    fn test_ramp_rate_applies_to_every_stage() {
        let schedule = LoadPattern::Cycle.schedule(5);
        assert!(schedule.stages().iter().all(|s| s.spawn_rate == 5));
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!("cycle".parse::<LoadPattern>().unwrap(), LoadPattern::Cycle);
        assert_eq!(
            "low-priority".parse::<LoadPattern>().unwrap(),
            LoadPattern::LowPriority
        );

        let err = "spiky".parse::<LoadPattern>().unwrap_err();
        assert!(matches!(err, LoadTestError::UnknownLoadPattern(ref p) if p == "spiky"));
    }

    #[test]
    fn test_schedule_rejects_non_increasing_durations() {
        let result = StageSchedule::new(vec![
            Stage::new(60, 1, 1, vec![UserKind::HighPriority]),
            Stage::new(60, 2, 1, vec![UserKind::HighPriority]),
        ]);
        assert!(result.is_err());

        assert!(StageSchedule::new(Vec::new()).is_err());
    }

    #[test]
    fn test_schedule_rejects_stage_without_kinds() {
        let result = StageSchedule::new(vec![Stage::new(60, 1, 1, Vec::new())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_index_at() {
        let schedule = LoadPattern::Cycle.schedule(1);

        assert_eq!(schedule.index_at(Duration::ZERO), Some(0));
        assert_eq!(schedule.index_at(Duration::from_secs(119)), Some(0));
        assert_eq!(schedule.index_at(Duration::from_secs(120)), Some(1));
        assert_eq!(schedule.index_at(Duration::from_secs(599)), Some(4));
        assert_eq!(schedule.index_at(Duration::from_secs(600)), None);
    }
}
