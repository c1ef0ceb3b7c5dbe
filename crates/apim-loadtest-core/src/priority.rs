//! Request priorities and the simulated-user profiles that issue them.

use std::fmt;

/// Priority carried by a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Untagged traffic; the gateway treats it as high priority.
    High,
    /// Traffic tagged with `x-priority: low`.
    Low,
}

impl Priority {
    /// Header name used to tag low-priority requests.
    pub const HEADER: &'static str = "x-priority";

    /// Value of the priority header, if this priority sends one.
    #[must_use]
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::High => None,
            Self::Low => Some("low"),
        }
    }

    /// Label used in metrics and reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Profile of a simulated user: which priorities it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserKind {
    /// Only untagged requests.
    HighPriority,
    /// Only `x-priority: low` requests.
    LowPriority,
    /// High and low requests at a 1:1 ratio.
    Mixed,
}

impl UserKind {
    /// Priority of the request this user sends on its `iteration`-th loop.
    ///
    /// Mixed users alternate, starting with high priority, so any two
    /// consecutive iterations carry one request of each priority.
    #[must_use]
    pub fn priority_for(self, iteration: u64) -> Priority {
        match self {
            Self::HighPriority => Priority::High,
            Self::LowPriority => Priority::Low,
            Self::Mixed => {
                if iteration % 2 == 0 {
                    Priority::High
                } else {
                    Priority::Low
                }
            }
        }
    }

    /// Name used in logs and stage listings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::HighPriority => "HighPriorityUser",
            Self::LowPriority => "LowPriorityUser",
            Self::Mixed => "MixedUser_1_1",
        }
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
