use serde::{Deserialize, Serialize};

/// How precisely a projection's time is pinned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Exact,
    Day,
    Week,
    Month,
    /// No time at all; surfaced in reviews, never auto-expired.
    Someday,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Someday => write!(f, "someday"),
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "someday" => Ok(Self::Someday),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionStatus {
    Pending,
    Done,
    Cancelled,
    Passed,
}

impl ProjectionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Done => write!(f, "done"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Passed => write!(f, "passed"),
        }
    }
}

impl std::str::FromStr for ProjectionStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            "passed" => Ok(Self::Passed),
            other => Err(format!("unknown projection status: {other}")),
        }
    }
}

/// What state of the subject releases the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyCondition {
    Done,
    Cancelled,
    Passed,
    AnyTerminal,
}

impl DependencyCondition {
    pub fn matches(self, status: ProjectionStatus) -> bool {
        match self {
            Self::Done => status == ProjectionStatus::Done,
            Self::Cancelled => status == ProjectionStatus::Cancelled,
            Self::Passed => status == ProjectionStatus::Passed,
            Self::AnyTerminal => status.is_terminal(),
        }
    }
}

impl std::fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Passed => write!(f, "passed"),
            Self::AnyTerminal => write!(f, "any-terminal"),
        }
    }
}

impl std::str::FromStr for DependencyCondition {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            "passed" => Ok(Self::Passed),
            "any-terminal" => Ok(Self::AnyTerminal),
            other => Err(format!("unknown dependency condition: {other}")),
        }
    }
}

/// A typed record of a future-oriented commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    pub id: String,
    pub summary: String,
    /// Original free-text time phrase, kept for context.
    pub raw_when: Option<String>,
    /// Canonical `"YYYY-MM-DD HH:MM"` UTC or `"YYYY-MM-DD"`.
    pub resolved_when: Option<String>,
    pub resolution: Resolution,
    /// Cron expression for recurring commitments.
    pub recurrence: Option<String>,
    /// Keyword phrase matched against incoming facts.
    pub trigger_on_fact: Option<String>,
    pub context: Option<String>,
    /// Advisory links to related projections; not enforced.
    #[serde(default)]
    pub linked_ids: Vec<String>,
    pub status: ProjectionStatus,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

/// Input shape for `ProjectionStore::add`.
#[derive(Debug, Clone, Default)]
pub struct NewProjection {
    pub summary: String,
    pub raw_when: Option<String>,
    pub resolved_when: Option<String>,
    pub resolution: Option<Resolution>,
    pub recurrence: Option<String>,
    pub trigger_on_fact: Option<String>,
    pub context: Option<String>,
    pub linked_ids: Vec<String>,
    /// Dependencies created in the same transaction as the projection.
    pub depends_on: Vec<(String, DependencyCondition)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionDependency {
    pub observer_id: String,
    pub subject_id: String,
    pub condition: DependencyCondition,
}
