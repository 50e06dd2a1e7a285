//! Core data types for the task graph.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of task and feature names, in characters.
pub const MAX_NAME_LEN: usize = 55;

/// Highest allowed priority (0 = lowest).
pub const MAX_PRIORITY: u8 = 10;

/// Feature that tasks belong to unless told otherwise. Always present.
pub const DEFAULT_FEATURE: &str = "misc";

/// Current time as an RFC 3339 UTC string with microsecond precision.
///
/// The fixed width keeps lexicographic order equal to chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A named grouping of tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feature {
    /// Unique name, at most 55 characters
    pub name: String,

    /// Free-form description
    pub description: Option<String>,

    /// Whether the feature is active
    pub enabled: bool,

    pub created_at: String,
    pub updated_at: String,
}

/// A node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// Unique, immutable name (primary key)
    pub name: String,

    /// Short description of the work
    pub description: String,

    /// Optional long-form details / specification
    pub details: Option<String>,

    /// Owning feature
    pub feature_name: String,

    /// Priority 0-10 (10 = most important)
    pub priority: u8,

    /// Whether the work must ship with tests
    pub tests_required: bool,

    /// Current state
    pub status: Status,

    pub created_at: String,
    pub updated_at: String,

    /// Set when the task enters in_progress, cleared when reset to pending
    pub started_at: Option<String>,

    /// Set only while the task is completed
    pub completed_at: Option<String>,
}

/// Directed edge: `task_name` cannot start until `depends_on_task_name` is completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    pub task_name: String,
    pub depends_on_task_name: String,
}

impl Dependency {
    pub fn new(task_name: impl Into<String>, depends_on_task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            depends_on_task_name: depends_on_task_name.into(),
        }
    }
}

/// Task status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Pending, Status::InProgress, Status::Completed, Status::Blocked];

    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Blocked => "blocked",
        }
    }

    /// Check if a status transition is legal for the guarded verbs
    /// (`start_task` / `complete_task`).
    pub fn can_transition_to(&self, target: &Status) -> bool {
        use Status::*;
        match (self, target) {
            // Same status = no-op, allowed
            (a, b) if a == b => true,

            // Blocked is reachable from anywhere
            (_, Blocked) => true,

            // Reset to pending is always possible
            (_, Pending) => true,

            (Pending, InProgress) => true,
            (Blocked, InProgress) => true,

            (InProgress, Completed) => true,

            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "in_progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            "blocked" => Ok(Status::Blocked),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}

/// Validation errors for field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyName,
    NameTooLong(String),
    InvalidCharacters(String),
    EmptyDescription,
    EmptyDetails,
    InvalidPriority(i64),
    InvalidStatus(String),
    CompletedAtMismatch,
    StartedAtMismatch(Status),
    ProtectedFeature(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyName => write!(f, "name cannot be empty"),
            ValidationError::NameTooLong(name) => {
                write!(f, "name '{}' exceeds {} characters", name, MAX_NAME_LEN)
            }
            ValidationError::InvalidCharacters(name) => {
                write!(f, "name '{}' contains control characters", name.escape_debug())
            }
            ValidationError::EmptyDescription => write!(f, "description cannot be empty"),
            ValidationError::EmptyDetails => write!(f, "details cannot be empty when provided"),
            ValidationError::InvalidPriority(p) => {
                write!(f, "priority {} out of range, must be 0-{}", p, MAX_PRIORITY)
            }
            ValidationError::InvalidStatus(s) => write!(
                f,
                "invalid status '{}', must be one of: pending, in_progress, completed, blocked",
                s
            ),
            ValidationError::CompletedAtMismatch => {
                write!(f, "completed_at must be set exactly when status is completed")
            }
            ValidationError::StartedAtMismatch(Status::Pending) => {
                write!(f, "a pending task cannot have started_at set")
            }
            ValidationError::StartedAtMismatch(status) => {
                write!(f, "a {} task must have started_at set", status)
            }
            ValidationError::ProtectedFeature(name) => {
                write!(f, "the '{}' feature cannot be deleted", name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Names: required, 1-55 chars, no control characters.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong(name.to_string()));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters(name.to_string()));
    }
    Ok(())
}

pub fn validate_priority(priority: u8) -> Result<(), ValidationError> {
    if priority > MAX_PRIORITY {
        return Err(ValidationError::InvalidPriority(priority.into()));
    }
    Ok(())
}

/// Priorities arriving as plain integers, e.g. over the daemon protocol.
pub fn priority_from_i64(priority: i64) -> Result<u8, ValidationError> {
    u8::try_from(priority)
        .ok()
        .filter(|p| *p <= MAX_PRIORITY)
        .ok_or(ValidationError::InvalidPriority(priority))
}

pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    if description.trim().is_empty() {
        return Err(ValidationError::EmptyDescription);
    }
    Ok(())
}

pub fn validate_details(details: Option<&str>) -> Result<(), ValidationError> {
    match details {
        Some(d) if d.trim().is_empty() => Err(ValidationError::EmptyDetails),
        _ => Ok(()),
    }
}

impl Task {
    /// Validate the task's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        validate_description(&self.description)?;
        validate_details(self.details.as_deref())?;
        validate_priority(self.priority)?;
        validate_name(&self.feature_name)?;

        if self.completed_at.is_some() != (self.status == Status::Completed) {
            return Err(ValidationError::CompletedAtMismatch);
        }
        match self.status {
            Status::Pending if self.started_at.is_some() => {
                return Err(ValidationError::StartedAtMismatch(Status::Pending));
            }
            Status::InProgress if self.started_at.is_none() => {
                return Err(ValidationError::StartedAtMismatch(Status::InProgress));
            }
            _ => {}
        }

        Ok(())
    }
}

impl Feature {
    /// Validate the feature's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)
    }
}

/// Parameters for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub details: Option<String>,
    pub priority: u8,
    pub feature_name: String,
    pub tests_required: bool,
    pub dependencies: Vec<String>,
}

impl NewTask {
    /// Create a new task with the required fields and defaults for the rest.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            details: None,
            priority: 0,
            feature_name: DEFAULT_FEATURE.to_string(),
            tests_required: true,
            dependencies: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn feature(mut self, feature_name: impl Into<String>) -> Self {
        self.feature_name = feature_name.into();
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn tests_required(mut self, tests_required: bool) -> Self {
        self.tests_required = tests_required;
        self
    }

    /// Add a task this one depends on.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// Partial update for a task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub description: Option<String>,
    /// `Some(None)` clears the details
    pub details: Option<Option<String>>,
    pub priority: Option<u8>,
    pub status: Option<Status>,
    pub tests_required: Option<bool>,
    pub feature_name: Option<String>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn details(mut self, details: Option<String>) -> Self {
        self.details = Some(details);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn tests_required(mut self, tests_required: bool) -> Self {
        self.tests_required = Some(tests_required);
        self
    }

    pub fn feature(mut self, feature_name: impl Into<String>) -> Self {
        self.feature_name = Some(feature_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Partial update for a feature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeaturePatch {
    pub description: Option<Option<String>>,
    pub enabled: Option<bool>,
}

/// Filters for listing tasks. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub min_priority: Option<u8>,
    pub feature_name: Option<String>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status.
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by minimum priority (inclusive).
    pub fn min_priority(mut self, priority: u8) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Filter by feature name.
    pub fn feature(mut self, feature_name: impl Into<String>) -> Self {
        self.feature_name = Some(feature_name.into());
        self
    }
}
