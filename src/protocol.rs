//! IPC protocol types for daemon communication.
//!
//! One JSON object per line in each direction.

use crate::snapshot::SnapshotError;
use crate::store::StoreError;
use crate::types::{Dependency, Feature, Task, ValidationError};
use serde::{Deserialize, Serialize};

/// Request sent from client to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create a feature.
    AddFeature {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        enabled: Option<bool>,
    },

    /// Change a feature's description or enabled flag.
    UpdateFeature {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        clear_description: bool,
        #[serde(default)]
        enabled: Option<bool>,
    },

    /// Delete an unused feature.
    DeleteFeature { name: String },

    /// List features, optionally by enabled flag.
    ListFeatures {
        #[serde(default)]
        enabled: Option<bool>,
    },

    /// Create a task with optional initial dependencies.
    AddTask {
        name: String,
        description: String,
        #[serde(default)]
        details: Option<String>,
        #[serde(default)]
        priority: Option<i64>,
        #[serde(default)]
        feature_name: Option<String>,
        #[serde(default)]
        tests_required: Option<bool>,
        #[serde(default)]
        dependencies: Vec<String>,
    },

    /// Get a task by name.
    GetTask { name: String },

    /// Partially update a task. Status and priority travel loosely typed so
    /// that bad values come back as validation errors, not malformed requests.
    UpdateTask {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        details: Option<String>,
        #[serde(default)]
        clear_details: bool,
        #[serde(default)]
        priority: Option<i64>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        tests_required: Option<bool>,
        #[serde(default)]
        feature_name: Option<String>,
    },

    /// Delete a task and its edges.
    DeleteTask { name: String },

    /// Move a task to in_progress.
    StartTask { name: String },

    /// Move a task to completed.
    CompleteTask { name: String },

    /// Add an edge: `task_name` depends on `depends_on`.
    AddDependency { task_name: String, depends_on: String },

    /// Remove an edge.
    RemoveDependency { task_name: String, depends_on: String },

    /// List edges, optionally only those touching one task.
    ListDependencies {
        #[serde(default)]
        task_name: Option<String>,
    },

    /// List tasks with optional filters.
    ListTasks {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        min_priority: Option<i64>,
        #[serde(default)]
        feature_name: Option<String>,
    },

    /// Tasks that can be started now.
    Available,

    /// Current snapshot as text.
    Export,

    /// Shutdown the daemon.
    Shutdown,

    /// Ping to check if daemon is alive.
    Ping,
}

/// Machine-readable error category carried in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    DuplicateName,
    DuplicateEdge,
    SelfDependency,
    CircularDependency,
    Validation,
    InvalidTransition,
    FeatureInUse,
    Snapshot,
    Protocol,
    Internal,
}

impl ErrorKind {
    /// Classify an error by the domain error it carries.
    pub fn of(report: &eyre::Report) -> Self {
        if let Some(e) = report.downcast_ref::<StoreError>() {
            return match e {
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::DuplicateName { .. } => ErrorKind::DuplicateName,
                StoreError::DuplicateEdge { .. } => ErrorKind::DuplicateEdge,
                StoreError::SelfDependency(_) => ErrorKind::SelfDependency,
                StoreError::CircularDependency { .. } => ErrorKind::CircularDependency,
                StoreError::Validation(_) => ErrorKind::Validation,
                StoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
                StoreError::FeatureInUse { .. } => ErrorKind::FeatureInUse,
            };
        }
        if report.downcast_ref::<ValidationError>().is_some() {
            return ErrorKind::Validation;
        }
        if report.downcast_ref::<SnapshotError>().is_some() {
            return ErrorKind::Snapshot;
        }
        ErrorKind::Internal
    }
}

/// Response sent from daemon to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Feature { feature: Feature },

    Features { features: Vec<Feature> },

    Task { task: Task },

    Tasks { tasks: Vec<Task> },

    /// A freshly started task with the feature it belongs to.
    Started { task: Task, feature: Feature },

    Dependency { dependency: Dependency },

    Dependencies { dependencies: Vec<Dependency> },

    /// Whether a remove actually deleted an edge.
    Removed { removed: bool },

    /// Snapshot text.
    Snapshot { content: String },

    /// Task not found (for lookups that do not treat absence as an error).
    NotFound { name: String },

    /// Operation succeeded.
    Ok,

    /// Pong response to ping.
    Pong,

    /// Error response.
    Error { kind: ErrorKind, message: String },
}

impl Response {
    /// Create an error response.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Error response for a failed store call.
    pub fn from_report(report: &eyre::Report) -> Self {
        Self::error(ErrorKind::of(report), format!("{:#}", report))
    }
}
