//! High-level store API for the task graph.
//!
//! Every mutation runs in one `IMMEDIATE` transaction: validation, the
//! cycle check and the write all see the same state, and any error rolls the
//! whole operation back.

use crate::availability;
use crate::cycle;
use crate::storage::{self, Storage};
use crate::transition::transition;
use crate::types::{
    DEFAULT_FEATURE, Dependency, Feature, FeaturePatch, NewTask, Status, Task, TaskFilter, TaskPatch, ValidationError,
    now_timestamp, validate_description, validate_details, validate_name, validate_priority,
};
use eyre::{Context, Result};
use log::debug;
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of record a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Task,
    Feature,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Task => f.write_str("task"),
            Entity::Feature => f.write_str("feature"),
        }
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced name does not exist.
    NotFound { entity: Entity, name: String },
    /// Name already taken.
    DuplicateName { entity: Entity, name: String },
    /// Edge already present.
    DuplicateEdge { task: String, depends_on: String },
    /// A task cannot depend on itself.
    SelfDependency(String),
    /// The edge would close this cycle (first and last element are equal).
    CircularDependency { path: Vec<String> },
    /// Bad field value.
    Validation(ValidationError),
    /// Status change not allowed for this verb.
    InvalidTransition { name: String, from: Status, to: Status },
    /// Feature still referenced by tasks.
    FeatureInUse { name: String, tasks: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { entity, name } => write!(f, "{} not found: {}", entity, name),
            StoreError::DuplicateName { entity, name } => {
                write!(f, "{} with name '{}' already exists", entity, name)
            }
            StoreError::DuplicateEdge { task, depends_on } => {
                write!(f, "dependency {} -> {} already exists", task, depends_on)
            }
            StoreError::SelfDependency(name) => write!(f, "task '{}' cannot depend on itself", name),
            StoreError::CircularDependency { path } => {
                write!(f, "circular dependency: {}", path.join(" -> "))
            }
            StoreError::Validation(e) => write!(f, "validation error: {}", e),
            StoreError::InvalidTransition { name, from, to } => {
                write!(f, "task '{}' cannot move from {} to {}", name, from, to)
            }
            StoreError::FeatureInUse { name, tasks } => {
                write!(f, "feature '{}' is still used by {} task(s)", name, tasks)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::Validation(e)
    }
}

fn invalid(e: ValidationError) -> eyre::Report {
    eyre::eyre!(StoreError::Validation(e))
}

fn task_not_found(name: &str) -> eyre::Report {
    eyre::eyre!(StoreError::NotFound {
        entity: Entity::Task,
        name: name.to_string(),
    })
}

fn feature_not_found(name: &str) -> eyre::Report {
    eyre::eyre!(StoreError::NotFound {
        entity: Entity::Feature,
        name: name.to_string(),
    })
}

/// The task graph store.
pub struct Store {
    storage: Storage,
    auto_export: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let storage = Storage::open(path)?;
        Ok(Self {
            storage,
            auto_export: None,
        })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let storage = Storage::open_in_memory()?;
        Ok(Self {
            storage,
            auto_export: None,
        })
    }

    /// Rewrite the snapshot at `path` after every committed mutation.
    pub fn with_auto_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.auto_export = Some(path.into());
        self
    }

    pub fn auto_export_path(&self) -> Option<&Path> {
        self.auto_export.as_deref()
    }

    /// Path of the backing database file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.storage.path()
    }

    /// Close the store.
    pub fn close(self) -> Result<()> {
        self.storage.close()
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Hook run after each successful commit.
    pub(crate) fn after_commit(&self) {
        if let Some(path) = &self.auto_export
            && let Err(e) = self.export_to_path(path)
        {
            log::warn!("Snapshot export to {} failed: {:#}", path.display(), e);
        }
    }

    // -----------------------------------------------------------------------
    // Features
    // -----------------------------------------------------------------------

    /// Create a feature.
    pub fn add_feature(&mut self, name: &str, description: Option<&str>, enabled: bool) -> Result<Feature> {
        validate_name(name).map_err(invalid)?;

        let now = now_timestamp();
        let feature = Feature {
            name: name.to_string(),
            description: description.map(String::from),
            enabled,
            created_at: now.clone(),
            updated_at: now,
        };

        let tx = self.storage.begin_write()?;
        if storage::feature_exists(&tx, name)? {
            return Err(eyre::eyre!(StoreError::DuplicateName {
                entity: Entity::Feature,
                name: name.to_string(),
            }));
        }
        storage::insert_feature(&tx, &feature).context("Failed to persist feature")?;
        tx.commit().context("Failed to commit feature")?;

        debug!("Added feature {}", name);
        self.after_commit();
        Ok(feature)
    }

    /// Get a feature by name.
    pub fn get_feature(&self, name: &str) -> Result<Option<Feature>> {
        storage::get_feature(self.storage.conn(), name)
    }

    /// List features ordered by name, optionally only enabled/disabled ones.
    pub fn list_features(&self, enabled: Option<bool>) -> Result<Vec<Feature>> {
        storage::list_features(self.storage.conn(), enabled)
    }

    /// Update a feature's description or enabled flag.
    pub fn update_feature(&mut self, name: &str, patch: FeaturePatch) -> Result<Feature> {
        let tx = self.storage.begin_write()?;
        let existing = storage::get_feature(&tx, name)?.ok_or_else(|| feature_not_found(name))?;

        let mut updated = existing.clone();
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        if updated == existing {
            return Ok(existing);
        }

        updated.updated_at = now_timestamp();
        storage::update_feature_row(&tx, &updated).context("Failed to persist feature")?;
        tx.commit().context("Failed to commit feature update")?;

        debug!("Updated feature {}", name);
        self.after_commit();
        Ok(updated)
    }

    /// Delete a feature. Rejected for the default feature and while any task
    /// still belongs to it.
    pub fn delete_feature(&mut self, name: &str) -> Result<()> {
        if name == DEFAULT_FEATURE {
            return Err(invalid(ValidationError::ProtectedFeature(name.to_string())));
        }

        let tx = self.storage.begin_write()?;
        if !storage::feature_exists(&tx, name)? {
            return Err(feature_not_found(name));
        }
        let tasks = storage::count_tasks_in_feature(&tx, name)?;
        if tasks > 0 {
            return Err(eyre::eyre!(StoreError::FeatureInUse {
                name: name.to_string(),
                tasks,
            }));
        }
        storage::delete_feature_row(&tx, name)?;
        tx.commit().context("Failed to commit feature deletion")?;

        debug!("Deleted feature {}", name);
        self.after_commit();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Create a task together with its initial dependencies.
    ///
    /// The task and all of its edges commit together or not at all.
    pub fn add_task(&mut self, new_task: NewTask) -> Result<Task> {
        validate_name(&new_task.name).map_err(invalid)?;
        validate_description(&new_task.description).map_err(invalid)?;
        validate_details(new_task.details.as_deref()).map_err(invalid)?;
        validate_priority(new_task.priority).map_err(invalid)?;
        validate_name(&new_task.feature_name).map_err(invalid)?;

        let now = now_timestamp();
        let task = Task {
            name: new_task.name,
            description: new_task.description,
            details: new_task.details,
            feature_name: new_task.feature_name,
            priority: new_task.priority,
            tests_required: new_task.tests_required,
            status: Status::Pending,
            created_at: now.clone(),
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        let tx = self.storage.begin_write()?;
        if storage::task_exists(&tx, &task.name)? {
            return Err(eyre::eyre!(StoreError::DuplicateName {
                entity: Entity::Task,
                name: task.name.clone(),
            }));
        }
        if !storage::feature_exists(&tx, &task.feature_name)? {
            return Err(feature_not_found(&task.feature_name));
        }
        storage::insert_task(&tx, &task).context("Failed to persist task")?;
        for dep in &new_task.dependencies {
            insert_dependency(&tx, &task.name, dep)?;
        }
        tx.commit().context("Failed to commit task")?;

        debug!("Added task {} ({} dependencies)", task.name, new_task.dependencies.len());
        self.after_commit();
        Ok(task)
    }

    /// Get a task by name.
    pub fn get_task(&self, name: &str) -> Result<Option<Task>> {
        storage::get_task(self.storage.conn(), name)
    }

    /// List tasks matching the filter, highest priority first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        storage::list_tasks(self.storage.conn(), filter)
    }

    /// Apply the provided fields of `patch` to a task.
    ///
    /// Status changes go through [`transition`] for their timestamp effects.
    /// This is the administrative path: any status may be set. A patch that
    /// changes nothing leaves the task (and its `updated_at`) untouched.
    pub fn update_task(&mut self, name: &str, patch: TaskPatch) -> Result<Task> {
        if let Some(description) = &patch.description {
            validate_description(description).map_err(invalid)?;
        }
        if let Some(details) = &patch.details {
            validate_details(details.as_deref()).map_err(invalid)?;
        }
        if let Some(priority) = patch.priority {
            validate_priority(priority).map_err(invalid)?;
        }
        if let Some(feature_name) = &patch.feature_name {
            validate_name(feature_name).map_err(invalid)?;
        }

        let tx = self.storage.begin_write()?;
        let existing = storage::get_task(&tx, name)?.ok_or_else(|| task_not_found(name))?;

        let now = now_timestamp();
        let mut updated = existing.clone();

        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(details) = patch.details {
            updated.details = details;
        }
        if let Some(priority) = patch.priority {
            updated.priority = priority;
        }
        if let Some(tests_required) = patch.tests_required {
            updated.tests_required = tests_required;
        }
        if let Some(feature_name) = patch.feature_name
            && feature_name != existing.feature_name
        {
            if !storage::feature_exists(&tx, &feature_name)? {
                return Err(feature_not_found(&feature_name));
            }
            updated.feature_name = feature_name;
        }
        if let Some(status) = patch.status {
            transition(existing.status, status).apply(&mut updated, status, &now);
        }

        if updated == existing {
            return Ok(existing);
        }

        updated.updated_at = now;
        updated.validate().map_err(invalid)?;
        storage::update_task_row(&tx, &updated).context("Failed to persist task update")?;
        tx.commit().context("Failed to commit task update")?;

        debug!("Updated task {}", name);
        self.after_commit();
        Ok(updated)
    }

    /// Move a pending or blocked task to in_progress.
    pub fn start_task(&mut self, name: &str) -> Result<Task> {
        self.guarded_status_change(name, Status::InProgress)
    }

    /// Move an in_progress task to completed.
    pub fn complete_task(&mut self, name: &str) -> Result<Task> {
        self.guarded_status_change(name, Status::Completed)
    }

    fn guarded_status_change(&mut self, name: &str, to: Status) -> Result<Task> {
        let tx = self.storage.begin_write()?;
        let existing = storage::get_task(&tx, name)?.ok_or_else(|| task_not_found(name))?;

        let from = existing.status;
        if from == to || !from.can_transition_to(&to) {
            return Err(eyre::eyre!(StoreError::InvalidTransition {
                name: name.to_string(),
                from,
                to,
            }));
        }

        let now = now_timestamp();
        let mut updated = existing;
        transition(from, to).apply(&mut updated, to, &now);
        updated.updated_at = now;
        storage::update_task_row(&tx, &updated).context("Failed to persist status change")?;
        tx.commit().context("Failed to commit status change")?;

        debug!("Task {} moved from {} to {}", name, from, to);
        self.after_commit();
        Ok(updated)
    }

    /// Delete a task and every dependency edge touching it.
    pub fn delete_task(&mut self, name: &str) -> Result<()> {
        let tx = self.storage.begin_write()?;
        if !storage::delete_task_row(&tx, name)? {
            return Err(task_not_found(name));
        }
        tx.commit().context("Failed to commit task deletion")?;

        debug!("Deleted task {}", name);
        self.after_commit();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dependencies
    // -----------------------------------------------------------------------

    /// Record that `task_name` cannot start until `depends_on` is completed.
    pub fn add_dependency(&mut self, task_name: &str, depends_on: &str) -> Result<Dependency> {
        let tx = self.storage.begin_write()?;
        insert_dependency(&tx, task_name, depends_on)?;
        tx.commit().context("Failed to commit dependency")?;

        debug!("Added dependency {} -> {}", task_name, depends_on);
        self.after_commit();
        Ok(Dependency::new(task_name, depends_on))
    }

    /// Remove an edge. Returns `false` if the two tasks exist but were not
    /// linked.
    pub fn remove_dependency(&mut self, task_name: &str, depends_on: &str) -> Result<bool> {
        let tx = self.storage.begin_write()?;
        for name in [task_name, depends_on] {
            if !storage::task_exists(&tx, name)? {
                return Err(task_not_found(name));
            }
        }
        let removed = storage::delete_edge(&tx, task_name, depends_on)?;
        tx.commit().context("Failed to commit dependency removal")?;

        if removed {
            debug!("Removed dependency {} -> {}", task_name, depends_on);
            self.after_commit();
        }
        Ok(removed)
    }

    /// List edges, optionally only those touching `task_name`.
    pub fn list_dependencies(&self, task_name: Option<&str>) -> Result<Vec<Dependency>> {
        storage::list_edges(self.storage.conn(), task_name)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Tasks that can be started now.
    pub fn available_tasks(&self) -> Result<Vec<Task>> {
        availability::available_tasks(self.storage.conn())
    }

    /// Unfinished direct dependencies of a task.
    pub fn unmet_dependencies(&self, name: &str) -> Result<Vec<(String, Status)>> {
        let tx = self.storage.begin_read()?;
        if !storage::task_exists(&tx, name)? {
            return Err(task_not_found(name));
        }
        availability::unmet_dependencies(&tx, name)
    }

    /// True when there are no tasks and no features besides the default.
    pub fn is_empty(&self) -> Result<bool> {
        let tx = self.storage.begin_read()?;
        storage::is_empty(&tx)
    }

    /// Delete every task, edge and feature, keeping the default feature.
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.storage.begin_write()?;
        storage::clear_all(&tx)?;
        storage::ensure_default_feature(&tx)?;
        tx.commit().context("Failed to commit reset")?;

        debug!("Store reset");
        self.after_commit();
        Ok(())
    }
}

/// Insert one edge after every check, inside the caller's transaction.
pub(crate) fn insert_dependency(conn: &Connection, task_name: &str, depends_on: &str) -> Result<()> {
    for name in [task_name, depends_on] {
        if !storage::task_exists(conn, name)? {
            return Err(task_not_found(name));
        }
    }
    if task_name == depends_on {
        return Err(eyre::eyre!(StoreError::SelfDependency(task_name.to_string())));
    }
    if storage::edge_exists(conn, task_name, depends_on)? {
        return Err(eyre::eyre!(StoreError::DuplicateEdge {
            task: task_name.to_string(),
            depends_on: depends_on.to_string(),
        }));
    }
    if let Some(path) = cycle::check_edge(conn, task_name, depends_on)? {
        return Err(eyre::eyre!(StoreError::CircularDependency { path }));
    }
    storage::insert_edge(conn, task_name, depends_on).context("Failed to persist dependency")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn store_error(report: &eyre::Report) -> &StoreError {
        report.downcast_ref::<StoreError>().expect("expected a StoreError")
    }

    #[test]
    fn test_add_and_get_task() {
        let mut store = setup_test_store();

        let task = store
            .add_task(NewTask::new("login", "Implement login").priority(7).details("Use OAuth"))
            .unwrap();

        assert_eq!(task.name, "login");
        assert_eq!(task.priority, 7);
        assert_eq!(task.status, Status::Pending);
        assert_eq!(task.feature_name, DEFAULT_FEATURE);
        assert!(task.tests_required);
        assert_eq!(task.started_at, None);

        let retrieved = store.get_task("login").unwrap().unwrap();
        assert_eq!(retrieved, task);
    }

    #[test]
    fn test_add_task_rejects_duplicates_and_bad_values() {
        let mut store = setup_test_store();
        store.add_task(NewTask::new("a", "first")).unwrap();

        let err = store.add_task(NewTask::new("a", "again")).unwrap_err();
        assert!(matches!(store_error(&err), StoreError::DuplicateName { entity: Entity::Task, .. }));

        let err = store.add_task(NewTask::new("b", "desc").priority(11)).unwrap_err();
        assert_eq!(
            store_error(&err),
            &StoreError::Validation(ValidationError::InvalidPriority(11))
        );

        let err = store.add_task(NewTask::new("c", "desc").feature("ghost")).unwrap_err();
        assert!(matches!(store_error(&err), StoreError::NotFound { entity: Entity::Feature, .. }));

        let err = store.add_task(NewTask::new("d", " ")).unwrap_err();
        assert!(matches!(store_error(&err), StoreError::Validation(_)));
    }

    #[test]
    fn test_add_task_with_dependencies_is_atomic() {
        let mut store = setup_test_store();
        store.add_task(NewTask::new("a", "a")).unwrap();

        let err = store
            .add_task(NewTask::new("b", "b").depends_on("a").depends_on("missing"))
            .unwrap_err();
        assert!(matches!(store_error(&err), StoreError::NotFound { .. }));
        assert!(store.get_task("b").unwrap().is_none());
        assert!(store.list_dependencies(None).unwrap().is_empty());

        store.add_task(NewTask::new("b", "b").depends_on("a")).unwrap();
        assert_eq!(store.list_dependencies(None).unwrap(), vec![Dependency::new("b", "a")]);
    }

    #[test]
    fn test_update_task_applies_only_provided_fields() {
        let mut store = setup_test_store();
        let original = store.add_task(NewTask::new("a", "desc").priority(2)).unwrap();

        let updated = store.update_task("a", TaskPatch::new().priority(9)).unwrap();
        assert_eq!(updated.priority, 9);
        assert_eq!(updated.description, "desc");
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at >= original.updated_at);

        let cleared = store
            .update_task("a", TaskPatch::new().details(Some("more".to_string())))
            .unwrap();
        assert_eq!(cleared.details.as_deref(), Some("more"));
        let cleared = store.update_task("a", TaskPatch::new().details(None)).unwrap();
        assert_eq!(cleared.details, None);
    }

    #[test]
    fn test_noop_update_keeps_updated_at() {
        let mut store = setup_test_store();
        let original = store.add_task(NewTask::new("a", "desc").priority(2)).unwrap();

        let same = store
            .update_task("a", TaskPatch::new().priority(2).status(Status::Pending).description("desc"))
            .unwrap();
        assert_eq!(same, original);
    }

    #[test]
    fn test_update_task_status_timestamps() {
        let mut store = setup_test_store();
        store.add_task(NewTask::new("a", "desc")).unwrap();

        let started = store.update_task("a", TaskPatch::new().status(Status::InProgress)).unwrap();
        assert!(started.started_at.is_some());
        assert!(started.completed_at.is_none());

        let done = store.update_task("a", TaskPatch::new().status(Status::Completed)).unwrap();
        assert_eq!(done.started_at, started.started_at);
        assert!(done.completed_at.is_some());

        let reset = store.update_task("a", TaskPatch::new().status(Status::Pending)).unwrap();
        assert!(reset.started_at.is_none());
        assert!(reset.completed_at.is_none());
    }

    #[test]
    fn test_guarded_transitions() {
        let mut store = setup_test_store();
        store.add_task(NewTask::new("a", "desc")).unwrap();

        let err = store.complete_task("a").unwrap_err();
        assert!(matches!(
            store_error(&err),
            StoreError::InvalidTransition {
                from: Status::Pending,
                to: Status::Completed,
                ..
            }
        ));

        store.start_task("a").unwrap();
        let err = store.start_task("a").unwrap_err();
        assert!(matches!(store_error(&err), StoreError::InvalidTransition { .. }));

        let done = store.complete_task("a").unwrap();
        assert_eq!(done.status, Status::Completed);

        let err = store.start_task("missing").unwrap_err();
        assert!(matches!(store_error(&err), StoreError::NotFound { .. }));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut store = setup_test_store();
        store.add_task(NewTask::new("a", "desc")).unwrap();

        let err = store.add_dependency("a", "a").unwrap_err();
        assert_eq!(store_error(&err), &StoreError::SelfDependency("a".to_string()));
    }

    #[test]
    fn test_cycle_detection() {
        let mut store = setup_test_store();
        for name in ["a", "b", "c"] {
            store.add_task(NewTask::new(name, "desc")).unwrap();
        }

        store.add_dependency("a", "b").unwrap();
        store.add_dependency("b", "c").unwrap();

        let err = store.add_dependency("c", "a").unwrap_err();
        assert_eq!(
            store_error(&err),
            &StoreError::CircularDependency {
                path: vec!["c".into(), "a".into(), "b".into(), "c".into()]
            }
        );
        assert_eq!(store.list_dependencies(None).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let mut store = setup_test_store();
        store.add_task(NewTask::new("a", "desc")).unwrap();
        store.add_task(NewTask::new("b", "desc")).unwrap();

        store.add_dependency("a", "b").unwrap();
        let err = store.add_dependency("a", "b").unwrap_err();
        assert!(matches!(store_error(&err), StoreError::DuplicateEdge { .. }));
    }

    #[test]
    fn test_remove_dependency() {
        let mut store = setup_test_store();
        store.add_task(NewTask::new("a", "desc")).unwrap();
        store.add_task(NewTask::new("b", "desc")).unwrap();
        store.add_dependency("a", "b").unwrap();

        assert!(store.remove_dependency("a", "b").unwrap());
        assert!(!store.remove_dependency("a", "b").unwrap());

        let err = store.remove_dependency("a", "ghost").unwrap_err();
        assert!(matches!(store_error(&err), StoreError::NotFound { .. }));
    }

    #[test]
    fn test_feature_lifecycle() {
        let mut store = setup_test_store();
        let feature = store.add_feature("auth", Some("Authentication"), true).unwrap();
        assert!(feature.enabled);

        let err = store.add_feature("auth", None, true).unwrap_err();
        assert!(matches!(store_error(&err), StoreError::DuplicateName { entity: Entity::Feature, .. }));

        store.add_task(NewTask::new("login", "desc").feature("auth")).unwrap();
        let err = store.delete_feature("auth").unwrap_err();
        assert_eq!(
            store_error(&err),
            &StoreError::FeatureInUse {
                name: "auth".to_string(),
                tasks: 1
            }
        );

        let disabled = store
            .update_feature(
                "auth",
                FeaturePatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!disabled.enabled);
        assert_eq!(store.list_features(Some(false)).unwrap().len(), 1);

        store.delete_task("login").unwrap();
        store.delete_feature("auth").unwrap();
        assert!(store.get_feature("auth").unwrap().is_none());

        let err = store.delete_feature(DEFAULT_FEATURE).unwrap_err();
        assert!(matches!(store_error(&err), StoreError::Validation(_)));
    }

    #[test]
    fn test_reset_keeps_default_feature() {
        let mut store = setup_test_store();
        store.add_feature("auth", None, true).unwrap();
        store.add_task(NewTask::new("a", "desc").feature("auth")).unwrap();

        store.reset().unwrap();
        assert!(store.list_tasks(&TaskFilter::new()).unwrap().is_empty());
        let features = store.list_features(None).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].name, DEFAULT_FEATURE);
    }

    #[test]
    fn test_auto_export_after_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = temp_dir.path().join("snapshot.jsonl");
        let mut store = Store::open(&temp_dir.path().join("tasktree.db"))
            .unwrap()
            .with_auto_export(&snapshot);

        store.add_task(NewTask::new("a", "desc")).unwrap();

        let content = std::fs::read_to_string(&snapshot).unwrap();
        assert!(content.starts_with("{\"generated_at\""));
        assert!(content.contains("\"record_type\":\"task\""));
    }
}
