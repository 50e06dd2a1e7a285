//! Shared test infrastructure for tasktree integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use std::path::PathBuf;
use tasktree::{Dependency, NewTask, Status, Store, StoreError, Task, TaskFilter};
use tempfile::TempDir;

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an on-disk store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::open(&temp_dir.path().join("tasktree.db")).expect("Failed to open store");
        Self { temp_dir, store }
    }

    /// Path for a scratch file inside the environment.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Create a task with default priority.
    pub fn create_task(&mut self, name: &str) -> Task {
        self.store
            .add_task(NewTask::new(name, format!("{name} description")))
            .expect("Failed to create task")
    }

    /// Create a task with specified priority.
    pub fn create_task_with_priority(&mut self, name: &str, priority: u8) -> Task {
        self.store
            .add_task(NewTask::new(name, format!("{name} description")).priority(priority))
            .expect("Failed to create task")
    }

    /// `task` depends on `depends_on`.
    pub fn add_dep(&mut self, task: &str, depends_on: &str) -> Dependency {
        self.store
            .add_dependency(task, depends_on)
            .expect("Failed to add dependency")
    }

    /// Start and complete a task.
    pub fn finish(&mut self, name: &str) -> Task {
        self.store.start_task(name).expect("Failed to start task");
        self.store.complete_task(name).expect("Failed to complete task")
    }

    /// Names of the available tasks, in order.
    pub fn available_names(&self) -> Vec<String> {
        self.store
            .available_tasks()
            .expect("Failed to get available tasks")
            .into_iter()
            .map(|t| t.name)
            .collect()
    }

    /// Assert that a task is available.
    pub fn assert_available(&self, name: &str) {
        let available = self.available_names();
        assert!(
            available.iter().any(|n| n == name),
            "Expected task {} to be available, but it wasn't. Available tasks: {:?}",
            name,
            available
        );
    }

    /// Assert that a task is NOT available.
    pub fn assert_not_available(&self, name: &str) {
        let available = self.available_names();
        assert!(
            !available.iter().any(|n| n == name),
            "Expected task {} to NOT be available, but it was",
            name
        );
    }

    /// Get a task that must exist.
    pub fn task(&self, name: &str) -> Task {
        self.store
            .get_task(name)
            .expect("Failed to get task")
            .unwrap_or_else(|| panic!("Task {name} missing"))
    }

    /// All tasks in list order.
    pub fn all_tasks(&self) -> Vec<Task> {
        self.store.list_tasks(&TaskFilter::new()).expect("Failed to list tasks")
    }

    /// All edges in order.
    pub fn all_deps(&self) -> Vec<Dependency> {
        self.store.list_dependencies(None).expect("Failed to list dependencies")
    }

    /// Get tasks count by status.
    pub fn count_by_status(&self, status: Status) -> usize {
        self.store
            .list_tasks(&TaskFilter::new().status(status))
            .expect("Failed to list tasks")
            .len()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the store error from a failed call.
pub fn store_error<T: std::fmt::Debug>(result: eyre::Result<T>) -> StoreError {
    let err = result.expect_err("expected an error");
    err.downcast_ref::<StoreError>()
        .unwrap_or_else(|| panic!("expected a StoreError, got: {err:#}"))
        .clone()
}
