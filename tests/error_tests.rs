//! Integration tests for error handling.
//!
//! Every rejected mutation must return a specific error kind and leave the
//! graph exactly as it was.

mod common;

use common::{TestEnv, store_error};
use std::sync::{Arc, Barrier};
use std::thread;
use tasktree::{Entity, ErrorKind, FeaturePatch, NewTask, Status, Store, StoreError, TaskPatch, ValidationError};
use tempfile::TempDir;

// =============================================================================
// Not Found Tests
// =============================================================================

#[test]
fn test_get_nonexistent_task_returns_none() {
    let env = TestEnv::new();
    assert!(env.store.get_task("missing").unwrap().is_none());
}

#[test]
fn test_update_nonexistent_task_fails() {
    let mut env = TestEnv::new();

    let err = store_error(env.store.update_task("missing", TaskPatch::new().priority(1)));
    assert_eq!(
        err,
        StoreError::NotFound {
            entity: Entity::Task,
            name: "missing".to_string()
        }
    );
}

#[test]
fn test_delete_nonexistent_task_fails() {
    let mut env = TestEnv::new();
    let err = store_error(env.store.delete_task("missing"));
    assert!(matches!(err, StoreError::NotFound { entity: Entity::Task, .. }));
}

#[test]
fn test_dependency_on_nonexistent_task_fails() {
    let mut env = TestEnv::new();
    env.create_task("real");

    let err = store_error(env.store.add_dependency("real", "ghost"));
    assert_eq!(
        err,
        StoreError::NotFound {
            entity: Entity::Task,
            name: "ghost".to_string()
        }
    );

    let err = store_error(env.store.add_dependency("ghost", "real"));
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[test]
fn test_task_in_unknown_feature_fails() {
    let mut env = TestEnv::new();
    let err = store_error(env.store.add_task(NewTask::new("a", "desc").feature("nope")));
    assert_eq!(
        err,
        StoreError::NotFound {
            entity: Entity::Feature,
            name: "nope".to_string()
        }
    );

    env.create_task("b");
    let err = store_error(env.store.update_task("b", TaskPatch::new().feature("nope")));
    assert!(matches!(err, StoreError::NotFound { entity: Entity::Feature, .. }));
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_priority_out_of_range() {
    let mut env = TestEnv::new();
    let err = store_error(env.store.add_task(NewTask::new("a", "desc").priority(11)));
    assert_eq!(err, StoreError::Validation(ValidationError::InvalidPriority(11)));

    env.create_task("b");
    let err = store_error(env.store.update_task("b", TaskPatch::new().priority(200)));
    assert_eq!(err, StoreError::Validation(ValidationError::InvalidPriority(200)));
}

#[test]
fn test_name_too_long() {
    let mut env = TestEnv::new();
    let name = "n".repeat(56);
    let err = store_error(env.store.add_task(NewTask::new(&name, "desc")));
    assert_eq!(err, StoreError::Validation(ValidationError::NameTooLong(name)));

    let err = store_error(env.store.add_feature(&"f".repeat(56), None, true));
    assert!(matches!(err, StoreError::Validation(ValidationError::NameTooLong(_))));
}

#[test]
fn test_empty_name_and_description() {
    let mut env = TestEnv::new();
    let err = store_error(env.store.add_task(NewTask::new("", "desc")));
    assert_eq!(err, StoreError::Validation(ValidationError::EmptyName));

    let err = store_error(env.store.add_task(NewTask::new("a", "")));
    assert_eq!(err, StoreError::Validation(ValidationError::EmptyDescription));
}

#[test]
fn test_invalid_status_text() {
    let err = "done".parse::<Status>().unwrap_err();
    assert_eq!(err, ValidationError::InvalidStatus("done".to_string()));
}

// =============================================================================
// Duplicate Tests
// =============================================================================

#[test]
fn test_duplicate_task_name() {
    let mut env = TestEnv::new();
    env.create_task("a");
    let err = store_error(env.store.add_task(NewTask::new("a", "again")));
    assert_eq!(
        err,
        StoreError::DuplicateName {
            entity: Entity::Task,
            name: "a".to_string()
        }
    );
}

#[test]
fn test_duplicate_edge() {
    let mut env = TestEnv::new();
    env.create_task("a");
    env.create_task("b");
    env.add_dep("a", "b");

    let err = store_error(env.store.add_dependency("a", "b"));
    assert_eq!(
        err,
        StoreError::DuplicateEdge {
            task: "a".to_string(),
            depends_on: "b".to_string()
        }
    );
}

// =============================================================================
// Transition Tests
// =============================================================================

#[test]
fn test_complete_pending_task_fails() {
    let mut env = TestEnv::new();
    env.create_task("a");

    let err = store_error(env.store.complete_task("a"));
    assert_eq!(
        err,
        StoreError::InvalidTransition {
            name: "a".to_string(),
            from: Status::Pending,
            to: Status::Completed
        }
    );
}

#[test]
fn test_start_completed_task_fails() {
    let mut env = TestEnv::new();
    env.create_task("a");
    env.finish("a");

    let err = store_error(env.store.start_task("a"));
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: Status::Completed,
            to: Status::InProgress,
            ..
        }
    ));
}

#[test]
fn test_start_blocked_task_allowed() {
    let mut env = TestEnv::new();
    env.create_task("a");
    env.store
        .update_task("a", TaskPatch::new().status(Status::Blocked))
        .unwrap();

    let task = env.store.start_task("a").unwrap();
    assert_eq!(task.status, Status::InProgress);
}

// =============================================================================
// Feature Errors
// =============================================================================

#[test]
fn test_delete_feature_in_use() {
    let mut env = TestEnv::new();
    env.store.add_feature("ui", None, true).unwrap();
    env.store.add_task(NewTask::new("button", "desc").feature("ui")).unwrap();

    let err = store_error(env.store.delete_feature("ui"));
    assert_eq!(
        err,
        StoreError::FeatureInUse {
            name: "ui".to_string(),
            tasks: 1
        }
    );
    assert!(env.store.get_feature("ui").unwrap().is_some());
}

#[test]
fn test_update_unknown_feature() {
    let mut env = TestEnv::new();
    let err = store_error(env.store.update_feature("nope", FeaturePatch::default()));
    assert!(matches!(err, StoreError::NotFound { entity: Entity::Feature, .. }));
}

// =============================================================================
// Atomicity Tests
// =============================================================================

#[test]
fn test_failed_add_task_leaves_graph_unchanged() {
    let mut env = TestEnv::new();
    env.create_task("a");
    env.create_task("b");
    env.add_dep("b", "a");

    let tasks_before = env.all_tasks();
    let deps_before = env.all_deps();

    // Second dependency is missing: the task and its first edge must not land
    let result = env
        .store
        .add_task(NewTask::new("c", "desc").depends_on("a").depends_on("ghost"));
    assert!(result.is_err());

    assert_eq!(env.all_tasks(), tasks_before);
    assert_eq!(env.all_deps(), deps_before);
}

#[test]
fn test_failed_add_task_with_duplicate_dependency_leaves_graph_unchanged() {
    let mut env = TestEnv::new();
    env.create_task("a");
    let before = env.all_tasks();

    let err = store_error(env.store.add_task(NewTask::new("c", "desc").depends_on("a").depends_on("a")));
    assert!(matches!(err, StoreError::DuplicateEdge { .. }));
    assert_eq!(env.all_tasks(), before);
    assert!(env.all_deps().is_empty());
}

#[test]
fn test_failed_update_leaves_task_unchanged() {
    let mut env = TestEnv::new();
    let original = env.create_task_with_priority("a", 3);

    let result = env.store.update_task(
        "a",
        TaskPatch::new()
            .status(Status::InProgress)
            .description("new")
            .feature("nope"),
    );
    assert!(result.is_err());
    assert_eq!(env.task("a"), original);
}

#[test]
fn test_failed_transaction_visible_to_second_connection() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tasktree.db");
    let mut writer = Store::open(&db).unwrap();
    let reader = Store::open(&db).unwrap();

    writer.add_task(NewTask::new("a", "desc")).unwrap();
    let _ = writer.add_task(NewTask::new("b", "desc").depends_on("ghost"));

    assert!(reader.get_task("a").unwrap().is_some());
    assert!(reader.get_task("b").unwrap().is_none());
}

#[test]
fn test_error_kind_classification() {
    let mut env = TestEnv::new();
    env.create_task("a");

    let err = env.store.add_dependency("a", "a").unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::SelfDependency);

    let err = env.store.complete_task("a").unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::InvalidTransition);

    let err = env.store.add_task(NewTask::new("a", "dup")).unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::DuplicateName);
    assert!(err.to_string().contains("'a'"));
}

// =============================================================================
// Concurrent Writers
// =============================================================================

/// Run `op` on two threads at once, each with its own connection to `db`.
fn race<T: Send + 'static>(
    db: &std::path::Path,
    op: impl Fn(&mut Store, usize) -> eyre::Result<T> + Send + Sync + 'static,
) -> Vec<eyre::Result<T>> {
    let barrier = Arc::new(Barrier::new(2));
    let op = Arc::new(op);
    let handles: Vec<_> = (0..2)
        .map(|i| {
            let db = db.to_path_buf();
            let barrier = Arc::clone(&barrier);
            let op = Arc::clone(&op);
            thread::spawn(move || {
                let mut store = Store::open(&db).unwrap();
                barrier.wait();
                op(&mut store, i)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_racing_reverse_edges_never_both_land() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tasktree.db");

    for round in 0..20 {
        let a = format!("a{round}");
        let b = format!("b{round}");
        {
            let mut store = Store::open(&db).unwrap();
            store.add_task(NewTask::new(&a, "desc")).unwrap();
            store.add_task(NewTask::new(&b, "desc")).unwrap();
        }

        let (x, y) = (a.clone(), b.clone());
        let results = race(&db, move |store, i| {
            if i == 0 {
                store.add_dependency(&x, &y)
            } else {
                store.add_dependency(&y, &x)
            }
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "round {round}");

        let loser = results.into_iter().find_map(|r| r.err()).unwrap();
        assert_eq!(ErrorKind::of(&loser), ErrorKind::CircularDependency, "round {round}");

        let store = Store::open(&db).unwrap();
        assert_eq!(store.list_dependencies(Some(a.as_str())).unwrap().len(), 1);
    }
}

#[test]
fn test_racing_same_name_only_one_created() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("tasktree.db");
    Store::open(&db).unwrap();

    for round in 0..20 {
        let name = format!("t{round}");
        let results = race(&db, move |store, i| {
            store.add_task(NewTask::new(name.as_str(), format!("writer {i}")))
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "round {round}");

        let loser = results.into_iter().find_map(|r| r.err()).unwrap();
        assert_eq!(ErrorKind::of(&loser), ErrorKind::DuplicateName, "round {round}");
    }
}
