//! Storage layer: SQLite schema, row mapping and single-statement queries.
//!
//! Query helpers take a plain `&Connection` so they run equally against the
//! connection or inside a `Transaction` (which derefs to one).

use crate::types::{DEFAULT_FEATURE, Dependency, Feature, Status, Task, TaskFilter, now_timestamp};
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::fs;
use std::path::{Path, PathBuf};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS features (
        name TEXT PRIMARY KEY CHECK (length(name) BETWEEN 1 AND 55),
        description TEXT,
        enabled INTEGER NOT NULL DEFAULT 1 CHECK (enabled IN (0, 1)),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tasks (
        name TEXT PRIMARY KEY CHECK (length(name) BETWEEN 1 AND 55),
        description TEXT NOT NULL,
        details TEXT,
        feature_name TEXT NOT NULL REFERENCES features(name) ON DELETE RESTRICT,
        priority INTEGER NOT NULL DEFAULT 0 CHECK (priority BETWEEN 0 AND 10),
        tests_required INTEGER NOT NULL DEFAULT 1 CHECK (tests_required IN (0, 1)),
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'in_progress', 'completed', 'blocked')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_tasks_feature ON tasks(feature_name);

    CREATE TABLE IF NOT EXISTS dependencies (
        task_name TEXT NOT NULL REFERENCES tasks(name) ON DELETE CASCADE,
        depends_on_task_name TEXT NOT NULL REFERENCES tasks(name) ON DELETE CASCADE,
        PRIMARY KEY (task_name, depends_on_task_name),
        CHECK (task_name != depends_on_task_name)
    );
    CREATE INDEX IF NOT EXISTS idx_dependencies_target ON dependencies(depends_on_task_name);
"#;

pub(crate) const TASK_COLUMNS: &str = "name, description, details, feature_name, priority, tests_required, status, \
                            created_at, updated_at, started_at, completed_at";

/// Storage handle owning the SQLite connection.
pub struct Storage {
    path: Option<PathBuf>,
    db: Connection,
}

impl Storage {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let db = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;

        let storage = Self {
            path: Some(path.to_path_buf()),
            db,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let storage = Self { path: None, db };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.db
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.db
            .execute_batch(SCHEMA)
            .context("Failed to initialize schema")?;
        ensure_default_feature(&self.db)?;
        Ok(())
    }

    /// Begin a write transaction.
    ///
    /// `IMMEDIATE` takes SQLite's reserved lock up front, so every check made
    /// inside the transaction still holds when it commits.
    pub fn begin_write(&mut self) -> Result<Transaction<'_>> {
        self.db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin write transaction")
    }

    /// Begin a read transaction for multi-statement reads.
    pub fn begin_read(&self) -> Result<Transaction<'_>> {
        self.db
            .unchecked_transaction()
            .context("Failed to begin read transaction")
    }

    /// Direct access for single-statement reads.
    pub fn conn(&self) -> &Connection {
        &self.db
    }

    /// Close the connection, surfacing any error from SQLite.
    pub fn close(self) -> Result<()> {
        self.db
            .close()
            .map_err(|(_, e)| e)
            .context("Failed to close database")
    }
}

/// Create the default feature if it is missing.
pub fn ensure_default_feature(conn: &Connection) -> Result<()> {
    let now = now_timestamp();
    conn.execute(
        "INSERT OR IGNORE INTO features (name, description, enabled, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?3)",
        params![DEFAULT_FEATURE, "Miscellaneous tasks", now],
    )
    .context("Failed to create default feature")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

fn row_to_feature(row: &rusqlite::Row) -> rusqlite::Result<Feature> {
    Ok(Feature {
        name: row.get(0)?,
        description: row.get(1)?,
        enabled: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub fn get_feature(conn: &Connection, name: &str) -> Result<Option<Feature>> {
    let feature = conn
        .query_row(
            "SELECT name, description, enabled, created_at, updated_at FROM features WHERE name = ?",
            params![name],
            row_to_feature,
        )
        .optional()?;
    Ok(feature)
}

pub fn feature_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM features WHERE name = ?", params![name], |row| {
        row.get(0)
    })?;
    Ok(count > 0)
}

pub fn insert_feature(conn: &Connection, feature: &Feature) -> Result<()> {
    conn.execute(
        "INSERT INTO features (name, description, enabled, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        params![
            feature.name,
            feature.description,
            feature.enabled,
            feature.created_at,
            feature.updated_at
        ],
    )?;
    Ok(())
}

pub fn update_feature_row(conn: &Connection, feature: &Feature) -> Result<()> {
    conn.execute(
        "UPDATE features SET description = ?, enabled = ?, updated_at = ? WHERE name = ?",
        params![feature.description, feature.enabled, feature.updated_at, feature.name],
    )?;
    Ok(())
}

pub fn delete_feature_row(conn: &Connection, name: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM features WHERE name = ?", params![name])?;
    Ok(deleted > 0)
}

/// List features ordered by name, optionally filtered by `enabled`.
pub fn list_features(conn: &Connection, enabled: Option<bool>) -> Result<Vec<Feature>> {
    let mut stmt = conn.prepare(
        "SELECT name, description, enabled, created_at, updated_at FROM features
         WHERE (?1 IS NULL OR enabled = ?1)
         ORDER BY name ASC",
    )?;
    let features = stmt
        .query_map(params![enabled], row_to_feature)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(features)
}

pub fn count_tasks_in_feature(conn: &Connection, name: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE feature_name = ?",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

pub(crate) fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get(6)?;
    let status = status_str.parse::<Status>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Task {
        name: row.get(0)?,
        description: row.get(1)?,
        details: row.get(2)?,
        feature_name: row.get(3)?,
        priority: row.get(4)?,
        tests_required: row.get(5)?,
        status,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

pub fn get_task(conn: &Connection, name: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE name = ?");
    let task = conn.query_row(&sql, params![name], row_to_task).optional()?;
    Ok(task)
}

pub fn task_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks WHERE name = ?", params![name], |row| {
        row.get(0)
    })?;
    Ok(count > 0)
}

pub fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    let sql = format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
    conn.execute(
        &sql,
        params![
            task.name,
            task.description,
            task.details,
            task.feature_name,
            task.priority,
            task.tests_required,
            task.status.as_str(),
            task.created_at,
            task.updated_at,
            task.started_at,
            task.completed_at,
        ],
    )?;
    Ok(())
}

/// Overwrite every mutable column of an existing task.
pub fn update_task_row(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        r#"
        UPDATE tasks SET
            description = ?, details = ?, feature_name = ?, priority = ?, tests_required = ?,
            status = ?, updated_at = ?, started_at = ?, completed_at = ?
        WHERE name = ?
        "#,
        params![
            task.description,
            task.details,
            task.feature_name,
            task.priority,
            task.tests_required,
            task.status.as_str(),
            task.updated_at,
            task.started_at,
            task.completed_at,
            task.name,
        ],
    )?;
    Ok(())
}

/// Delete a task and every edge touching it.
pub fn delete_task_row(conn: &Connection, name: &str) -> Result<bool> {
    conn.execute(
        "DELETE FROM dependencies WHERE task_name = ?1 OR depends_on_task_name = ?1",
        params![name],
    )?;
    let deleted = conn.execute("DELETE FROM tasks WHERE name = ?", params![name])?;
    Ok(deleted > 0)
}

/// List tasks matching the filter, highest priority first, oldest first
/// within a priority.
pub fn list_tasks(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE (?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR priority >= ?2)
           AND (?3 IS NULL OR feature_name = ?3)
         ORDER BY priority DESC, created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(
            params![
                filter.status.map(|s| s.as_str()),
                filter.min_priority,
                filter.feature_name
            ],
            row_to_task,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

/// All tasks ordered by name.
pub fn tasks_by_name(conn: &Connection) -> Result<Vec<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY name ASC");
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map([], row_to_task)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

pub fn edge_exists(conn: &Connection, task_name: &str, depends_on: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dependencies WHERE task_name = ? AND depends_on_task_name = ?",
        params![task_name, depends_on],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_edge(conn: &Connection, task_name: &str, depends_on: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO dependencies (task_name, depends_on_task_name) VALUES (?, ?)",
        params![task_name, depends_on],
    )?;
    Ok(())
}

pub fn delete_edge(conn: &Connection, task_name: &str, depends_on: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM dependencies WHERE task_name = ? AND depends_on_task_name = ?",
        params![task_name, depends_on],
    )?;
    Ok(deleted > 0)
}

/// List edges, optionally only those touching `task_name` on either end.
pub fn list_edges(conn: &Connection, task_name: Option<&str>) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare(
        "SELECT task_name, depends_on_task_name FROM dependencies
         WHERE (?1 IS NULL OR task_name = ?1 OR depends_on_task_name = ?1)
         ORDER BY task_name ASC, depends_on_task_name ASC",
    )?;
    let edges = stmt
        .query_map(params![task_name], |row| {
            Ok(Dependency {
                task_name: row.get(0)?,
                depends_on_task_name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

// ---------------------------------------------------------------------------
// Whole-graph helpers
// ---------------------------------------------------------------------------

/// Delete every edge, task and feature.
pub fn clear_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM dependencies;
        DELETE FROM tasks;
        DELETE FROM features;
        "#,
    )
    .context("Failed to clear tables")?;
    Ok(())
}

/// True when the store holds no tasks and no features besides the default.
pub fn is_empty(conn: &Connection) -> Result<bool> {
    let tasks: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
    let features: i64 = conn.query_row(
        "SELECT COUNT(*) FROM features WHERE name != ?",
        params![DEFAULT_FEATURE],
        |row| row.get(0),
    )?;
    Ok(tasks == 0 && features == 0)
}

/// Newest `updated_at` across features and tasks.
pub fn latest_update(conn: &Connection) -> Result<Option<String>> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(ts) FROM (
             SELECT MAX(updated_at) AS ts FROM features
             UNION ALL
             SELECT MAX(updated_at) AS ts FROM tasks
         )",
        [],
        |row| row.get(0),
    )?;
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_task(name: &str, priority: u8, created_at: &str) -> Task {
        Task {
            name: name.to_string(),
            description: format!("{name} description"),
            details: None,
            feature_name: DEFAULT_FEATURE.to_string(),
            priority,
            tests_required: true,
            status: Status::Pending,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_open_creates_file_and_default_feature() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("tasktree.db");
        let storage = Storage::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(storage.path(), Some(path.as_path()));
        assert!(feature_exists(storage.conn(), DEFAULT_FEATURE).unwrap());
        assert!(is_empty(storage.conn()).unwrap());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasktree.db");
        {
            let storage = Storage::open(&path).unwrap();
            insert_task(storage.conn(), &make_task("a", 1, "2026-01-01T00:00:00.000000Z")).unwrap();
            storage.close().unwrap();
        }
        let storage = Storage::open(&path).unwrap();
        assert!(task_exists(storage.conn(), "a").unwrap());
    }

    #[test]
    fn test_insert_and_get_task() {
        let storage = Storage::open_in_memory().unwrap();
        let task = make_task("a", 3, "2026-01-01T00:00:00.000000Z");
        insert_task(storage.conn(), &task).unwrap();

        let loaded = get_task(storage.conn(), "a").unwrap().unwrap();
        assert_eq!(loaded, task);
        assert!(get_task(storage.conn(), "missing").unwrap().is_none());
    }

    #[test]
    fn test_schema_rejects_bad_rows() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.conn();

        let mut bad_feature = make_task("a", 1, "t");
        bad_feature.feature_name = "nope".to_string();
        assert!(insert_task(conn, &bad_feature).is_err());

        let mut bad_priority = make_task("b", 1, "t");
        bad_priority.priority = 11;
        assert!(insert_task(conn, &bad_priority).is_err());

        insert_task(conn, &make_task("c", 1, "t")).unwrap();
        assert!(insert_task(conn, &make_task("c", 1, "t")).is_err());
        assert!(insert_edge(conn, "c", "c").is_err());
        assert!(insert_edge(conn, "c", "ghost").is_err());
    }

    #[test]
    fn test_list_tasks_filters_and_order() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.conn();
        insert_feature(
            conn,
            &Feature {
                name: "ui".to_string(),
                description: None,
                enabled: true,
                created_at: "t".to_string(),
                updated_at: "t".to_string(),
            },
        )
        .unwrap();

        insert_task(conn, &make_task("low", 1, "2026-01-01T00:00:01.000000Z")).unwrap();
        insert_task(conn, &make_task("high-new", 9, "2026-01-01T00:00:03.000000Z")).unwrap();
        insert_task(conn, &make_task("high-old", 9, "2026-01-01T00:00:02.000000Z")).unwrap();
        let mut ui = make_task("ui-task", 5, "2026-01-01T00:00:04.000000Z");
        ui.feature_name = "ui".to_string();
        insert_task(conn, &ui).unwrap();

        let names = |tasks: Vec<Task>| tasks.into_iter().map(|t| t.name).collect::<Vec<_>>();

        assert_eq!(
            names(list_tasks(conn, &TaskFilter::new()).unwrap()),
            vec!["high-old", "high-new", "ui-task", "low"]
        );
        assert_eq!(
            names(list_tasks(conn, &TaskFilter::new().min_priority(5)).unwrap()),
            vec!["high-old", "high-new", "ui-task"]
        );
        assert_eq!(
            names(list_tasks(conn, &TaskFilter::new().feature("ui").min_priority(6)).unwrap()),
            Vec::<String>::new()
        );
        assert_eq!(
            names(list_tasks(conn, &TaskFilter::new().status(Status::Pending).feature("ui")).unwrap()),
            vec!["ui-task"]
        );
    }

    #[test]
    fn test_delete_task_removes_edges() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.conn();
        for name in ["a", "b", "c"] {
            insert_task(conn, &make_task(name, 0, "t")).unwrap();
        }
        insert_edge(conn, "a", "b").unwrap();
        insert_edge(conn, "b", "c").unwrap();

        assert!(delete_task_row(conn, "b").unwrap());
        assert!(list_edges(conn, None).unwrap().is_empty());
        assert!(!delete_task_row(conn, "b").unwrap());
    }

    #[test]
    fn test_list_edges_either_endpoint() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.conn();
        for name in ["a", "b", "c"] {
            insert_task(conn, &make_task(name, 0, "t")).unwrap();
        }
        insert_edge(conn, "b", "c").unwrap();
        insert_edge(conn, "a", "b").unwrap();

        assert_eq!(
            list_edges(conn, None).unwrap(),
            vec![Dependency::new("a", "b"), Dependency::new("b", "c")]
        );
        assert_eq!(list_edges(conn, Some("c")).unwrap(), vec![Dependency::new("b", "c")]);
        assert_eq!(list_edges(conn, Some("b")).unwrap().len(), 2);
    }

    #[test]
    fn test_latest_update() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.conn();
        clear_all(conn).unwrap();
        assert_eq!(latest_update(conn).unwrap(), None);

        ensure_default_feature(conn).unwrap();
        insert_task(conn, &make_task("a", 0, "9999-01-01T00:00:00.000000Z")).unwrap();
        assert_eq!(
            latest_update(conn).unwrap().as_deref(),
            Some("9999-01-01T00:00:00.000000Z")
        );
    }
}
