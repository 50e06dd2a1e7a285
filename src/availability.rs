//! The available frontier: tasks that can start right now.
//!
//! A task is available when it is pending and every task it depends on is
//! completed. The answer is recomputed by a single SQL statement on every
//! call, so it always reflects one consistent state of the graph.

use crate::storage::{TASK_COLUMNS, row_to_task};
use crate::types::{Status, Task};
use eyre::Result;
use rusqlite::{Connection, params};

/// Available tasks, highest priority first, then oldest first.
///
/// Ties on `created_at` fall back to insertion order.
pub fn available_tasks(conn: &Connection) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks t
         WHERE t.status = 'pending'
           AND NOT EXISTS (
               SELECT 1 FROM dependencies d
               JOIN tasks blocker ON blocker.name = d.depends_on_task_name
               WHERE d.task_name = t.name
                 AND blocker.status != 'completed'
           )
         ORDER BY t.priority DESC, t.created_at ASC, t.rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map([], row_to_task)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

/// Direct dependencies of `task_name` that are not completed yet, with
/// their current status, ordered by name.
pub fn unmet_dependencies(conn: &Connection, task_name: &str) -> Result<Vec<(String, Status)>> {
    let mut stmt = conn.prepare(
        "SELECT blocker.name, blocker.status FROM dependencies d
         JOIN tasks blocker ON blocker.name = d.depends_on_task_name
         WHERE d.task_name = ? AND blocker.status != 'completed'
         ORDER BY blocker.name ASC",
    )?;
    let rows = stmt
        .query_map(params![task_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut unmet = Vec::with_capacity(rows.len());
    for (name, status) in rows {
        unmet.push((name, status.parse::<Status>()?));
    }
    Ok(unmet)
}
