//! Cycle detection for dependency edges.
//!
//! Adding `task -> depends_on` closes a cycle exactly when `task` is already
//! reachable from `depends_on`. The search is an iterative breadth-first
//! walk with a visited set, so there is no depth bound to tune.

use eyre::{Context, Result};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet, VecDeque};

/// Outgoing `depends_on` edges keyed by task name.
pub type Adjacency = HashMap<String, Vec<String>>;

/// Load the full adjacency map from the dependencies table.
///
/// Call with the writing transaction so the check and the insert see the
/// same graph.
pub fn load_adjacency(conn: &Connection) -> Result<Adjacency> {
    let mut stmt = conn
        .prepare("SELECT task_name, depends_on_task_name FROM dependencies")
        .context("Failed to prepare adjacency query")?;

    let mut adjacency = Adjacency::new();
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (from, to) = row?;
        adjacency.entry(from).or_default().push(to);
    }

    Ok(adjacency)
}

/// Find a path from `start` to `target` following edges forward.
///
/// Returns the node sequence including both ends, or `None` if unreachable.
pub fn find_path(adjacency: &Adjacency, start: &str, target: &str) -> Option<Vec<String>> {
    if start == target {
        return Some(vec![start.to_string()]);
    }

    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<&str> = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        let Some(next) = adjacency.get(node) else {
            continue;
        };
        for dep in next {
            if !visited.insert(dep.as_str()) {
                continue;
            }
            parent.insert(dep.as_str(), node);
            if dep == target {
                let mut path = vec![target.to_string()];
                let mut cur = target;
                while let Some(&prev) = parent.get(cur) {
                    path.push(prev.to_string());
                    cur = prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(dep.as_str());
        }
    }

    None
}

/// If adding `task -> depends_on` would close a cycle, return the cycle as
/// `task -> depends_on -> ... -> task`.
pub fn cycle_for_edge(adjacency: &Adjacency, task: &str, depends_on: &str) -> Option<Vec<String>> {
    find_path(adjacency, depends_on, task).map(|path| {
        let mut cycle = Vec::with_capacity(path.len() + 1);
        cycle.push(task.to_string());
        cycle.extend(path);
        cycle
    })
}

/// Check against the live table. See [`cycle_for_edge`].
pub fn check_edge(conn: &Connection, task: &str, depends_on: &str) -> Result<Option<Vec<String>>> {
    let adjacency = load_adjacency(conn)?;
    Ok(cycle_for_edge(&adjacency, task, depends_on))
}

/// True if the adjacency map contains any cycle.
#[cfg(test)]
pub fn has_cycle(adjacency: &Adjacency) -> bool {
    // Kahn's algorithm: a DAG drains completely
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    for (from, tos) in adjacency {
        indegree.entry(from.as_str()).or_insert(0);
        for to in tos {
            *indegree.entry(to.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = indegree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
    let mut drained = 0;

    while let Some(node) = queue.pop_front() {
        drained += 1;
        for to in adjacency.get(node).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(to.as_str()) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(to.as_str());
                }
            }
        }
    }

    drained != indegree.len()
}
