//! Locating the state directory and the files inside it.

use eyre::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the state directory created under a repository or home directory.
pub const STATE_DIR: &str = ".tasktree";

const DB_FILE: &str = "tasktree.db";
const SNAPSHOT_FILE: &str = "tasktree.snapshot.jsonl";
const SOCKET_FILE: &str = "daemon.sock";
const PID_FILE: &str = "daemon.pid";

/// Overrides the database path. Must be absolute.
pub const DB_PATH_VAR: &str = "TASKTREE_DB_PATH";

/// Overrides the snapshot path. Must be absolute.
pub const SNAPSHOT_PATH_VAR: &str = "TASKTREE_SNAPSHOT_PATH";

/// Set to `0`, `false` or `no` to stop rewriting the snapshot after mutations.
pub const AUTO_EXPORT_VAR: &str = "TASKTREE_AUTO_EXPORT";

/// Resolved file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Directory holding the state directory (repository root, `--dir`, or home)
    pub root: PathBuf,

    /// `<root>/.tasktree`
    pub state_dir: PathBuf,

    pub db_path: PathBuf,
    pub snapshot_path: PathBuf,
}

impl Paths {
    /// Default layout under `root`, ignoring the environment.
    pub fn in_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            db_path: state_dir.join(DB_FILE),
            snapshot_path: state_dir.join(SNAPSHOT_FILE),
            state_dir,
            root,
        }
    }

    /// Resolve paths from the process environment.
    ///
    /// The root is `dir` if given, else the nearest enclosing git repository,
    /// else the home directory. `TASKTREE_DB_PATH` and
    /// `TASKTREE_SNAPSHOT_PATH` then override the individual files.
    pub fn resolve(dir: Option<&Path>) -> Result<Self> {
        let cwd = env::current_dir().context("Failed to read current directory")?;
        let home = dirs::home_dir();
        Self::resolve_with(|name| env::var(name).ok(), dir, &cwd, home.as_deref())
    }

    pub(crate) fn resolve_with(
        lookup: impl Fn(&str) -> Option<String>,
        dir: Option<&Path>,
        cwd: &Path,
        home: Option<&Path>,
    ) -> Result<Self> {
        let root = match dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => cwd.join(dir),
            None => match find_repo_root(cwd) {
                Some(repo) => repo,
                None => match home {
                    Some(home) => home.to_path_buf(),
                    None => bail!("Cannot locate a home directory; pass --dir"),
                },
            },
        };

        let mut paths = Self::in_root(root);
        if let Some(db) = absolute_override(&lookup, DB_PATH_VAR)? {
            paths.db_path = db;
        }
        if let Some(snapshot) = absolute_override(&lookup, SNAPSHOT_PATH_VAR)? {
            paths.snapshot_path = snapshot;
        }
        Ok(paths)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join(SOCKET_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join(PID_FILE)
    }
}

fn absolute_override(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<PathBuf>> {
    let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let path = PathBuf::from(value.trim());
    if !path.is_absolute() {
        bail!("{} must be an absolute path, got '{}'", var, value);
    }
    Ok(Some(path))
}

/// Walk up from `start` to the nearest directory containing `.git`.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Whether mutations should rewrite the snapshot file.
pub fn auto_export_enabled() -> bool {
    auto_export_from(env::var(AUTO_EXPORT_VAR).ok().as_deref())
}

fn auto_export_from(value: Option<&str>) -> bool {
    !matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("0" | "false" | "no" | "off")
    )
}
