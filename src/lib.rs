//! TaskTree: a persistent task dependency graph.
//!
//! Tasks are named nodes with a priority and a status. Dependency edges say
//! which tasks must complete before another may start; the store refuses any
//! edge that would close a cycle. The available frontier (pending tasks whose
//! dependencies are all completed) is recomputed on every query, and the
//! whole graph can be exported to and imported from a deterministic JSONL
//! snapshot.
//!
//! # Example
//!
//! ```no_run
//! use tasktree::{NewTask, Store};
//!
//! let mut store = Store::open_in_memory().unwrap();
//!
//! store.add_task(NewTask::new("schema", "Design the schema").priority(8)).unwrap();
//! store
//!     .add_task(NewTask::new("api", "Build the API").depends_on("schema"))
//!     .unwrap();
//!
//! let available = store.available_tasks().unwrap();
//! assert_eq!(available[0].name, "schema");
//!
//! store.start_task("schema").unwrap();
//! store.complete_task("schema").unwrap();
//! assert_eq!(store.available_tasks().unwrap()[0].name, "api");
//! ```

mod availability;
mod cycle;
mod storage;
mod store;
mod transition;
mod types;

pub mod client;
pub mod daemon;
pub mod paths;
pub mod protocol;
pub mod snapshot;

// Re-export public API
pub use client::{Client, RemoteError};
pub use daemon::{Daemon, DaemonConfig, is_daemon_running, start_daemon};
pub use paths::Paths;
pub use protocol::{ErrorKind, Request, Response};
pub use snapshot::{ImportMode, ImportSummary, SnapshotError};
pub use store::{Entity, Store, StoreError};
pub use transition::{Stamp, Transition, transition};
pub use types::{
    DEFAULT_FEATURE, Dependency, Feature, FeaturePatch, MAX_NAME_LEN, MAX_PRIORITY, NewTask, Status, Task, TaskFilter,
    TaskPatch, ValidationError,
};
